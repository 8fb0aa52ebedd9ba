use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use sqlx::encode::IsNull;
use sqlx::postgres::{PgArgumentBuffer, PgRow, PgTypeInfo};
use sqlx::{Encode, Postgres, Row, Type};

use super::attribute::{Attribute, Kind};

/// Calendar format accepted for date parameters
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Epoch seconds accepted as a date fallback: about one hundred years either side of 1970
pub const EPOCH_LIMIT_SECS: i64 = 3_155_760_000;

/// State of a parameter after ingestion
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Nothing was supplied
    Absent,
    /// The caller asked for NULL explicitly
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    /// A flag that was present
    Flag,
}

impl Value {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Value::Absent | Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Absent | Value::Null | Value::Flag => serializer.serialize_none(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Date(d) => serializer.serialize_str(&d.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

/// Raw input accepted by [`NullableValue::scan`]: request text or a driver-native value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Null,
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<&[u8]> for Scalar {
    fn from(v: &[u8]) -> Self {
        Scalar::Text(String::from_utf8_lossy(v).into_owned())
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(v: Vec<u8>) -> Self {
        Scalar::from(v.as_slice())
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Integer(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Integer(v.into())
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(v: DateTime<Utc>) -> Self {
        Scalar::Date(v)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(v: NaiveDate) -> Self {
        Scalar::Date(v.and_time(chrono::NaiveTime::MIN).and_utc())
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(v: NaiveDateTime) -> Self {
        Scalar::Date(v.and_utc())
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Scalar::Null)
    }
}

/// Raised when input does not parse as the attribute's kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parameter {attribute} requires a {kind} value")]
pub struct ScanError {
    pub attribute: Attribute,
    pub kind: Kind,
}

/// A typed parameter that distinguishes "not supplied" from "explicitly null".
#[derive(Debug, Clone, PartialEq)]
pub struct NullableValue {
    attribute: Attribute,
    value: Value,
}

impl NullableValue {
    pub fn new(attribute: Attribute) -> Self {
        Self {
            attribute,
            value: Value::Absent,
        }
    }

    /// Build and scan in one step. Input that fails to parse leaves the value absent.
    pub fn of(attribute: Attribute, raw: impl Into<Scalar>) -> Self {
        let mut value = Self::new(attribute);
        let _ = value.scan(raw);
        value
    }

    pub fn attribute(&self) -> Attribute {
        self.attribute
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_valid()
    }

    /// True when the caller sent the literal `null`
    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    /// True when nothing usable was supplied (neither valid nor explicit null)
    pub fn is_absent(&self) -> bool {
        matches!(self.value, Value::Absent)
    }

    /// Ingest a raw value, replacing the current state.
    ///
    /// Text is trimmed; the word `null` in any case yields an explicit null for every
    /// kind. Otherwise text is parsed per kind. Typed input is only checked against the
    /// kind, with integers widened to floats. On error the value is left absent.
    pub fn scan(&mut self, raw: impl Into<Scalar>) -> Result<(), ScanError> {
        self.value = Value::Absent;
        let kind = self.attribute.kind();

        let parsed = match raw.into() {
            Scalar::Text(text) => {
                let text = text.trim();
                if text.eq_ignore_ascii_case("null") {
                    self.value = Value::Null;
                    return Ok(());
                }
                parse_text(kind, text)
            }
            Scalar::Null => match kind {
                Kind::Flag => Some(Value::Flag),
                // a database NULL is "not supplied", never an explicit null
                _ => return Ok(()),
            },
            Scalar::Integer(i) => match kind {
                Kind::Integer => Some(Value::Integer(i)),
                Kind::Float => Some(Value::Float(i as f64)),
                _ => None,
            },
            Scalar::Float(f) => (kind == Kind::Float).then_some(Value::Float(f)),
            Scalar::Boolean(b) => (kind == Kind::Boolean).then_some(Value::Boolean(b)),
            Scalar::Date(d) => (kind == Kind::Date).then_some(Value::Date(d)),
        };

        match parsed {
            Some(value) => {
                self.value = value;
                Ok(())
            }
            None => Err(ScanError {
                attribute: self.attribute,
                kind,
            }),
        }
    }

    /// Scan `raw` in place unless the caller already supplied a value or an explicit null.
    pub fn apply_default(&mut self, raw: impl Into<Scalar>) -> &mut Self {
        if self.is_absent() {
            let _ = self.scan(raw);
        }
        self
    }

    /// Copying form of [`apply_default`](Self::apply_default).
    pub fn with_default(mut self, raw: impl Into<Scalar>) -> Self {
        self.apply_default(raw);
        self
    }

    /// `fallback` when nothing was supplied, otherwise the current data (`Null` for an explicit null).
    pub fn coalesce(&self, fallback: impl Into<Value>) -> Value {
        if self.is_absent() {
            fallback.into()
        } else {
            self.value.clone()
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self.value {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Read a column of `row` as `attribute`'s kind. SQL NULL reads as absent.
    pub fn from_row(row: &PgRow, column: &str, attribute: Attribute) -> Result<Self, sqlx::Error> {
        let raw: Scalar = match attribute.kind() {
            Kind::String | Kind::CaseSensitiveString => row.try_get::<Option<String>, _>(column)?.into(),
            Kind::Integer => match row.try_get::<Option<i64>, _>(column) {
                Ok(v) => v.into(),
                Err(_) => row.try_get::<Option<i32>, _>(column)?.into(),
            },
            Kind::Float => match row.try_get::<Option<f64>, _>(column) {
                Ok(v) => v.into(),
                Err(_) => row.try_get::<Option<f32>, _>(column)?.map(f64::from).into(),
            },
            Kind::Boolean => row.try_get::<Option<bool>, _>(column)?.into(),
            Kind::Date => match row.try_get::<Option<DateTime<Utc>>, _>(column) {
                Ok(v) => v.into(),
                Err(_) => match row.try_get::<Option<NaiveDate>, _>(column) {
                    Ok(v) => v.into(),
                    Err(_) => row.try_get::<Option<NaiveDateTime>, _>(column)?.into(),
                },
            },
            Kind::Flag => Scalar::Null,
        };

        let mut value = Self::new(attribute);
        value.scan(raw).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })?;
        Ok(value)
    }
}

fn parse_text(kind: Kind, text: &str) -> Option<Value> {
    match kind {
        Kind::String => Some(Value::String(text.to_lowercase())),
        Kind::CaseSensitiveString => Some(Value::String(text.to_string())),
        Kind::Integer => text.parse().ok().map(Value::Integer),
        Kind::Float => text.parse().ok().map(Value::Float),
        Kind::Boolean => parse_bool(text).map(Value::Boolean),
        Kind::Date => parse_date(text).map(Value::Date),
        Kind::Flag => text.is_empty().then_some(Value::Flag),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
        return Some(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    let secs: i64 = text.parse().ok()?;
    if secs.abs() > EPOCH_LIMIT_SECS {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

impl Serialize for NullableValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

// Anything that is not valid binds as SQL NULL, typed after the attribute's kind so
// Postgres can still infer the parameter type.
impl Type<Postgres> for NullableValue {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }
}

impl<'q> Encode<'q, Postgres> for NullableValue {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        match &self.value {
            Value::String(s) => <String as Encode<'q, Postgres>>::encode_by_ref(s, buf),
            Value::Integer(i) => <i64 as Encode<'q, Postgres>>::encode_by_ref(i, buf),
            Value::Float(f) => <f64 as Encode<'q, Postgres>>::encode_by_ref(f, buf),
            Value::Boolean(b) => <bool as Encode<'q, Postgres>>::encode_by_ref(b, buf),
            Value::Date(d) => <DateTime<Utc> as Encode<'q, Postgres>>::encode_by_ref(d, buf),
            Value::Absent | Value::Null | Value::Flag => IsNull::Yes,
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self.attribute.kind() {
            Kind::String | Kind::CaseSensitiveString => <String as Type<Postgres>>::type_info(),
            Kind::Integer => <i64 as Type<Postgres>>::type_info(),
            Kind::Float => <f64 as Type<Postgres>>::type_info(),
            Kind::Boolean | Kind::Flag => <bool as Type<Postgres>>::type_info(),
            Kind::Date => <DateTime<Utc> as Type<Postgres>>::type_info(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scanned(attribute: Attribute, raw: &str) -> NullableValue {
        NullableValue::of(attribute, raw)
    }

    #[test]
    fn null_literal_is_explicit_null_for_every_kind() {
        for attribute in [
            Attribute::UserName,
            Attribute::Dn,
            Attribute::Uid,
            Attribute::Quota,
            Attribute::Status,
            Attribute::ExpirationDate,
            Attribute::Help,
        ] {
            for literal in ["null", "NULL", "Null", "  nUlL "] {
                let v = scanned(attribute, literal);
                assert!(v.is_null(), "{attribute} / {literal:?}");
                assert!(!v.is_valid());
            }
        }
    }

    #[test]
    fn strings_are_lowercased_unless_case_sensitive() {
        assert_eq!(scanned(Attribute::UserName, " JDoe ").as_str(), Some("jdoe"));
        assert_eq!(scanned(Attribute::FullName, "Jane Doe").as_str(), Some("Jane Doe"));
    }

    #[test]
    fn numbers_parse_or_stay_absent() {
        assert_eq!(scanned(Attribute::Uid, "1234").as_i64(), Some(1234));
        assert_eq!(scanned(Attribute::Uid, "-5").as_i64(), Some(-5));
        assert_eq!(scanned(Attribute::Quota, "2.5").as_f64(), Some(2.5));

        let mut bad = NullableValue::new(Attribute::Uid);
        let err = bad.scan("12a").unwrap_err();
        assert_eq!(err.to_string(), "parameter uid requires a integer value");
        assert!(bad.is_absent());
    }

    #[test]
    fn booleans_accept_canonical_spellings_only() {
        assert_eq!(scanned(Attribute::Status, "TRUE").as_bool(), Some(true));
        assert_eq!(scanned(Attribute::Status, "t").as_bool(), Some(true));
        assert_eq!(scanned(Attribute::Status, "0").as_bool(), Some(false));
        assert_eq!(scanned(Attribute::Status, "False").as_bool(), Some(false));
        assert!(scanned(Attribute::Status, "yes").is_absent());
        assert!(scanned(Attribute::Status, "tRuE").is_absent());
    }

    #[test]
    fn dates_parse_calendar_format_then_epoch() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(scanned(Attribute::ExpirationDate, "2024-01-01").as_date(), Some(expected));
        assert_eq!(scanned(Attribute::ExpirationDate, "1704067200").as_date(), Some(expected));
        assert_eq!(
            scanned(Attribute::ExpirationDate, "-86400").as_date(),
            Some(Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn epoch_outside_a_century_is_rejected() {
        let limit = EPOCH_LIMIT_SECS.to_string();
        assert!(scanned(Attribute::ExpirationDate, &limit).is_valid());
        assert!(scanned(Attribute::ExpirationDate, &(EPOCH_LIMIT_SECS + 1).to_string()).is_absent());
        assert!(scanned(Attribute::ExpirationDate, &(-EPOCH_LIMIT_SECS - 1).to_string()).is_absent());
        assert!(scanned(Attribute::ExpirationDate, "01/02/2024").is_absent());
    }

    #[test]
    fn flags_are_valid_only_when_empty() {
        let flag = scanned(Attribute::Help, "");
        assert!(flag.is_valid());
        assert_eq!(flag.value(), &Value::Flag);
        assert!(scanned(Attribute::Help, "yes").is_absent());
    }

    #[test]
    fn typed_input_is_kind_checked_with_integer_widening() {
        assert_eq!(NullableValue::of(Attribute::Quota, 3i64).as_f64(), Some(3.0));
        assert_eq!(NullableValue::of(Attribute::Uid, 7i32).as_i64(), Some(7));

        let mut uid = NullableValue::new(Attribute::Uid);
        assert!(uid.scan(1.5f64).is_err());
        assert!(uid.scan(true).is_err());

        let mut status = NullableValue::new(Attribute::Status);
        assert!(status.scan(true).is_ok());
        assert_eq!(status.as_bool(), Some(true));
    }

    #[test]
    fn database_null_is_absent_not_explicit() {
        let v = NullableValue::of(Attribute::UserName, Option::<String>::None);
        assert!(v.is_absent());
        assert!(!v.is_null());
    }

    #[test]
    fn default_only_fills_absent_values() {
        let filled = NullableValue::new(Attribute::Shell).with_default("/sbin/nologin");
        assert_eq!(filled.as_str(), Some("/sbin/nologin"));

        let supplied = scanned(Attribute::Shell, "/bin/bash").with_default("/sbin/nologin");
        assert_eq!(supplied.as_str(), Some("/bin/bash"));

        let mut cleared = scanned(Attribute::Shell, "null");
        cleared.apply_default("/sbin/nologin");
        assert!(cleared.is_null());

        // applying twice changes nothing
        let mut twice = NullableValue::new(Attribute::Leader);
        twice.apply_default(false).apply_default(true);
        assert_eq!(twice.as_bool(), Some(false));
    }

    #[test]
    fn coalesce_prefers_supplied_data() {
        assert_eq!(NullableValue::new(Attribute::Comments).coalesce(""), Value::from(""));
        assert_eq!(scanned(Attribute::Comments, "hi").coalesce(""), Value::from("hi"));
        assert_eq!(scanned(Attribute::Comments, "null").coalesce(""), Value::Null);
    }

    #[test]
    fn serializes_to_json() {
        assert_eq!(serde_json::to_value(scanned(Attribute::Uid, "10")).unwrap(), serde_json::json!(10));
        assert_eq!(serde_json::to_value(scanned(Attribute::Uid, "null")).unwrap(), serde_json::Value::Null);
        assert_eq!(
            serde_json::to_value(scanned(Attribute::ExpirationDate, "2024-01-01")).unwrap(),
            serde_json::json!("2024-01-01T00:00:00Z")
        );
    }
}
