// API Error Types
use serde::{Serialize, Serializer};
use std::fmt;

/// SQLSTATE raised by Postgres on a unique constraint violation
const UNIQUE_VIOLATION: &str = "23505";

/// Error categories ordered by severity.
///
/// Everything up to `Text` is a domain failure reported with HTTP 200;
/// `DbQuery` is an internal failure reported with HTTP 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    DataNotFound,
    InvalidData,
    DuplicateData,
    ApiRequirement,
    Text,
    DbQuery,
}

impl ErrorKind {
    pub fn is_internal(&self) -> bool {
        *self >= ErrorKind::DbQuery
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        if self.is_internal() {
            500
        } else {
            200
        }
    }
}

/// Error reported to API callers in the `errors` array of the response envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

// Constructors carrying the default wording for each category
impl ApiError {
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::DataNotFound, format!("{} not found", what))
    }

    pub fn invalid(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidData, format!("{} is invalid", what))
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidData, message)
    }

    pub fn duplicate(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::DuplicateData, format!("{} already exists", what))
    }

    pub fn requirement(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApiRequirement, message)
    }

    pub fn text(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Text, message)
    }

    pub fn db_query() -> Self {
        Self::new(ErrorKind::DbQuery, "error while querying the database")
    }

    /// Translate a store error. Unique violations become a duplicate error naming
    /// `duplicate_of`; anything else is logged and reported opaquely.
    pub fn from_db(err: &sqlx::Error, duplicate_of: impl fmt::Display) -> Self {
        if let sqlx::Error::Database(db) = err {
            if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return Self::duplicate(duplicate_of);
            }
        }
        tracing::error!("Database query error: {}", err);
        Self::db_query()
    }
}

impl ApiError {
    /// [`from_db`](Self::from_db) for errors surfaced through a transaction
    pub fn from_transaction(err: crate::database::TransactionError, duplicate_of: impl fmt::Display) -> Self {
        match err {
            crate::database::TransactionError::Sqlx(e) => Self::from_db(&e, duplicate_of),
            other => other.into(),
        }
    }
}

/// Highest severity among `errors`, if any
pub fn worst(errors: &[ApiError]) -> Option<ErrorKind> {
    errors.iter().map(ApiError::kind).max()
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        // Don't expose internal SQL errors to clients
        tracing::error!("SQLx error: {}", err);
        ApiError::db_query()
    }
}

impl From<crate::database::TransactionError> for ApiError {
    fn from(err: crate::database::TransactionError) -> Self {
        tracing::error!("Transaction error: {}", err);
        ApiError::db_query()
    }
}

impl From<crate::params::ScanError> for ApiError {
    fn from(err: crate::params::ScanError) -> Self {
        ApiError::invalid_data(err.to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl Serialize for ApiError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.message)
    }
}
