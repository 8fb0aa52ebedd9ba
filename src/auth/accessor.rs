use async_trait::async_trait;
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How an accessor identifies its holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorKind {
    /// Bearer token subject, subject to the role check
    JwtRole,
    /// Certificate DN, subject to the role check
    DnRole,
    /// Caller address, subject to the role check
    IpRole,
    /// Certificate DN granted regardless of role
    DnWhitelist,
    /// Caller address granted regardless of role
    IpWhitelist,
}

impl AccessorKind {
    pub const ALL: [AccessorKind; 5] = [
        AccessorKind::JwtRole,
        AccessorKind::DnRole,
        AccessorKind::IpRole,
        AccessorKind::DnWhitelist,
        AccessorKind::IpWhitelist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessorKind::JwtRole => "jwt_role",
            AccessorKind::DnRole => "dn_role",
            AccessorKind::IpRole => "ip_role",
            AccessorKind::DnWhitelist => "dn_whitelist",
            AccessorKind::IpWhitelist => "ip_whitelist",
        }
    }
}

impl fmt::Display for AccessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0} is not an accessor type")]
pub struct UnknownAccessorKind(pub String);

impl FromStr for AccessorKind {
    type Err = UnknownAccessorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownAccessorKind(s.to_string()))
    }
}

/// Snapshot of a row in the `accessors` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accessor {
    pub accid: i64,
    /// Token subject, certificate DN or address
    pub name: String,
    pub active: bool,
    pub write: bool,
    pub kind: AccessorKind,
    /// User the accessor acts for, when mapped
    pub username: Option<String>,
}

impl Accessor {
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("type")?;
        Ok(Self {
            accid: row.try_get("accid")?,
            name: row.try_get("name")?,
            active: row.try_get("active")?,
            write: row.try_get("write")?,
            kind: kind.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "type".to_string(),
                source: Box::new(e),
            })?,
            username: row.try_get("username")?,
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("{0}")]
    Unavailable(String),
}

/// Persistent source of accessors
#[async_trait]
pub trait AccessorStore: Send + Sync {
    /// Active accessor named `name`, if any
    async fn lookup(&self, name: &str) -> Result<Option<Accessor>, StoreError>;

    /// Record that the accessor was just used
    async fn touch(&self, accid: i64) -> Result<(), StoreError>;
}

/// Reads accessors straight from the pool, outside any request transaction
#[derive(Clone)]
pub struct PgAccessorStore {
    pool: PgPool,
}

impl PgAccessorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessorStore for PgAccessorStore {
    async fn lookup(&self, name: &str) -> Result<Option<Accessor>, StoreError> {
        let row = sqlx::query(
            "SELECT accid, name, active, write, type, username FROM accessors WHERE name = $1 AND active = true",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Accessor::from_row).transpose()?)
    }

    async fn touch(&self, accid: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE accessors SET last_used = NOW() WHERE accid = $1")
            .bind(accid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
