#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use ferry_api_rust::api::{router, AppState};
use ferry_api_rust::auth::{
    Accessor, AccessorKind, AccessorResolver, AccessorStore, AuthorizationChain, StoreError, TokenOutcome,
    TokenValidator,
};
use ferry_api_rust::config::DatabaseConfig;
use ferry_api_rust::database::DatabaseManager;
use ferry_api_rust::handlers;

pub const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Token subjects known to every test app
pub const READER: &str = "reader";
pub const WRITER: &str = "writer";

/// Accessors held in memory instead of the database
#[derive(Default)]
pub struct MemoryStore {
    accessors: Mutex<HashMap<String, Accessor>>,
}

impl MemoryStore {
    pub fn with_defaults() -> Self {
        let store = Self::default();
        store.insert(accessor(1, READER, AccessorKind::JwtRole, false));
        store.insert(accessor(2, WRITER, AccessorKind::JwtRole, true));
        store
    }

    pub fn insert(&self, accessor: Accessor) {
        self.accessors.lock().unwrap().insert(accessor.name.clone(), accessor);
    }
}

#[async_trait]
impl AccessorStore for MemoryStore {
    async fn lookup(&self, name: &str) -> Result<Option<Accessor>, StoreError> {
        Ok(self.accessors.lock().unwrap().get(name).filter(|a| a.active).cloned())
    }

    async fn touch(&self, _accid: i64) -> Result<(), StoreError> {
        Ok(())
    }
}

pub fn accessor(accid: i64, name: &str, kind: AccessorKind, write: bool) -> Accessor {
    Accessor {
        accid,
        name: name.to_string(),
        active: true,
        write,
        kind,
        username: None,
    }
}

/// Takes the bearer token itself as the subject; `bad` never validates
pub struct PlainTokens;

impl TokenValidator for PlainTokens {
    fn validate(&self, headers: &HeaderMap) -> TokenOutcome {
        let value = headers.get("authorization").and_then(|v| v.to_str().ok());
        match value.and_then(|v| v.strip_prefix("Bearer ")) {
            None => TokenOutcome::Missing,
            Some("bad") => TokenOutcome::Invalid("signature mismatch".to_string()),
            Some(subject) => TokenOutcome::Valid {
                subject: subject.to_string(),
            },
        }
    }
}

pub fn state_with(db: DatabaseManager, store: Arc<MemoryStore>) -> Arc<AppState> {
    let resolver = AccessorResolver::new(store, Duration::from_secs(60), 100);
    Arc::new(AppState {
        db,
        chain: AuthorizationChain::new(resolver, Arc::new(PlainTokens)),
        server_role: "test".to_string(),
        reverse_dns: false,
    })
}

pub fn app_with(db: DatabaseManager) -> Router {
    router(state_with(db, Arc::new(MemoryStore::with_defaults())), handlers::endpoints())
}

/// Pool pointing at a closed port
pub fn offline_db() -> Result<DatabaseManager> {
    let config = DatabaseConfig {
        url: "postgres://ferry@127.0.0.1:1/ferry".to_string(),
        max_connections: 1,
        min_connections: 0,
        connect_timeout_secs: 1,
        idle_timeout_secs: 60,
    };
    Ok(DatabaseManager::connect_lazy(&config)?)
}

/// App whose database cannot be reached; only paths that never touch it succeed
pub fn offline_app() -> Result<Router> {
    Ok(app_with(offline_db()?))
}

/// Database named by `FERRY_TEST_DATABASE_URL` with the schema applied, or `None`
/// when the variable is unset and database tests should be skipped.
pub async fn test_db() -> Result<Option<DatabaseManager>> {
    let Ok(url) = std::env::var("FERRY_TEST_DATABASE_URL") else {
        eprintln!("FERRY_TEST_DATABASE_URL not set, skipping");
        return Ok(None);
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await?;
    sqlx::Executor::execute(&pool, SCHEMA).await?;
    Ok(Some(DatabaseManager::from_pool(pool)))
}

/// Name unique to this test run
pub fn unique(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}-{}", prefix, nanos, COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Distinct documentation-range address per call
pub fn unique_ip() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seed = nanos.wrapping_add(NEXT.fetch_add(1, Ordering::Relaxed));
    let segments: Vec<String> = (0..4).map(|i| format!("{:x}", (seed >> (i * 16)) & 0xffff)).collect();
    format!("2001:db8::{}", segments.join(":"))
}

pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    pub fn errors(&self) -> Vec<String> {
        self.body["errors"]
            .as_array()
            .map(|a| a.iter().filter_map(|e| e.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

/// Send one request through the router
pub async fn call(app: &Router, uri: &str, token: Option<&str>) -> Result<Reply> {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {}", token));
    }
    send(app, request.body(Body::empty())?).await
}

pub async fn send(app: &Router, request: Request<Body>) -> Result<Reply> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = serde_json::from_slice(&bytes)?;
    Ok(Reply { status, body })
}

/// Percent-encode a query value
pub fn q(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
