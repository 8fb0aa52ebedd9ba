use sqlx::postgres::{PgArguments, PgQueryResult, PgRow, PgStatement};
use sqlx::query::Query;
use sqlx::{Executor, PgPool, Postgres};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

const INCOMPLETE: &str = "transaction did not complete properly";

static KEY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction has not been started")]
    NotStarted,

    #[error("invalid key")]
    InvalidKey,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Capability to finalize a transaction. Only [`Transaction::start`] creates one.
#[derive(Debug, PartialEq, Eq)]
pub struct CommitKey {
    id: u64,
}

/// What the caller of [`Transaction::start`] may do with the transaction
#[derive(Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The caller opened the transaction and must commit or roll it back
    Owner(CommitKey),
    /// Someone else owns it; commit and rollback are no-ops
    Joined,
}

impl Ownership {
    pub fn is_owner(&self) -> bool {
        matches!(self, Ownership::Owner(_))
    }
}

/// Key bookkeeping for one transaction
#[derive(Debug, Default)]
struct Lease {
    held: Option<u64>,
}

impl Lease {
    fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Issue a fresh key, or `None` when one is already out
    fn acquire(&mut self) -> Option<CommitKey> {
        if self.held.is_some() {
            return None;
        }
        let id = next_key_id();
        self.held = Some(id);
        Some(CommitKey { id })
    }

    /// Check a key against the held one without releasing it
    fn verify(&self, key: &CommitKey) -> Result<(), TransactionError> {
        match self.held {
            None => Err(TransactionError::NotStarted),
            Some(id) if id == key.id => Ok(()),
            Some(_) => Err(TransactionError::InvalidKey),
        }
    }

    fn release(&mut self) {
        self.held = None;
    }
}

/// Time-derived, process-unique, never zero
fn next_key_id() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seq = KEY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (nanos.wrapping_add(seq) << 1) | 1
}

/// Work deferred until the owner commits
type CommitHook = Box<dyn FnOnce() + Send>;

struct State {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    lease: Lease,
    last_error: Option<String>,
    on_commit: Vec<CommitHook>,
}

/// A database transaction shared by every handler taking part in one request.
///
/// Cloning the handle shares the same underlying transaction. The first caller of
/// [`start`](Self::start) owns it; nested callers join and their commit or rollback
/// calls do nothing, so a composite operation commits or aborts as a whole.
#[derive(Clone)]
pub struct Transaction {
    pool: PgPool,
    state: Arc<Mutex<State>>,
}

impl Transaction {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            state: Arc::new(Mutex::new(State {
                tx: None,
                lease: Lease::default(),
                last_error: None,
                on_commit: Vec::new(),
            })),
        }
    }

    /// Begin, or join when already begun
    pub async fn start(&self) -> Result<Ownership, TransactionError> {
        let mut state = self.state.lock().await;
        state.last_error = Some(INCOMPLETE.to_string());

        if state.lease.is_held() {
            debug!("Reusing transaction");
            return Ok(Ownership::Joined);
        }

        debug!("Creating new transaction");
        let tx = self.pool.begin().await.map_err(|e| {
            state.last_error = Some(e.to_string());
            TransactionError::from(e)
        })?;
        state.tx = Some(tx);
        state.on_commit.clear();
        Ok(state
            .lease
            .acquire()
            .map(Ownership::Owner)
            .unwrap_or(Ownership::Joined))
    }

    pub async fn commit(&self, ownership: Ownership) -> Result<(), TransactionError> {
        let key = match ownership {
            Ownership::Joined => {
                self.state.lock().await.last_error = None;
                return Ok(());
            }
            Ownership::Owner(key) => key,
        };

        let mut state = self.state.lock().await;
        if let Err(e) = state.lease.verify(&key) {
            state.last_error = Some(e.to_string());
            return Err(e);
        }
        state.lease.release();
        let tx = state.tx.take().ok_or(TransactionError::NotStarted)?;
        let hooks = std::mem::take(&mut state.on_commit);
        match tx.commit().await {
            Ok(()) => {
                state.last_error = None;
                drop(state);
                for hook in hooks {
                    hook();
                }
                Ok(())
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    pub async fn rollback(&self, ownership: Ownership) -> Result<(), TransactionError> {
        let key = match ownership {
            Ownership::Joined => return Ok(()),
            Ownership::Owner(key) => key,
        };

        let mut state = self.state.lock().await;
        if let Err(e) = state.lease.verify(&key) {
            state.last_error = Some(e.to_string());
            return Err(e);
        }
        state.lease.release();
        state.on_commit.clear();
        let tx = state.tx.take().ok_or(TransactionError::NotStarted)?;
        tx.rollback().await.map_err(TransactionError::from)
    }

    /// Run `hook` after the owner commits successfully. Discarded on rollback or a
    /// failed commit; a joined commit leaves it queued for the owner.
    pub async fn on_commit(&self, hook: impl FnOnce() + Send + 'static) {
        self.state.lock().await.on_commit.push(Box::new(hook));
    }

    pub async fn is_started(&self) -> bool {
        self.state.lock().await.lease.is_held()
    }

    /// True once the work has been committed (or joined cleanly) with no error reported since
    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.last_error.is_none()
    }

    /// Mark the transaction as incomplete again
    pub async fn resume(&self) {
        self.state.lock().await.last_error = Some(INCOMPLETE.to_string());
    }

    /// Record an error against the transaction
    pub async fn report(&self, message: impl Into<String>) {
        self.state.lock().await.last_error = Some(message.into());
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    pub async fn execute<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<PgQueryResult, TransactionError> {
        let mut state = self.state.lock().await;
        let State { tx, last_error, .. } = &mut *state;
        let tx = tx.as_mut().ok_or(TransactionError::NotStarted)?;
        record(last_error, query.execute(&mut **tx).await)
    }

    pub async fn fetch_all<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<Vec<PgRow>, TransactionError> {
        let mut state = self.state.lock().await;
        let State { tx, last_error, .. } = &mut *state;
        let tx = tx.as_mut().ok_or(TransactionError::NotStarted)?;
        record(last_error, query.fetch_all(&mut **tx).await)
    }

    pub async fn fetch_optional<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<Option<PgRow>, TransactionError> {
        let mut state = self.state.lock().await;
        let State { tx, last_error, .. } = &mut *state;
        let tx = tx.as_mut().ok_or(TransactionError::NotStarted)?;
        record(last_error, query.fetch_optional(&mut **tx).await)
    }

    pub async fn fetch_one<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<PgRow, TransactionError> {
        let mut state = self.state.lock().await;
        let State { tx, last_error, .. } = &mut *state;
        let tx = tx.as_mut().ok_or(TransactionError::NotStarted)?;
        record(last_error, query.fetch_one(&mut **tx).await)
    }

    pub async fn prepare(&self, sql: &str) -> Result<PgStatement<'static>, TransactionError> {
        let mut state = self.state.lock().await;
        let State { tx, last_error, .. } = &mut *state;
        let tx = tx.as_mut().ok_or(TransactionError::NotStarted)?;
        let prepared = record(last_error, (&mut **tx).prepare(sql).await)?;
        Ok(sqlx::Statement::to_owned(&prepared))
    }

    pub async fn savepoint(&self, name: &str) -> Result<(), TransactionError> {
        let sql = format!("SAVEPOINT {}", savepoint_name(name));
        self.execute(sqlx::query(&sql)).await.map(|_| ())
    }

    pub async fn rollback_to_savepoint(&self, name: &str) -> Result<(), TransactionError> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", savepoint_name(name));
        self.execute(sqlx::query(&sql)).await.map(|_| ())
    }
}

fn record<T>(
    last_error: &mut Option<String>,
    result: Result<T, sqlx::Error>,
) -> Result<T, TransactionError> {
    result.map_err(|e| {
        *last_error = Some(e.to_string());
        e.into()
    })
}

/// Replace anything outside `[A-Za-z0-9_]` so the name is a bare identifier
fn savepoint_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
