pub mod manager;
pub mod transaction;

pub use manager::{DatabaseError, DatabaseManager};
pub use transaction::{CommitKey, Ownership, Transaction, TransactionError};
