pub mod accessor;
pub mod cache;
pub mod chain;
pub mod dn;
pub mod token;

pub use accessor::{Accessor, AccessorKind, AccessorStore, PgAccessorStore, StoreError};
pub use cache::AccessorResolver;
pub use chain::{AccessLevel, AccessRole, AuthorizationChain, Credentials, Decision};
pub use dn::{certificate_dn, format_dn};
pub use token::{JwtValidator, TokenError, TokenOutcome, TokenValidator};
