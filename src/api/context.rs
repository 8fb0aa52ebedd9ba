use std::net::IpAddr;
use std::sync::Arc;

use crate::auth::{AccessRole, AuthorizationChain, Decision};
use crate::database::{DatabaseManager, Transaction};

/// Long-lived services shared by every request
pub struct AppState {
    pub db: DatabaseManager,
    pub chain: AuthorizationChain,
    /// Label reported by `ping`
    pub server_role: String,
    pub reverse_dns: bool,
}

/// Everything a handler may use while serving one call
#[derive(Clone)]
pub struct ApiContext {
    pub action: String,
    pub tx: Transaction,
    pub role: AccessRole,
    pub decision: Decision,
    pub client_ip: Option<IpAddr>,
    pub state: Arc<AppState>,
}

impl ApiContext {
    pub fn subject(&self) -> Option<&str> {
        self.decision.subject.as_deref()
    }
}
