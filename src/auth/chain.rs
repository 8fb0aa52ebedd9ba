use axum::http::HeaderMap;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::accessor::{Accessor, AccessorKind};
use super::cache::AccessorResolver;
use super::dn::certificate_dn;
use super::token::{TokenOutcome, TokenValidator};

/// Privilege an operation requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRole {
    Public,
    Read,
    Write,
}

impl AccessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRole::Public => "public",
            AccessRole::Read => "read",
            AccessRole::Write => "write",
        }
    }

    /// Read is met by any active accessor; write also needs the write flag
    pub fn permits(&self, accessor: &Accessor) -> bool {
        match self {
            AccessRole::Public => true,
            AccessRole::Read => accessor.active,
            AccessRole::Write => accessor.active && accessor.write,
        }
    }
}

impl fmt::Display for AccessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request was let in. Reported in logs only, never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AccessLevel {
    Denied,
    Public,
    DnRole,
    IpRole,
    JwtRole,
    DnWhitelist,
    IpWhitelist,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Denied => "denied",
            AccessLevel::Public => "public",
            AccessLevel::DnRole => "dn_role",
            AccessLevel::IpRole => "ip_role",
            AccessLevel::JwtRole => "jwt_role",
            AccessLevel::DnWhitelist => "dn_whitelist",
            AccessLevel::IpWhitelist => "ip_whitelist",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running the chain for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub level: AccessLevel,
    pub message: String,
    /// Identity the request was resolved to, when there is one
    pub subject: Option<String>,
}

impl Decision {
    fn new(level: AccessLevel, message: impl Into<String>, subject: Option<String>) -> Self {
        Self {
            level,
            message: message.into(),
            subject,
        }
    }

    fn denied(message: impl Into<String>) -> Self {
        Self::new(AccessLevel::Denied, message, None)
    }

    pub fn is_denied(&self) -> bool {
        self.level == AccessLevel::Denied
    }
}

/// What the chain needs to know about a request
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub headers: &'a HeaderMap,
    /// DER encoded peer certificates from the TLS handshake
    pub certificates: &'a [Vec<u8>],
    pub client_ip: Option<IpAddr>,
}

/// Decides whether a request may run: token, then certificates, then address.
#[derive(Clone)]
pub struct AuthorizationChain {
    resolver: AccessorResolver,
    tokens: Arc<dyn TokenValidator>,
}

impl AuthorizationChain {
    pub fn new(resolver: AccessorResolver, tokens: Arc<dyn TokenValidator>) -> Self {
        Self { resolver, tokens }
    }

    pub fn resolver(&self) -> &AccessorResolver {
        &self.resolver
    }

    pub async fn authorize(&self, role: AccessRole, credentials: Credentials<'_>) -> Decision {
        if role == AccessRole::Public {
            return Decision::new(AccessLevel::Public, "public role authorized", None);
        }
        let caller = credentials.client_ip;

        // A presented token decides on its own, whatever else the caller sent
        match self.tokens.validate(credentials.headers) {
            TokenOutcome::Missing => {}
            TokenOutcome::Invalid(reason) => {
                return Decision::denied(format!("invalid token: {}", reason));
            }
            TokenOutcome::Valid { subject } => {
                return match self.resolver.resolve(&subject, caller).await {
                    Some(acc) if acc.kind == AccessorKind::JwtRole && role.permits(&acc) => Decision::new(
                        AccessLevel::JwtRole,
                        format!("token matches authorized role {} subject {}", role, subject),
                        Some(acc.username.unwrap_or(subject)),
                    ),
                    _ => Decision::denied(format!("token subject {} not authorized for role {}", subject, role)),
                };
            }
        }

        for der in credentials.certificates {
            let dn = match certificate_dn(der) {
                Ok(dn) => dn,
                Err(e) => {
                    warn!("Ignoring peer certificate: {}", e);
                    continue;
                }
            };
            let Some(acc) = self.resolver.resolve(&dn, caller).await else {
                continue;
            };
            match acc.kind {
                AccessorKind::DnRole if role.permits(&acc) => {
                    return Decision::new(
                        AccessLevel::DnRole,
                        format!("cert matches authorized role {} DN {}", role, dn),
                        Some(dn),
                    );
                }
                AccessorKind::DnWhitelist => {
                    return Decision::new(
                        AccessLevel::DnWhitelist,
                        format!("cert matches whitelisted DN {}", dn),
                        Some(dn),
                    );
                }
                _ => debug!("DN {} found but not authorized for role {}", dn, role),
            }
        }

        if let Some(ip) = caller {
            let address = ip.to_string();
            if let Some(acc) = self.resolver.resolve(&address, caller).await {
                match acc.kind {
                    AccessorKind::IpRole if role.permits(&acc) => {
                        return Decision::new(
                            AccessLevel::IpRole,
                            format!("ignoring DN of authorized IP {} with role {}", address, role),
                            Some(address),
                        );
                    }
                    AccessorKind::IpWhitelist => {
                        return Decision::new(
                            AccessLevel::IpWhitelist,
                            format!("ignoring DN of whitelisted IP {}", address),
                            Some(address),
                        );
                    }
                    _ => debug!("IP {} found but not authorized for role {}", address, role),
                }
            }
        }

        Decision::denied("unable to authorize access")
    }
}
