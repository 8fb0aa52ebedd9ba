use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::config::IssuerConfig;

/// Result of looking for a bearer token on a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    /// No bearer token was sent
    Missing,
    /// A token was sent but did not validate
    Invalid(String),
    Valid { subject: String },
}

/// Validates bearer tokens against the trusted issuer set
pub trait TokenValidator: Send + Sync {
    fn validate(&self, headers: &HeaderMap) -> TokenOutcome;
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("unsupported algorithm {0}")]
    Algorithm(String),

    #[error("unable to read key for issuer {issuer}: {source}")]
    KeyFile {
        issuer: String,
        source: std::io::Error,
    },

    #[error("invalid key for issuer {issuer}: {source}")]
    Key {
        issuer: String,
        source: jsonwebtoken::errors::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

struct TrustedIssuer {
    issuer: String,
    key: DecodingKey,
    validation: Validation,
}

/// Accepts JWTs signed by any configured issuer
pub struct JwtValidator {
    issuers: Vec<TrustedIssuer>,
}

impl JwtValidator {
    pub fn new(issuers: &[IssuerConfig]) -> Result<Self, TokenError> {
        let issuers = issuers
            .iter()
            .map(TrustedIssuer::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { issuers })
    }

    fn validate_token(&self, token: &str) -> Result<String, String> {
        if self.issuers.is_empty() {
            return Err("no trusted token issuers configured".to_string());
        }
        let header = decode_header(token).map_err(|e| format!("Invalid JWT token: {}", e))?;

        let mut last_error = format!("no trusted issuer accepts algorithm {:?}", header.alg);
        for issuer in self.issuers.iter().filter(|i| i.validation.algorithms.contains(&header.alg)) {
            match decode::<Claims>(token, &issuer.key, &issuer.validation) {
                Ok(data) => return Ok(data.claims.sub),
                Err(e) => last_error = format!("Invalid JWT token for {}: {}", issuer.issuer, e),
            }
        }
        Err(last_error)
    }
}

impl TrustedIssuer {
    fn from_config(config: &IssuerConfig) -> Result<Self, TokenError> {
        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|_| TokenError::Algorithm(config.algorithm.clone()))?;

        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                DecodingKey::from_secret(config.key.as_bytes())
            }
            _ => {
                let pem = std::fs::read(&config.key).map_err(|source| TokenError::KeyFile {
                    issuer: config.issuer.clone(),
                    source,
                })?;
                let parsed = match algorithm {
                    Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&pem),
                    Algorithm::EdDSA => DecodingKey::from_ed_pem(&pem),
                    _ => DecodingKey::from_rsa_pem(&pem),
                };
                parsed.map_err(|source| TokenError::Key {
                    issuer: config.issuer.clone(),
                    source,
                })?
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            issuer: config.issuer.clone(),
            key,
            validation,
        })
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, headers: &HeaderMap) -> TokenOutcome {
        let token = match bearer_token(headers) {
            Ok(Some(token)) => token,
            Ok(None) => return TokenOutcome::Missing,
            Err(msg) => return TokenOutcome::Invalid(msg),
        };
        match self.validate_token(token) {
            Ok(subject) => TokenOutcome::Valid { subject },
            Err(msg) => TokenOutcome::Invalid(msg),
        }
    }
}

/// Extract the bearer token. Other schemes, or no header at all, count as no token.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, String> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    match value.strip_prefix("Bearer ") {
        Some(token) if token.trim().is_empty() => Err("Empty JWT token".to_string()),
        Some(token) => Ok(Some(token.trim())),
        None => Ok(None),
    }
}
