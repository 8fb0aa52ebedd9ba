use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::{CipherSuite, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::AccessorResolver;
use crate::config::ServerConfig as ServerSettings;

/// Suites offered to clients; everything else the provider supports is dropped
const ALLOWED_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
];

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    #[error(transparent)]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// Client certificate policy for one handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// Ask for a certificate and verify it if one is sent
    Optional,
    /// Refuse the handshake without a valid certificate
    Required,
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

pub fn load_roots(paths: &[PathBuf]) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for path in paths {
        for cert in load_certs(path)? {
            roots.add(cert)?;
        }
    }
    Ok(roots)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// ring provider restricted to the allowed cipher suites
pub fn provider() -> CryptoProvider {
    let mut provider = ring::default_provider();
    provider
        .cipher_suites
        .retain(|suite| ALLOWED_SUITES.contains(&suite.suite()));
    provider
}

/// Builds server configurations from the settings on disk
#[derive(Clone)]
pub struct TlsPolicy {
    certificate: PathBuf,
    key: PathBuf,
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl TlsPolicy {
    pub fn new(settings: &ServerSettings) -> Result<Self, TlsError> {
        Ok(Self {
            certificate: settings.certificate.clone(),
            key: settings.key.clone(),
            roots: Arc::new(load_roots(&settings.client_ca)?),
            provider: Arc::new(provider()),
        })
    }

    /// Server configuration with the certificate and key read fresh from disk
    pub fn server_config(&self, client_auth: ClientAuth) -> Result<ServerConfig, TlsError> {
        let certs = load_certs(&self.certificate)?;
        let key = load_private_key(&self.key)?;

        let mut config = ServerConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?
            .with_client_cert_verifier(self.verifier(client_auth)?)
            .with_single_cert(certs, key)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }

    fn verifier(&self, client_auth: ClientAuth) -> Result<Arc<dyn ClientCertVerifier>, TlsError> {
        if self.roots.is_empty() {
            debug!("No client CA configured, client certificates will not be requested");
            return Ok(WebPkiClientVerifier::no_client_auth());
        }
        let builder = WebPkiClientVerifier::builder_with_provider(self.roots.clone(), self.provider.clone());
        let verifier = match client_auth {
            ClientAuth::Optional => builder.allow_unauthenticated().build()?,
            ClientAuth::Required => builder.build()?,
        };
        Ok(verifier)
    }
}

/// Chooses the TLS configuration for each incoming handshake.
///
/// Callers whose address is a registered accessor get a configuration that asks for a
/// client certificate without demanding one, built with the server certificate as it
/// is on disk right now. Everyone else gets the static base configuration.
#[derive(Clone)]
pub struct ClientTlsNegotiator {
    policy: TlsPolicy,
    resolver: AccessorResolver,
    base: Arc<ServerConfig>,
}

impl ClientTlsNegotiator {
    pub fn new(policy: TlsPolicy, resolver: AccessorResolver, base_auth: ClientAuth) -> Result<Self, TlsError> {
        let base = Arc::new(policy.server_config(base_auth)?);
        Ok(Self {
            policy,
            resolver,
            base,
        })
    }

    pub fn base(&self) -> Arc<ServerConfig> {
        self.base.clone()
    }

    /// Override for `caller`, or `None` to use the base configuration
    pub async fn policy_for(&self, caller: IpAddr) -> Result<Option<Arc<ServerConfig>>, TlsError> {
        let address = caller.to_string();
        if self.resolver.resolve(&address, Some(caller)).await.is_none() {
            return Ok(None);
        }
        info!("Host {} matches authorized IP", address);
        Ok(Some(Arc::new(self.policy.server_config(ClientAuth::Optional)?)))
    }

    pub async fn select(&self, caller: IpAddr) -> Result<Arc<ServerConfig>, TlsError> {
        Ok(self.policy_for(caller).await?.unwrap_or_else(|| self.base()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::cache::tests::{accessor, CountingStore};
    use crate::auth::AccessorKind;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
    use std::time::Duration;

    /// Throwaway CA and server certificate written as PEM files
    pub(crate) struct TestPki {
        pub dir: PathBuf,
        pub settings: ServerSettings,
    }

    impl TestPki {
        pub fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("ferry-tls-{}-{}", name, std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();

            let ca_key = KeyPair::generate().unwrap();
            let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
            ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            ca_params.distinguished_name.push(DnType::CommonName, "Ferry Test CA");
            let ca = ca_params.self_signed(&ca_key).unwrap();

            let server_key = KeyPair::generate().unwrap();
            let server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
            let server = server_params.signed_by(&server_key, &ca, &ca_key).unwrap();

            std::fs::write(dir.join("ca.pem"), ca.pem()).unwrap();
            std::fs::write(dir.join("server.pem"), server.pem()).unwrap();
            std::fs::write(dir.join("server.key"), server_key.serialize_pem()).unwrap();

            let mut settings = crate::config::AppConfig::preset(crate::config::Environment::Development).server;
            settings.certificate = dir.join("server.pem");
            settings.key = dir.join("server.key");
            settings.client_ca = vec![dir.join("ca.pem")];
            Self { dir, settings }
        }
    }

    impl Drop for TestPki {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn negotiator(pki: &TestPki, store: Arc<CountingStore>) -> ClientTlsNegotiator {
        let resolver = AccessorResolver::new(store, Duration::from_secs(60), 100);
        ClientTlsNegotiator::new(TlsPolicy::new(&pki.settings).unwrap(), resolver, ClientAuth::Required).unwrap()
    }

    #[test]
    fn provider_only_offers_allowed_suites() {
        let provider = provider();
        assert!(!provider.cipher_suites.is_empty());
        for suite in &provider.cipher_suites {
            assert!(ALLOWED_SUITES.contains(&suite.suite()), "{:?}", suite.suite());
        }
    }

    #[test]
    fn builds_configs_for_both_policies() {
        let pki = TestPki::new("build");
        let policy = TlsPolicy::new(&pki.settings).unwrap();
        let config = policy.server_config(ClientAuth::Optional).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
        assert!(policy.server_config(ClientAuth::Required).is_ok());
    }

    #[test]
    fn missing_files_are_reported() {
        let mut settings = crate::config::AppConfig::preset(crate::config::Environment::Development).server;
        settings.client_ca = vec![PathBuf::from("/nonexistent/ca.pem")];
        assert!(matches!(TlsPolicy::new(&settings), Err(TlsError::Io { .. })));
    }

    #[tokio::test]
    async fn registered_address_gets_an_override() {
        let pki = TestPki::new("known");
        let store = Arc::new(CountingStore::with([accessor(1, "127.0.0.1", AccessorKind::IpRole, false)]));
        let negotiator = negotiator(&pki, store);

        let known = negotiator.policy_for("127.0.0.1".parse().unwrap()).await.unwrap();
        assert!(known.is_some());
        let unknown = negotiator.policy_for("127.0.0.2".parse().unwrap()).await.unwrap();
        assert!(unknown.is_none());

        let selected = negotiator.select("127.0.0.2".parse().unwrap()).await.unwrap();
        assert!(Arc::ptr_eq(&selected, &negotiator.base()));
    }

    #[tokio::test]
    async fn override_reloads_certificate_from_disk() {
        let pki = TestPki::new("reload");
        let store = Arc::new(CountingStore::with([accessor(1, "127.0.0.1", AccessorKind::IpRole, false)]));
        let negotiator = negotiator(&pki, store);

        std::fs::remove_file(&pki.settings.certificate).unwrap();
        let result = negotiator.policy_for("127.0.0.1".parse().unwrap()).await;
        assert!(matches!(result, Err(TlsError::Io { .. })));
    }
}
