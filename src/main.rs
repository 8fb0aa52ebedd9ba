use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ferry_api_rust::api::{router, AppState};
use ferry_api_rust::auth::{AccessorResolver, AuthorizationChain, JwtValidator, PgAccessorStore};
use ferry_api_rust::config::{AppConfig, LogConfig, LogFormat};
use ferry_api_rust::database::DatabaseManager;
use ferry_api_rust::handlers;
use ferry_api_rust::server;
use ferry_api_rust::tls::{ClientAuth, ClientTlsNegotiator, TlsPolicy};

#[derive(Parser)]
#[command(name = "ferry-api")]
#[command(about = "Ferry identity API server")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = ".", help = "Directory holding configuration files")]
    config_dir: PathBuf,

    #[arg(long, help = "Configuration file, relative to --config-dir (FERRY_CONFIG, else default.yaml if present)")]
    config_file: Option<PathBuf>,

    #[arg(long, help = "Print the effective configuration, secrets masked, and exit")]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let file = match cli.config_file.clone().or_else(|| std::env::var_os("FERRY_CONFIG").map(PathBuf::from)) {
        Some(name) => Some(cli.config_dir.join(name)),
        None => Some(cli.config_dir.join("default.yaml")).filter(|p| p.exists()),
    };
    let config = AppConfig::load(file.as_deref()).context("failed to load configuration")?;

    if cli.check_config {
        println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        return Ok(());
    }

    init_tracing(&config.log);
    refuse_root()?;
    tracing::info!("Starting Ferry API in {:?} mode", config.environment);

    let db = DatabaseManager::connect(&config.database)
        .await
        .context("failed to connect to the database")?;

    let store = Arc::new(PgAccessorStore::new(db.pool().clone()));
    let resolver = AccessorResolver::from_config(store, &config.accessors);
    let tokens = JwtValidator::new(&config.auth.issuers).context("invalid token issuer configuration")?;
    let chain = AuthorizationChain::new(resolver.clone(), Arc::new(tokens));

    let base_auth = if config.server.require_client_certificate {
        ClientAuth::Required
    } else {
        ClientAuth::Optional
    };
    let policy = TlsPolicy::new(&config.server).context("failed to load TLS material")?;
    let negotiator = ClientTlsNegotiator::new(policy, resolver, base_auth).context("invalid TLS configuration")?;

    let state = Arc::new(AppState {
        db: db.clone(),
        chain,
        server_role: config.server.role.clone(),
        reverse_dns: config.server.reverse_dns,
    });
    let app = router(state, handlers::endpoints());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;

    server::serve(listener, negotiator, app, config.server.read_timeout(), shutdown_signal()).await?;

    db.close().await;
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

// The server must not run with root privileges
fn refuse_root() -> anyhow::Result<()> {
    use std::os::unix::fs::MetadataExt;

    let uid = std::fs::metadata("/proc/self")
        .context("failed to determine the process owner")?
        .uid();
    if uid == 0 {
        bail!("refusing to run as root");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
