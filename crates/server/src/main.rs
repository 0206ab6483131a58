//! quay server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use quay_core::config::AppConfig;
use quay_server::sweep::spawn_session_sweeper;
use quay_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// quay - static site upload and proxy server
#[derive(Parser, Debug)]
#[command(name = "quayd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "QUAY_CONFIG", default_value = "config/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("quay v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    let warnings = config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    for warning in warnings {
        tracing::warn!("{warning}");
    }

    quay_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = quay_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Blob store ready");

    let registry = quay_registry::from_config(&config.registry, config.upload.session_store)
        .await
        .context("failed to initialize registry")?;
    tracing::info!("Site registry initialized");

    let state = AppState::new(config.clone(), storage, registry);

    let sweep_interval = config.upload.sweep_interval();
    spawn_session_sweeper(state.uploads.clone(), sweep_interval);
    tracing::info!(
        interval_secs = sweep_interval.as_secs(),
        ttl_secs = config.upload.session_ttl_secs,
        "Upload session sweeper spawned"
    );

    let app = create_router(state);
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Merge the config file (optional) with `QUAY_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("QUAY_") && key != "QUAY_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: quayd --config /path/to/config.toml\n  \
             2. Environment variables: QUAY_SERVER__BIND=0.0.0.0:8080 \
             QUAY_STORAGE__TYPE=filesystem QUAY_STORAGE__PATH=/var/lib/quay quayd\n\n\
             See config/server.example.toml for example configuration."
        );
    }

    figment
        .merge(Env::prefixed("QUAY_").split("__"))
        .extract()
        .context("failed to load configuration")
}
