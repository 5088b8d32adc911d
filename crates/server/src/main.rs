//! Vault server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vault_core::config::AppConfig;
use vault_server::{AppState, create_router};

/// Vault - a content-addressable file storage service
#[derive(Parser, Debug)]
#[command(name = "vaultd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "VAULT_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Merge the config file (if present) with `VAULT_*` environment variables.
fn load_config(config_path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = std::path::Path::new(config_path).exists();

    if has_config_file {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    // VAULT_CONFIG is only the path, not configuration.
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("VAULT_") && key != "VAULT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: vaultd --config /path/to/config.toml\n  \
             2. Environment variables: VAULT_SERVER__BIND=0.0.0.0:8001 \
             VAULT_AUTH__JWT_SECRET=change-me vaultd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set VAULT_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("VAULT_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    Ok(config)
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

    tracing::info!("Vault v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    vault_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = vault_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Catch misconfigured storage before reporting healthy.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    // No uploads are in flight yet, so every staged object is an orphan.
    let swept = storage
        .sweep_staging()
        .await
        .context("failed to clean staging area")?;
    if swept > 0 {
        tracing::warn!(count = swept, "Removed staged uploads left by a previous run");
    }

    let metadata = vault_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    let state = AppState::new(config, storage, metadata);
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind = "127.0.0.1:9100"
max_upload_bytes = 1024

[storage]
type = "filesystem"
path = "/tmp/vault-test-blobs"

[auth]
jwt_secret = "file-secret"
"#
        )
        .unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9100");
        assert_eq!(config.server.max_upload_bytes, 1024);
        assert_eq!(config.auth.jwt_secret, "file-secret");
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
lock_shards = 0

[auth]
jwt_secret = "file-secret"
"#
        )
        .unwrap();

        assert!(load_config(file.path().to_str().unwrap()).is_err());
    }
}
