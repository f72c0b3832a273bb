//! tlogin - game login server
//!
//! Accepts client logins, validates them against the query manager and
//! answers server-list status requests.

use std::sync::Arc;
use tlogin_crypto::RsaDecryptor;
use tlogin_query::QueryClient;
use tlogin_server::{Config, LoginService, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if TLOGIN_CONFIG is set, then env overrides)
    let config_path = std::env::var("TLOGIN_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting tlogin server");
    config.log_summary();

    let key_path = &config.crypto.private_key_path;
    let decryptor = match RsaDecryptor::load(key_path) {
        Ok(decryptor) => Arc::new(decryptor),
        Err(e) => {
            tracing::error!("Failed to load RSA key from {}: {}", key_path.display(), e);
            return Err(e.into());
        }
    };
    tracing::info!("  RSA key: {} ({} bits)", key_path.display(), decryptor.block_size() * 8);

    // The query manager must be reachable at startup.
    let query = Arc::new(QueryClient::new(config.query_config()));
    if let Err(e) = query.connect().await {
        tracing::error!(
            "Failed to connect to query manager at {}:{}: {}",
            config.query.host,
            config.query.port,
            e
        );
        return Err(e.into());
    }
    tracing::info!("Connected to query manager");

    let service = Arc::new(LoginService::from_config(&config, decryptor, query.clone()));
    let server = Arc::new(Server::new(ServerConfig::from_config(&config), service));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    query.disconnect().await;
    tracing::info!("Server stopped");
    Ok(())
}
