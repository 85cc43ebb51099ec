mod analyst;
mod app;
mod config;
mod health;
mod platform;
mod processor;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::analyst::AnalystClient;
use crate::app::MessagingApp;
use crate::config::Config;
use crate::platform::telegram::TelegramPlatform;

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,analyst_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Config file if present, environment otherwise
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        info!("No config file found, reading configuration from environment");
        Config::from_env().context("Failed to load config from environment")?
    };

    info!("Configuration loaded successfully");
    info!("  Port: {}", config.server.port);
    info!("  Analyst service: {}", config.analyst.effective_base_url());
    info!("  Request timeout: {}ms", config.analyst.request_timeout_ms);
    info!("  Telegram enabled: {}", config.telegram.enabled);
    if config.telegram.enabled {
        info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);
    }

    let analyst = Arc::new(AnalystClient::new(&config.analyst)?);
    let mut app = MessagingApp::new(analyst);

    if config.telegram.enabled {
        let telegram =
            TelegramPlatform::new(&config.telegram.bot_token, &config.telegram.allowed_user_ids)
                .context("Failed to create Telegram platform")?;
        app.register_platform(Arc::new(telegram))?;
    }

    info!("Bot is starting...");
    if let Err(e) = app.start().await {
        // Release whatever did come up before bailing out
        app.shutdown().await;
        return Err(e);
    }
    info!("Active platforms: {:?}", app.platforms());

    let port = config.server.port;
    let health = tokio::spawn(async move {
        if let Err(e) = health::serve(port).await {
            error!("Health server failed: {:#}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received");

    let drain = Duration::from_secs(config.server.shutdown_timeout_secs);
    if tokio::time::timeout(drain, app.shutdown()).await.is_err() {
        warn!("Platform shutdown did not finish within {:?}", drain);
    }
    health.abort();

    info!("Goodbye");
    Ok(())
}
