mod bootstrap;
mod chat;
mod health;
mod trace;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use supportline_core::config::{AppConfig, LoadOptions};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use supportline_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let chat_state = chat::ChatState::new(
        app.runtime.orchestrator(),
        app.runtime.capabilities(),
        chat::PublicConfig::from_config(&app.config),
    );
    let health_state = health::HealthState::new(app.runtime.transport());
    let router = Router::new().merge(chat::router(chat_state)).merge(health::router(health_state));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener =
        TcpListener::bind(&address).await.with_context(|| format!("failed to bind {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        address = %address,
        "supportline-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "supportline-server stopping"
    );

    if let Some(worker) = app.trace_worker {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        drop(app.runtime);
        if tokio::time::timeout(grace, worker).await.is_err() {
            tracing::warn!(
                event_name = "trace.flush_timeout",
                correlation_id = "shutdown",
                "trace exporter did not drain before shutdown"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for shutdown signal");
    }
}
