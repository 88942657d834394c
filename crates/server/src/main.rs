mod bootstrap;
mod health;
mod webhook;

use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tutorbot_core::config::{AppConfig, LoadOptions, LogFormat};

use crate::bootstrap::Application;
use crate::health::HealthState;
use crate::webhook::{InFlight, WebhookState};

fn init_logging(config: &AppConfig) {
    // RUST_LOG, when set, takes precedence over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
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
    let in_flight = InFlight::default();
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "tutorbot-server listening"
    );
    axum::serve(listener, app_router(&app, in_flight.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        in_flight = in_flight.count(),
        "draining in-flight messages"
    );
    if !in_flight.drain(grace).await {
        warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            abandoned = in_flight.count(),
            "grace period elapsed with messages still in flight"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

fn app_router(app: &Application, in_flight: InFlight) -> Router {
    Router::new()
        .merge(health::router(HealthState::new(
            app.db_pool.clone(),
            app.calendar.clone(),
            in_flight.clone(),
        )))
        .merge(webhook::router(WebhookState::new(app.pipeline.clone(), in_flight)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(signal_error) = tokio::signal::ctrl_c().await {
            error!(
                event_name = "system.server.signal_error",
                error = %signal_error,
                "failed to listen for ctrl-c"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(signal_error) => {
                error!(
                    event_name = "system.server.signal_error",
                    error = %signal_error,
                    "failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
