mod appointments;
mod bootstrap;
mod health;
mod twiml;
mod voice;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use frontdesk_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use frontdesk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    bootstrap::spawn_session_sweeper(
        Arc::clone(&app.session_store),
        Duration::from_secs(app.config.server.session_idle_timeout_secs),
    );

    let router = voice::router(voice::VoiceState {
        orchestrator: Arc::clone(&app.orchestrator),
        practice_name: app.config.practice.name.clone(),
    })
    .merge(appointments::router(appointments::AppointmentsState {
        db_pool: app.db_pool.clone(),
        calendar: Arc::clone(&app.calendar),
        sms: Arc::clone(&app.sms),
        practice_name: app.config.practice.name.clone(),
        time_zone: app.config.practice.time_zone.clone(),
    }))
    .merge(health::router(health::HealthState {
        db_pool: app.db_pool.clone(),
        started_at: app.started_at,
    }));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "frontdesk-server listening for voice webhooks"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "frontdesk-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
