//! # Ambassador Service
//!
//! Runs the MQTT ambassador on its own and exposes its health, its metrics
//! and a publish endpoint over HTTP.

use anyhow::Result;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

use lib_common::MqttAmbassador;
use lib_common::loggers::init_tracing;

mod relay_logic;
use relay_logic::ambassador_routes;
use relay_logic::config::{self, AmbassadorConfig};
use relay_logic::shutdown::shutdown_signal;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config: AmbassadorConfig = config::load_config();
    let level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = init_tracing("ambassador_service", config.log_dir.as_deref(), &level)?;

    let settings = config.ambassador_settings();
    tracing::info!(broker = %settings.broker_label(), client_id = %settings.client_id, "starting ambassador");
    let ambassador = MqttAmbassador::mqtt(&settings);

    // Connecting happens in the background so the health endpoint is up first.
    let shutdown = CancellationToken::new();
    let supervisor = ambassador.supervise(shutdown.clone());

    let app = ambassador_routes::router(ambassador.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port.unwrap_or(8080)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ambassador service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = supervisor.await {
        tracing::warn!(error = %e, "supervisor task ended abnormally");
    }
    ambassador.disconnect().await;
    tracing::info!("Shutdown complete.");
    Ok(())
}
