//! # Relay Backend
//!
//! Subscribes to the alert topic through the MQTT ambassador, stores every
//! alert, pushes it to the connected dashboards over `/ws` and serves the
//! filtered alert queries over HTTP.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use lib_common::connections::PostgresAlertStore;
use lib_common::core::Dispatcher;
use lib_common::loggers::init_tracing;
use lib_common::{AlertStore, MemoryAlertStore, MemoryTransport, MqttAmbassador, pipeline};

mod relay_logic;
use relay_logic::config::{self, RelayConfig};
use relay_logic::shutdown::shutdown_signal;
use relay_logic::{routes, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config: RelayConfig = config::load_config();
    let level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = init_tracing("relay_backend", config.log_dir.as_deref(), &level)?;

    // A missing database is fatal: nothing is served without storage.
    let store: Arc<dyn AlertStore> = if config.memory_store.unwrap_or(false) {
        tracing::warn!("alerts are kept in memory only");
        Arc::new(MemoryAlertStore::new())
    } else {
        Arc::new(PostgresAlertStore::connect(&config.store_settings()).await?)
    };

    let settings = config.ambassador_settings();
    let ambassador = if config.memory_broker.unwrap_or(false) {
        tracing::warn!("using the in-process loopback broker");
        MqttAmbassador::new(&settings, Arc::new(MemoryTransport::new()))
    } else {
        MqttAmbassador::mqtt(&settings)
    };

    let dispatcher = Arc::new(Dispatcher::new());
    let topic = config.topic();
    pipeline::wire(&ambassador, &topic, Arc::clone(&store), Arc::clone(&dispatcher)).await?;

    let shutdown = CancellationToken::new();
    let supervisor = ambassador.supervise(shutdown.clone());

    let app = routes::router(AppState {
        store: Arc::clone(&store),
        dispatcher,
        instance: config.instance_name(),
        backend_name: config.backend_name.clone(),
        shutdown: shutdown.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port.unwrap_or(8000)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %topic, "relay backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = supervisor.await {
        tracing::warn!(error = %e, "supervisor task ended abnormally");
    }
    ambassador.disconnect().await;
    store.close().await;

    tracing::info!("Shutdown complete.");
    Ok(())
}
