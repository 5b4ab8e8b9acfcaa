//! # Alert Pipeline
//!
//! The glue between the ambassador, the alert store and the dispatcher:
//! persist every inbound alert, then push it to the live subscribers. Also
//! the read surface the HTTP layer queries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::connections::{AlertFilter, AlertStore, StoreError};
use crate::core::dispatcher::Dispatcher;
use crate::ingestors::handler::{AlertHandler, HandlerError};
use crate::ingestors::mqtt_ambassador::MqttAmbassador;
use crate::ingestors::transport::BrokerError;
use crate::models::alert::{Alert, StoredAlert};

/// Writes every alert to the store.
pub struct PersistHandler {
    store: Arc<dyn AlertStore>,
}

impl PersistHandler {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlertHandler for PersistHandler {
    fn name(&self) -> &str {
        "persist"
    }

    async fn handle(&self, topic: &str, payload: &str, at: DateTime<Utc>) -> Result<(), HandlerError> {
        self.store.insert(topic, payload, at).await?;
        Ok(())
    }
}

/// Pushes every alert to the dispatcher's subscribers.
pub struct BroadcastHandler {
    dispatcher: Arc<Dispatcher>,
}

impl BroadcastHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl AlertHandler for BroadcastHandler {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn handle(&self, topic: &str, payload: &str, at: DateTime<Utc>) -> Result<(), HandlerError> {
        let alert = Alert::from_wire(topic, payload, at);
        let report = self.dispatcher.broadcast(&alert)?;
        tracing::debug!(topic, delivered = report.delivered, pruned = report.pruned, "alert broadcast");
        Ok(())
    }
}

/// Subscribes the ambassador to `topic`, persisting before broadcasting.
pub async fn wire(
    ambassador: &MqttAmbassador,
    topic: &str,
    store: Arc<dyn AlertStore>,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), BrokerError> {
    ambassador.subscribe(topic, Arc::new(PersistHandler::new(store))).await?;
    ambassador.subscribe(topic, Arc::new(BroadcastHandler::new(dispatcher))).await?;
    tracing::info!(topic, "alert pipeline wired");
    Ok(())
}

/// Alerts matching `filter`. No match yields an empty list.
pub async fn list_alerts(store: &dyn AlertStore, filter: &AlertFilter) -> Result<Vec<StoredAlert>, StoreError> {
    store.query_filtered(filter).await
}
