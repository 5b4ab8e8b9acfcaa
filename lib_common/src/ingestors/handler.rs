//! # Alert Handlers
//!
//! The per-topic callbacks the ambassador invokes for every admitted inbound
//! message. Each concern (persistence, fan-out, ...) is one implementation of
//! [`AlertHandler`]; the ambassador runs every handler registered for a topic,
//! in registration order, and logs the ones that fail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::connections::StoreError;
use crate::core::dispatcher::DeliveryError;

/// Why a handler could not process a message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The alert store rejected the write.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// The payload could not be turned into the shape the handler needs.
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    /// A downstream subscriber could not be reached.
    #[error("delivery: {0}")]
    Delivery(#[from] DeliveryError),
    /// Anything else, including a handler that panicked.
    #[error("{0}")]
    Other(String),
}

/// # Alert Handler
///
/// One concern applied to every message on the topics it is registered for.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Processes one message. `at` is the ingestion instant.
    async fn handle(&self, topic: &str, payload: &str, at: DateTime<Utc>) -> Result<(), HandlerError>;
}
