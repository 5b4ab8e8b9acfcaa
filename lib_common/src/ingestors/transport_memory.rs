//! # In-Memory Broker Transport
//!
//! A loopback broker living inside the process. Published messages are
//! delivered back to the current connection when one of the recorded
//! subscriptions matches. Tests and standalone runs use it in place of a real
//! broker, and can flip reachability or drop the connection to exercise the
//! ambassador's failure paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{
    BrokerError, BrokerTransport, EventReceiver, InboundMessage, QoS, TransportEvent, EVENT_CHANNEL_CAPACITY,
};
use crate::core::registry::topic_matches;

struct MemoryState {
    reachable: bool,
    connection: Option<mpsc::Sender<TransportEvent>>,
    filters: Vec<(String, QoS)>,
    published: Vec<InboundMessage>,
    connects: u32,
}

/// # Memory Transport
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    next_ack: AtomicU64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A reachable broker with no subscriptions.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                reachable: true,
                connection: None,
                filters: Vec::new(),
                published: Vec::new(),
                connects: 0,
            }),
            next_ack: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes later connect attempts succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.lock().connection.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    /// Recorded subscription filters, in subscription order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().filters.iter().map(|(f, _)| f.clone()).collect()
    }

    /// Every message published through this transport.
    pub fn published(&self) -> Vec<InboundMessage> {
        self.lock().published.clone()
    }

    /// Delivers a message as if a third party had published it on the broker.
    ///
    /// Returns `false` when there is no connection or no matching subscription.
    pub async fn inject(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        let message = InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        };
        self.route(message).await
    }

    /// Simulates the broker closing the connection.
    pub async fn drop_connection(&self, reason: &str) {
        let tx = self.lock().connection.take();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Disconnected(reason.to_string())).await;
        }
    }

    async fn route(&self, message: InboundMessage) -> bool {
        let tx = {
            let state = self.lock();
            let subscribed = state.filters.iter().any(|(f, _)| topic_matches(f, &message.topic));
            match (&state.connection, subscribed) {
                (Some(tx), true) => tx.clone(),
                _ => return false,
            }
        };
        tx.send(TransportEvent::Message(message)).await.is_ok()
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn connect(&self) -> Result<EventReceiver, BrokerError> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(BrokerError::Connection("broker unreachable".to_string()));
        }
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        state.connection = Some(tx);
        state.connects += 1;
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<u64, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let message = InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        };
        self.lock().published.push(message.clone());
        self.route(message).await;
        Ok(self.next_ack.fetch_add(1, Ordering::Relaxed))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if !state.filters.iter().any(|(f, _)| f == filter) {
            state.filters.push((filter.to_string(), qos));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.lock().connection = None;
        Ok(())
    }
}
