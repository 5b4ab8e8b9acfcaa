//! # Broker Transport
//!
//! The seam between the ambassador and the physical broker connection. The
//! ambassador owns all resilience policy (circuit breaker, rate limiting,
//! metrics, telemetry); a transport only moves bytes.
//!
//! A successful [`BrokerTransport::connect`] hands back the receiving half of
//! the connection's event channel. The channel yields every inbound message
//! and ends with at most one [`TransportEvent::Disconnected`] when the
//! connection is lost.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a broker transport.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached or the connection broke mid-handshake.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The broker did not acknowledge the connection in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The broker answered the handshake with a non-zero return code.
    #[error("connection refused by broker (code {code})")]
    Refused {
        /// The CONNACK return code.
        code: u8,
    },
    /// The publish request could not be queued.
    #[error("publish failed: {0}")]
    Publish(String),
    /// The subscribe request could not be queued.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    /// The operation needs a live connection.
    #[error("not connected")]
    NotConnected,
}

/// MQTT delivery guarantee. Passed through to the broker unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Assured single delivery.
    ExactlyOnce,
}

impl QoS {
    /// The numeric level used on the wire.
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("invalid QoS level {other}")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Delivery guarantee the message arrived with.
    pub qos: QoS,
    /// Whether the broker delivered a retained message.
    pub retain: bool,
}

/// Something that happened on an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message arrived.
    Message(InboundMessage),
    /// The connection ended. The string says why.
    Disconnected(String),
}

/// Receiving half of a connection's event channel.
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Capacity of the per-connection event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// # Broker Transport
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Establishes a new connection, replacing any previous one.
    ///
    /// Resolves once the broker has accepted the session, and re-issues the
    /// subscriptions recorded so far.
    async fn connect(&self) -> Result<EventReceiver, BrokerError>;

    /// Sends one message and returns the transport's acknowledgement id.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<u64, BrokerError>;

    /// Records `filter` and subscribes to it when connected.
    ///
    /// Recorded filters are re-subscribed after every later connect.
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError>;

    /// Closes the connection. Closing an already closed transport is a no-op.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_levels_round_trip_through_serde() {
        assert_eq!(serde_json::to_string(&QoS::AtLeastOnce).unwrap(), "1");
        assert_eq!(serde_json::from_str::<QoS>("2").unwrap(), QoS::ExactlyOnce);
        assert!(serde_json::from_str::<QoS>("3").is_err());
        assert_eq!(QoS::default().to_string(), "0");
    }

    #[test]
    fn refused_error_names_the_code() {
        let e = BrokerError::Refused { code: 5 };
        assert_eq!(e.to_string(), "connection refused by broker (code 5)");
    }
}
