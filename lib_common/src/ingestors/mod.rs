//! # Data Ingestors Module
//!
//! Everything that brings alerts into the relay from the message broker.
//!
//! ## Contained Modules:
//! - **`mqtt_ambassador`**: the resilient owner of the broker connection,
//!   gating connects and publishes with a circuit breaker and a rate limiter
//!   and dispatching inbound messages to per-topic handlers.
//! - **`handler`**: the `AlertHandler` trait those per-topic handlers implement.
//! - **`transport`**: the `BrokerTransport` seam the ambassador drives.
//! - **`transport_mqtt`**: the `rumqttc` implementation (feature `mqtt`).
//! - **`transport_memory`**: an in-process loopback broker.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The per-topic handler trait and its error type.
pub mod handler;
/// The circuit-broken, rate-limited broker client.
pub mod mqtt_ambassador;
/// The broker transport seam.
pub mod transport;
/// In-process loopback broker.
pub mod transport_memory;
/// MQTT broker transport over `rumqttc`.
#[cfg(feature = "mqtt")]
pub mod transport_mqtt;

// --- Public API Re-exports ---
pub use handler::{AlertHandler, HandlerError};
pub use mqtt_ambassador::{MetricsSnapshot, MqttAmbassador};
pub use transport::{BrokerError, BrokerTransport, InboundMessage, QoS, TransportEvent};
pub use transport_memory::MemoryTransport;
#[cfg(feature = "mqtt")]
pub use transport_mqtt::MqttTransport;
