//! # lib_common
//!
//! Shared library for the ADN alert relay. It carries everything the servers
//! need to move an alert from the broker into storage and out to dashboards:
//!
//! - **`models`**: the `Alert` record and its opportunistically decoded payload.
//! - **`core`**: circuit breaker, rate limiter, handler registry and the
//!   broadcast `Dispatcher`.
//! - **`ingestors`**: the `MqttAmbassador` and the broker transports it drives.
//! - **`connections`**: alert stores (PostgreSQL and in-memory) and the
//!   filtered query builder.
//! - **`loggers`**: tracing setup and the structured event log.
//! - **`configs`**: typed settings consumed by the components above.
//! - **`pipeline`**: the handlers that wire ambassador → store → dispatcher.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

// Declare the modules to re-export
pub mod configs;
pub mod connections;
pub mod core;
pub mod ingestors;
pub mod loggers;
pub mod models;
pub mod pipeline;

// Re-export the types every consumer reaches for
pub use configs::{AmbassadorSettings, StoreSettings};
pub use connections::{AlertFilter, AlertStore, MemoryAlertStore, SortOrder, StoreError};
pub use crate::core::{CircuitBreaker, CircuitState, Dispatcher, RateLimiter};
pub use ingestors::{AlertHandler, BrokerError, HandlerError, MemoryTransport, MetricsSnapshot, MqttAmbassador, QoS};
pub use models::{Alert, AlertPayload, StoredAlert};
