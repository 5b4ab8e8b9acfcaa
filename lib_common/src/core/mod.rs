//! # Core Engine Module
//!
//! The failure-handling and fan-out building blocks of the relay. Everything
//! here is transport-agnostic and synchronous in its state changes, so it can
//! be exercised without a broker, a database or a network.
//!
//! ## Core Components:
//!
//! - **`circuit_breaker`**: the Closed/Open/HalfOpen gate that keeps the
//!   ambassador from retrying a broker known to be down.
//!
//! - **`rate_limiter`**: a one-second sliding admission window shared by the
//!   ambassador's inbound and outbound traffic.
//!
//! - **`registry`**: topic filter → ordered handler lists, consulted for every
//!   inbound message.
//!
//! - **`dispatcher`**: the broadcaster that serializes an alert once and pushes
//!   it to every live dashboard connection, pruning the dead ones.

#![forbid(unsafe_code)]

/// Three-state failure isolation gate.
pub mod circuit_breaker;
/// Sliding one-second admission window.
pub mod rate_limiter;
/// Topic filter to handler mapping.
pub mod registry;
/// Broadcast fan-out to live subscribers.
pub mod dispatcher;

// --- Public API Re-exports ---
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use dispatcher::{BroadcastReport, DeliveryError, Dispatcher, Frame, FrameReceiver, SubscriberId, SUBSCRIBER_QUEUE_CAPACITY};
pub use rate_limiter::RateLimiter;
pub use registry::{topic_matches, HandlerRegistry};
