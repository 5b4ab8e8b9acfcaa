//! # MQTT Ambassador
//!
//! The sole owner of the broker connection. Every connect and publish passes
//! through the circuit breaker, and every publish and inbound message through
//! the rate limiter. Admitted inbound messages are handed to the handlers
//! registered for their topic.
//!
//! ## Failure policy
//!
//! - Only connect outcomes feed the circuit breaker. A failed publish is
//!   logged and reported as `false` but never opens the circuit.
//! - Inbound and outbound traffic draw from one shared one-second budget.
//! - A handler that fails or panics is logged; the remaining handlers for the
//!   message still run.
//!
//! ## Lifecycle
//!
//! `connect` starts a background inbound loop for the new connection. The
//! loop ends when the connection drops (emitting `mqtt_disconnection`) or
//! when `disconnect` cancels it. `supervise` keeps reconnecting while the
//! ambassador is disconnected, pacing attempts by the reconnect interval and
//! the circuit breaker.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handler::AlertHandler;
use super::transport::{BrokerError, BrokerTransport, EventReceiver, InboundMessage, QoS, TransportEvent};
use crate::configs::AmbassadorSettings;
use crate::core::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::core::rate_limiter::RateLimiter;
use crate::core::registry::HandlerRegistry;
use crate::loggers::eventlog::{EventLog, EventType};

/// Point-in-time view of the ambassador's counters and gates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub active_subscriptions: usize,
}

impl MetricsSnapshot {
    /// Healthy once at least one connection has ever succeeded.
    pub fn is_healthy(&self) -> bool {
        self.successful_connections > 0
    }
}

/// Breaker and limiter share one critical section.
struct Admission {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

#[derive(Default)]
struct Counters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    connection_attempts: AtomicU64,
    successful_connections: AtomicU64,
    // Unix millis, 0 when nothing happened yet.
    last_activity_ms: AtomicI64,
}

struct InboundTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    broker: String,
    reconnect_interval: Duration,
    transport: Arc<dyn BrokerTransport>,
    admission: Mutex<Admission>,
    counters: Counters,
    registry: HandlerRegistry,
    events: EventLog,
    connected: AtomicBool,
    connect_lock: tokio::sync::Mutex<()>,
    inbound: Mutex<Option<InboundTask>>,
}

/// # MQTT Ambassador
///
/// Cheap to clone; clones share the same connection and state.
#[derive(Clone)]
pub struct MqttAmbassador {
    inner: Arc<Inner>,
}

impl MqttAmbassador {
    /// Ambassador over `transport`, logging events where `settings` says.
    pub fn new(settings: &AmbassadorSettings, transport: Arc<dyn BrokerTransport>) -> Self {
        let events = match &settings.event_log_path {
            Some(path) => EventLog::to_file(settings.client_id.clone(), path),
            None => EventLog::tracing_only(settings.client_id.clone()),
        };
        Self::with_event_log(settings, transport, events)
    }

    /// Ambassador with an explicitly built event log.
    pub fn with_event_log(settings: &AmbassadorSettings, transport: Arc<dyn BrokerTransport>, events: EventLog) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker: settings.broker_label(),
                reconnect_interval: settings.reconnect_interval,
                transport,
                admission: Mutex::new(Admission {
                    breaker: CircuitBreaker::new(settings.failure_threshold, settings.open_timeout),
                    limiter: RateLimiter::new(settings.rate_limit),
                }),
                counters: Counters::default(),
                registry: HandlerRegistry::new(),
                events,
                connected: AtomicBool::new(false),
                connect_lock: tokio::sync::Mutex::new(()),
                inbound: Mutex::new(None),
            }),
        }
    }

    /// Ambassador talking to a real MQTT broker.
    #[cfg(feature = "mqtt")]
    pub fn mqtt(settings: &AmbassadorSettings) -> Self {
        let transport = Arc::new(super::transport_mqtt::MqttTransport::new(settings));
        Self::new(settings, transport)
    }

    /// Whether a broker connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Opens the broker connection if the circuit breaker allows an attempt.
    ///
    /// Returns `true` when connected afterwards. Already being connected
    /// counts as success without a new attempt.
    pub async fn connect(&self) -> bool {
        let inner = &self.inner;
        let _serialized = inner.connect_lock.lock().await;
        if inner.connected.load(Ordering::SeqCst) {
            return true;
        }

        if !inner.admission().breaker.allow() {
            tracing::warn!(broker = %inner.broker, "circuit breaker OPEN, connect attempt skipped");
            return false;
        }
        inner.counters.connection_attempts.fetch_add(1, Ordering::Relaxed);

        match inner.transport.connect().await {
            Ok(events) => {
                inner.admission().breaker.record_outcome(true);
                inner.counters.successful_connections.fetch_add(1, Ordering::Relaxed);
                inner.connected.store(true, Ordering::SeqCst);
                inner.touch();
                tracing::info!(broker = %inner.broker, client_id = %inner.events.client_id(), "connected to broker");
                inner.record(
                    EventType::MqttConnection,
                    json!({
                        "status": "connected",
                        "broker": inner.broker,
                        "client_id": inner.events.client_id(),
                        "return_code": 0,
                    }),
                );
                self.start_inbound(events);
                true
            }
            Err(e) => {
                inner.admission().breaker.record_outcome(false);
                let return_code = match &e {
                    BrokerError::Refused { code } => json!(code),
                    _ => serde_json::Value::Null,
                };
                tracing::error!(broker = %inner.broker, error = %e, "broker connection failed");
                inner.record(
                    EventType::MqttConnection,
                    json!({
                        "status": "failed",
                        "broker": inner.broker,
                        "client_id": inner.events.client_id(),
                        "return_code": return_code,
                        "error": e.to_string(),
                    }),
                );
                false
            }
        }
    }

    fn start_inbound(&self, events: EventReceiver) {
        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run_inbound(events, cancel.clone()));
        let previous = self
            .inner
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(InboundTask { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Publishes `payload` on `topic` without the retain flag.
    pub async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> bool {
        self.publish_retained(topic, payload, qos, false).await
    }

    /// Publishes `payload` on `topic`.
    ///
    /// Returns `false`, without touching the broker, when the circuit is open
    /// or the rate budget is spent. Send failures are logged and also yield
    /// `false`; they do not count against the circuit breaker.
    pub async fn publish_retained(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        let inner = &self.inner;
        {
            let mut admission = inner.admission();
            if !admission.breaker.allow() {
                tracing::warn!(topic, "circuit breaker OPEN, publish rejected");
                return false;
            }
            if !admission.limiter.admit() {
                tracing::warn!(topic, limit = admission.limiter.rate_limit(), "rate limit exceeded, publish rejected");
                return false;
            }
        }

        match inner.transport.publish(topic, payload, qos, retain).await {
            Ok(message_id) => {
                inner.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                inner.touch();
                inner.record(
                    EventType::MqttMessageSent,
                    json!({
                        "topic": topic,
                        "payload_size": payload.len(),
                        "qos": qos.level(),
                        "message_id": message_id,
                    }),
                );
                true
            }
            Err(e) => {
                tracing::error!(topic, error = %e, "publish failed");
                false
            }
        }
    }

    /// Registers `handler` for `filter` and subscribes at QoS 0.
    pub async fn subscribe(&self, filter: &str, handler: Arc<dyn AlertHandler>) -> Result<(), BrokerError> {
        self.subscribe_with_qos(filter, QoS::AtMostOnce, handler).await
    }

    /// Registers `handler` for `filter` and asks the broker for the subscription.
    ///
    /// Handlers on the same filter run in registration order. The broker
    /// request is only issued the first time a filter is registered.
    pub async fn subscribe_with_qos(&self, filter: &str, qos: QoS, handler: Arc<dyn AlertHandler>) -> Result<(), BrokerError> {
        let name = handler.name().to_string();
        let first = self.inner.registry.register(filter, handler);
        tracing::info!(filter, handler = %name, "handler registered");
        if first {
            self.inner.transport.subscribe(filter, qos).await?;
        }
        Ok(())
    }

    /// Current counters and gate state.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.snapshot()
    }

    /// Stops the inbound loop and closes the connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let task = inner.inbound.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "inbound loop ended abnormally");
            }
        }

        let was_connected = inner.connected.swap(false, Ordering::SeqCst);
        if let Err(e) = inner.transport.disconnect().await {
            tracing::warn!(error = %e, "transport disconnect failed");
        }
        if was_connected {
            tracing::info!(broker = %inner.broker, "disconnected from broker");
            inner.record(
                EventType::MqttDisconnection,
                json!({
                    "status": "disconnected",
                    "reason": "client disconnect",
                    "client_id": inner.events.client_id(),
                }),
            );
        }
    }

    /// Reconnects in the background whenever the connection is down.
    ///
    /// The loop stops when `shutdown` is cancelled.
    pub fn supervise(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let interval = this.inner.reconnect_interval;
            loop {
                if !this.is_connected() && !this.connect().await {
                    tracing::debug!(retry_in = ?interval, "broker not connected");
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::info!("connection supervision stopped");
        })
    }
}

impl Inner {
    fn admission(&self) -> MutexGuard<'_, Admission> {
        self.admission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.counters
            .last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let (circuit_state, failure_count) = {
            let admission = self.admission();
            (admission.breaker.state(), admission.breaker.failure_count())
        };
        let last_ms = self.counters.last_activity_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            connection_attempts: self.counters.connection_attempts.load(Ordering::Relaxed),
            successful_connections: self.counters.successful_connections.load(Ordering::Relaxed),
            last_activity: (last_ms != 0).then(|| Utc.timestamp_millis_opt(last_ms).single()).flatten(),
            circuit_state,
            failure_count,
            active_subscriptions: self.registry.topic_count(),
        }
    }

    fn record(&self, event_type: EventType, data: serde_json::Value) {
        self.events.record(event_type, data, &self.snapshot());
    }

    async fn run_inbound(self: Arc<Self>, mut events: EventReceiver, cancel: CancellationToken) {
        let reason = loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Some(TransportEvent::Message(message)) => self.handle_inbound(message).await,
                Some(TransportEvent::Disconnected(reason)) => break reason,
                None => break "connection closed".to_string(),
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        tracing::warn!(broker = %self.broker, reason = %reason, "broker connection lost");
        self.record(
            EventType::MqttDisconnection,
            json!({
                "status": "disconnected",
                "reason": reason,
                "client_id": self.events.client_id(),
            }),
        );
    }

    async fn handle_inbound(&self, message: InboundMessage) {
        if !self.admission().limiter.admit() {
            tracing::warn!(topic = %message.topic, "rate limit exceeded, inbound message dropped");
            return;
        }
        let at = Utc::now();
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        self.touch();
        self.record(
            EventType::MqttMessageReceived,
            json!({
                "topic": message.topic,
                "payload_size": message.payload.len(),
                "qos": message.qos.level(),
                "retain": message.retain,
            }),
        );

        let payload = String::from_utf8_lossy(&message.payload);
        for handler in self.registry.handlers_for(&message.topic) {
            let outcome = AssertUnwindSafe(handler.handle(&message.topic, &payload, at))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(topic = %message.topic, handler = handler.name(), error = %e, "handler failed");
                }
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(topic = %message.topic, handler = handler.name(), panic = %detail, "handler panicked");
                }
            }
        }
    }
}
