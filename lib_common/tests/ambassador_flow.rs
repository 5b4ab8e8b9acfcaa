//! End-to-end flow through the ambassador on the in-memory broker:
//! broker → ambassador → store → dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lib_common::connections::AlertStore;
use lib_common::core::Dispatcher;
use lib_common::pipeline;
use lib_common::{
    AlertFilter, AlertHandler, AmbassadorSettings, CircuitState, HandlerError, MemoryAlertStore, MemoryTransport,
    MqttAmbassador, QoS,
};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "alertas/general";

fn settings() -> AmbassadorSettings {
    AmbassadorSettings {
        client_id: "ambassador-it".to_string(),
        reconnect_interval: Duration::from_millis(20),
        event_log_path: None,
        ..AmbassadorSettings::default()
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

struct Counting(AtomicUsize);

#[async_trait]
impl AlertHandler for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    async fn handle(&self, _topic: &str, _payload: &str, _at: DateTime<Utc>) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl AlertHandler for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _topic: &str, _payload: &str, _at: DateTime<Utc>) -> Result<(), HandlerError> {
        Err(HandlerError::Other("downstream rejected the alert".to_string()))
    }
}

struct Panicking;

#[async_trait]
impl AlertHandler for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _topic: &str, _payload: &str, _at: DateTime<Utc>) -> Result<(), HandlerError> {
        panic!("handler bug");
    }
}

#[tokio::test]
async fn inbound_alerts_are_persisted_then_broadcast() {
    let transport = Arc::new(MemoryTransport::new());
    let ambassador = MqttAmbassador::new(&settings(), transport.clone());
    let store = Arc::new(MemoryAlertStore::new());
    let dispatcher = Arc::new(Dispatcher::new());
    pipeline::wire(&ambassador, TOPIC, store.clone(), dispatcher.clone()).await.unwrap();
    let (_id, mut frames) = dispatcher.add_subscriber();

    assert!(ambassador.connect().await);
    assert!(transport.inject(TOPIC, br#"{"tipo":"sismo","region":"Quito","mensaje":"Temblor"}"#, QoS::AtMostOnce, false).await);

    let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv()).await.unwrap().unwrap();
    let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(frame["topic"], TOPIC);
    assert_eq!(frame["payload"]["region"], "Quito");

    let stored = store.query_filtered(&AlertFilter::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].topic, TOPIC);

    let metrics = ambassador.metrics();
    assert_eq!(metrics.messages_received, 1);
    assert_eq!(metrics.active_subscriptions, 1);
    assert!(metrics.last_activity.is_some());
    assert!(metrics.is_healthy());

    ambassador.disconnect().await;
}

#[tokio::test]
async fn a_failing_handler_does_not_stop_the_others() {
    let transport = Arc::new(MemoryTransport::new());
    let ambassador = MqttAmbassador::new(&settings(), transport.clone());
    let counting = Arc::new(Counting(AtomicUsize::new(0)));
    ambassador.subscribe(TOPIC, Arc::new(Failing)).await.unwrap();
    ambassador.subscribe(TOPIC, Arc::new(Panicking)).await.unwrap();
    ambassador.subscribe(TOPIC, counting.clone()).await.unwrap();
    assert_eq!(transport.subscriptions(), vec![TOPIC.to_string()]);

    assert!(ambassador.connect().await);
    transport.inject(TOPIC, b"uno", QoS::AtMostOnce, false).await;
    transport.inject(TOPIC, b"dos", QoS::AtMostOnce, false).await;

    eventually("both messages to reach the last handler", || counting.0.load(Ordering::SeqCst) == 2).await;
    assert!(ambassador.is_connected());
    ambassador.disconnect().await;
}

#[tokio::test]
async fn inbound_and_outbound_share_one_rate_budget() {
    let transport = Arc::new(MemoryTransport::new());
    let ambassador = MqttAmbassador::new(
        &AmbassadorSettings {
            rate_limit: 3,
            ..settings()
        },
        transport.clone(),
    );
    let counting = Arc::new(Counting(AtomicUsize::new(0)));
    ambassador.subscribe("sensores/#", counting.clone()).await.unwrap();
    assert!(ambassador.connect().await);

    for n in 0..5 {
        transport.inject("sensores/quito", format!("{n}").as_bytes(), QoS::AtMostOnce, false).await;
    }
    eventually("the admitted messages", || ambassador.metrics().messages_received == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counting.0.load(Ordering::SeqCst), 3);
    assert_eq!(ambassador.metrics().messages_received, 3);

    assert!(!ambassador.publish("alertas/general", b"{}", QoS::AtMostOnce).await);
    assert!(transport.published().is_empty());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(ambassador.publish("alertas/general", b"{}", QoS::AtMostOnce).await);
    assert_eq!(ambassador.metrics().messages_sent, 1);
    ambassador.disconnect().await;
}

#[tokio::test]
async fn open_circuit_rejects_publishes_without_io() {
    let transport = Arc::new(MemoryTransport::new());
    transport.set_reachable(false);
    let ambassador = MqttAmbassador::new(
        &AmbassadorSettings {
            failure_threshold: 2,
            ..settings()
        },
        transport.clone(),
    );
    assert!(!ambassador.connect().await);
    assert!(!ambassador.connect().await);
    assert_eq!(ambassador.metrics().circuit_state, CircuitState::Open);

    assert!(!ambassador.publish(TOPIC, b"{}", QoS::AtMostOnce).await);
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn supervision_reconnects_after_the_broker_drops_the_connection() {
    let transport = Arc::new(MemoryTransport::new());
    let ambassador = MqttAmbassador::new(&settings(), transport.clone());
    let counting = Arc::new(Counting(AtomicUsize::new(0)));
    ambassador.subscribe(TOPIC, counting.clone()).await.unwrap();

    let shutdown = CancellationToken::new();
    let supervisor = ambassador.supervise(shutdown.clone());
    eventually("the first connection", || ambassador.is_connected()).await;

    transport.drop_connection("broker restarted").await;
    eventually("the reconnect", || transport.connect_count() == 2 && ambassador.is_connected()).await;

    transport.inject(TOPIC, b"{}", QoS::AtMostOnce, false).await;
    eventually("delivery on the new connection", || counting.0.load(Ordering::SeqCst) == 1).await;
    assert_eq!(ambassador.metrics().successful_connections, 2);

    shutdown.cancel();
    supervisor.await.unwrap();
    ambassador.disconnect().await;
    ambassador.disconnect().await;
    assert!(!ambassador.is_connected());
}

#[tokio::test]
async fn telemetry_is_written_to_the_event_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ambassador.log");
    let transport = Arc::new(MemoryTransport::new());
    let ambassador = MqttAmbassador::new(
        &AmbassadorSettings {
            event_log_path: Some(path.clone()),
            ..settings()
        },
        transport.clone(),
    );
    let counting = Arc::new(Counting(AtomicUsize::new(0)));
    ambassador.subscribe(TOPIC, counting.clone()).await.unwrap();

    assert!(ambassador.connect().await);
    assert!(ambassador.publish(TOPIC, br#"{"tipo":"sismo"}"#, QoS::AtLeastOnce).await);
    eventually("the looped-back message", || counting.0.load(Ordering::SeqCst) == 1).await;
    ambassador.disconnect().await;
    // The last handle owns the event log; dropping it flushes the writer.
    drop(ambassador);

    let records: Vec<serde_json::Value> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let of_type = |t: &str| records.iter().find(|r| r["event_type"] == t).unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0]["event_type"], "mqtt_connection");
    assert_eq!(records[0]["data"]["status"], "connected");
    assert_eq!(records[3]["event_type"], "mqtt_disconnection");

    let sent = of_type("mqtt_message_sent");
    assert_eq!(sent["data"]["payload_size"], 16);
    assert_eq!(sent["data"]["qos"], 1);
    assert_eq!(sent["metrics"]["messages_sent"], 1);
    assert_eq!(of_type("mqtt_message_received")["data"]["retain"], false);
    assert!(records.iter().all(|r| r["client_id"] == "ambassador-it"));
}
