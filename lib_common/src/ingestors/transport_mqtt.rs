//! # MQTT Broker Transport
//!
//! [`BrokerTransport`] over a real MQTT 3.1.1 broker, built on `rumqttc`.
//!
//! Each `connect` creates a fresh client and event loop, drives the loop until
//! the broker's CONNACK arrives (bounded by the connect timeout), re-issues
//! the recorded subscriptions and then hands the loop to a forwarding task.
//! The forwarding task turns incoming PUBLISH packets into
//! [`TransportEvent::Message`] and stops at the first connection error,
//! reporting it as [`TransportEvent::Disconnected`]. Reconnecting is left to
//! the ambassador so every attempt passes through its circuit breaker.
//!
//! Closing a session queues a DISCONNECT and keeps the loop running until the
//! packet is written, so the broker sees a clean close rather than a drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::transport::{
    BrokerError, BrokerTransport, EventReceiver, InboundMessage, QoS, TransportEvent, EVENT_CHANNEL_CAPACITY,
};
use crate::configs::AmbassadorSettings;

/// Requests the client may queue ahead of the event loop.
const CLIENT_QUEUE_CAPACITY: usize = 64;
/// How long a closing session waits for its DISCONNECT to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

struct Session {
    client: AsyncClient,
    cancel: CancellationToken,
    forwarder: JoinHandle<()>,
}

/// # MQTT Transport
pub struct MqttTransport {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    connect_timeout: Duration,
    session: tokio::sync::Mutex<Option<Session>>,
    filters: Mutex<Vec<(String, QoS)>>,
    next_ack: AtomicU64,
}

impl MqttTransport {
    /// Transport for the broker and client identity in `settings`.
    pub fn new(settings: &AmbassadorSettings) -> Self {
        Self {
            host: settings.broker_host.clone(),
            port: settings.broker_port,
            client_id: settings.client_id.clone(),
            keep_alive: settings.keep_alive,
            connect_timeout: settings.connect_timeout,
            session: tokio::sync::Mutex::new(None),
            filters: Mutex::new(Vec::new()),
            next_ack: AtomicU64::new(1),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options
    }

    fn recorded_filters(&self) -> Vec<(String, QoS)> {
        self.filters.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn await_connack(eventloop: &mut EventLoop) -> Result<(), BrokerError> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(BrokerError::Refused { code: code as u8 });
                }
                Err(e) => return Err(BrokerError::Connection(e.to_string())),
            }
        }
    }

    async fn forward(mut eventloop: EventLoop, tx: mpsc::Sender<TransportEvent>, cancel: CancellationToken) {
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => None,
                polled = eventloop.poll() => Some(polled),
            };
            let Some(polled) = polled else {
                Self::flush_disconnect(&mut eventloop).await;
                return;
            };
            match polled {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                        qos: publish.qos.into(),
                        retain: publish.retain,
                    };
                    if tx.send(TransportEvent::Message(message)).await.is_err() {
                        return;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::debug!("DISCONNECT sent");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "mqtt event loop stopped");
                    let _ = tx.send(TransportEvent::Disconnected(e.to_string())).await;
                    return;
                }
            }
        }
    }

    /// Polls until the queued DISCONNECT has been written, within [`DISCONNECT_GRACE`].
    async fn flush_disconnect(eventloop: &mut EventLoop) -> bool {
        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "event loop ended before DISCONNECT was sent");
                        return false;
                    }
                }
            }
        })
        .await;
        match flushed {
            Ok(sent) => {
                if sent {
                    tracing::debug!("DISCONNECT sent");
                }
                sent
            }
            Err(_) => {
                tracing::warn!(grace = ?DISCONNECT_GRACE, "DISCONNECT not sent in time, dropping the connection");
                false
            }
        }
    }

    async fn close(session: Session) {
        if let Err(e) = session.client.disconnect().await {
            tracing::warn!(error = %e, "could not queue DISCONNECT");
        }
        session.cancel.cancel();
        if let Err(e) = session.forwarder.await {
            tracing::warn!(error = %e, "mqtt forwarder ended abnormally");
        }
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&self) -> Result<EventReceiver, BrokerError> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            Self::close(previous).await;
        }

        let (client, mut eventloop) = AsyncClient::new(self.options(), CLIENT_QUEUE_CAPACITY);
        tracing::info!(broker = %format!("{}:{}", self.host, self.port), client_id = %self.client_id, "connecting to broker");
        tokio::time::timeout(self.connect_timeout, Self::await_connack(&mut eventloop))
            .await
            .map_err(|_| BrokerError::Timeout(self.connect_timeout))??;

        for (filter, qos) in self.recorded_filters() {
            client
                .subscribe(filter.clone(), qos.into())
                .await
                .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
            tracing::debug!(filter = %filter, "re-subscribed");
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let forwarder = tokio::spawn(Self::forward(eventloop, tx, cancel.clone()));
        *session = Some(Session {
            client,
            cancel,
            forwarder,
        });
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<u64, BrokerError> {
        let client = match self.session.lock().await.as_ref() {
            Some(session) if !session.forwarder.is_finished() => session.client.clone(),
            _ => return Err(BrokerError::NotConnected),
        };
        client
            .publish(topic, qos.into(), retain, payload.to_vec())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(self.next_ack.fetch_add(1, Ordering::Relaxed))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        {
            let mut filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
            if !filters.iter().any(|(f, _)| f == filter) {
                filters.push((filter.to_string(), qos));
            }
        }
        let client = match self.session.lock().await.as_ref() {
            Some(session) => session.client.clone(),
            None => {
                tracing::debug!(filter = %filter, "not connected, subscription deferred");
                return Ok(());
            }
        };
        client
            .subscribe(filter, qos.into())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let previous = self.session.lock().await.take();
        if let Some(previous) = previous {
            Self::close(previous).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads one MQTT control packet and returns its first header byte.
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<u8> {
        let header = stream.read_u8().await?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            remaining |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; remaining];
        stream.read_exact(&mut body).await?;
        Ok(header)
    }

    #[test]
    fn qos_maps_both_ways() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            let wire: rumqttc::QoS = qos.into();
            assert_eq!(QoS::from(wire), qos);
        }
    }

    #[tokio::test]
    async fn subscribing_while_disconnected_only_records_the_filter() {
        let transport = MqttTransport::new(&AmbassadorSettings::default());
        transport.subscribe("alertas/general", QoS::AtMostOnce).await.unwrap();
        transport.subscribe("alertas/general", QoS::AtMostOnce).await.unwrap();
        assert_eq!(transport.recorded_filters().len(), 1);
        assert!(matches!(
            transport.publish("alertas/general", b"x", QoS::AtMostOnce, false).await,
            Err(BrokerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_the_connect() {
        let settings = AmbassadorSettings {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1,
            connect_timeout: Duration::from_secs(5),
            ..AmbassadorSettings::default()
        };
        let transport = MqttTransport::new(&settings);
        assert!(transport.connect().await.is_err());
    }

    #[tokio::test]
    async fn disconnect_reaches_the_broker_before_the_session_ends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert_eq!(read_packet(&mut stream).await.unwrap() >> 4, 1, "expected CONNECT");
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            read_packet(&mut stream).await.unwrap()
        });

        let settings = AmbassadorSettings {
            broker_host: "127.0.0.1".to_string(),
            broker_port: port,
            connect_timeout: Duration::from_secs(5),
            ..AmbassadorSettings::default()
        };
        let transport = MqttTransport::new(&settings);
        let _events = transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
        assert_eq!(next, 0xE0, "expected DISCONNECT");
        assert!(matches!(
            transport.publish("alertas/general", b"x", QoS::AtMostOnce, false).await,
            Err(BrokerError::NotConnected)
        ));
    }
}
