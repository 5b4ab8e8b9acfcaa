//! # Broadcast Dispatcher
//!
//! The `Dispatcher` is the fan-out point between the pipeline and the live
//! dashboard connections. One inbound alert is serialized once and handed to
//! every subscriber as a shared `Arc<str>`, so the frame is never copied per
//! client.
//!
//! ## Subscriber lifecycle
//!
//! A subscriber is the sending half of a bounded channel whose receiving
//! half is owned by the connection task (e.g. a WebSocket session). Delivery
//! never waits: a subscriber whose receiver is gone, or whose queue is full
//! because the client stopped reading, fails delivery, is marked dead and is
//! pruned after the sweep. Dropping the sender closes the connection task's
//! receiver, which ends the session. Connection tasks may also remove
//! themselves explicitly, and removal is idempotent.
//!
//! ## Concurrency
//!
//! `broadcast` snapshots the subscriber set under the lock, releases it,
//! delivers to the snapshot and only then re-acquires the lock to remove the
//! dead subscribers. New subscribers that join mid-sweep are kept and simply
//! miss the frame in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A frame as delivered to subscribers.
pub type Frame = Arc<str>;

/// Receiving half handed to the connection task.
pub type FrameReceiver = mpsc::Receiver<Frame>;

/// Frames a subscriber may have queued before it counts as stalled.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Identity of one subscriber. Unique for the life of a `Dispatcher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Delivery to a single subscriber failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber {0} is no longer receiving")]
    Closed(SubscriberId),
    #[error("subscriber {0} stalled with a full queue")]
    Stalled(SubscriberId),
}

/// Outcome of one broadcast sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the frame was handed to.
    pub delivered: usize,
    /// Subscribers found dead during the sweep and removed afterwards.
    pub pruned: usize,
}

/// # Dispatcher
pub struct Dispatcher {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::with_queue_capacity(SUBSCRIBER_QUEUE_CAPACITY)
    }

    /// Creates a dispatcher whose subscribers queue at most `capacity` frames.
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Frame>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new subscriber and returns its id and frame receiver.
    ///
    /// Call this once the transport handshake has been accepted.
    pub fn add_subscriber(&self) -> (SubscriberId, FrameReceiver) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut subscribers = self.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        tracing::info!(subscriber = %id, active = count, "subscriber connected");
        (id, rx)
    }

    /// Removes a subscriber. Removing an unknown or already removed id is a no-op.
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            tracing::info!(subscriber = %id, "subscriber removed");
        }
        removed
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Serializes `message` once and delivers it to every subscriber.
    pub fn broadcast<T: Serialize>(&self, message: &T) -> Result<BroadcastReport, serde_json::Error> {
        let frame: Frame = serde_json::to_string(message)?.into();
        Ok(self.broadcast_frame(frame))
    }

    /// Delivers an already serialized frame to every subscriber.
    pub fn broadcast_frame(&self, frame: Frame) -> BroadcastReport {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Frame>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if snapshot.is_empty() {
            tracing::debug!("broadcast with no subscribers");
            return BroadcastReport::default();
        }
        tracing::debug!(subscribers = snapshot.len(), bytes = frame.len(), "broadcasting frame");

        let mut dead = Vec::new();
        let mut delivered = 0;
        for (id, tx) in &snapshot {
            match Self::deliver(*id, tx, Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "delivery failed, pruning subscriber");
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.lock();
            for id in &dead {
                subscribers.remove(id);
            }
        }

        BroadcastReport {
            delivered,
            pruned: dead.len(),
        }
    }

    fn deliver(id: SubscriberId, tx: &mpsc::Sender<Frame>, frame: Frame) -> Result<(), DeliveryError> {
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Stalled(id),
            TrySendError::Closed(_) => DeliveryError::Closed(id),
        })
    }
}
