//! # In-Memory Alert Store
//!
//! An [`AlertStore`] kept in process memory with the same filter, ordering and
//! paging semantics as the PostgreSQL store. Used for standalone runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::alert_query::{AlertFilter, SortOrder};
use super::{AlertStore, StoreError};
use crate::models::alert::{AlertPayload, StoredAlert};

struct Row {
    id: i64,
    topic: String,
    payload: String,
    timestamp: DateTime<Utc>,
}

/// # Memory Alert Store
#[derive(Default)]
pub struct MemoryAlertStore {
    rows: RwLock<Vec<Row>>,
}

impl MemoryAlertStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether nothing has been stored yet.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert(&self, topic: &str, payload: &str, timestamp: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut rows = self.rows.write().await;
        let id = rows.last().map_or(1, |r| r.id + 1);
        rows.push(Row {
            id,
            topic: topic.to_string(),
            payload: payload.to_string(),
            timestamp,
        });
        Ok(id)
    }

    async fn query_filtered(&self, filter: &AlertFilter) -> Result<Vec<StoredAlert>, StoreError> {
        let rows = self.rows.read().await;
        let mut matched: Vec<StoredAlert> = rows
            .iter()
            .map(|r| StoredAlert {
                id: r.id,
                topic: r.topic.clone(),
                payload: AlertPayload::decode(&r.payload),
                timestamp: r.timestamp,
            })
            .filter(|a| filter.matches(&a.payload))
            .collect();

        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        if filter.order == SortOrder::Desc {
            matched.reverse();
        }

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn close(&self) {}
}
