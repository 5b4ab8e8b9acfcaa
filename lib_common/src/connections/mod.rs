//! # Connections Module
//!
//! Alert persistence. [`AlertStore`] is the contract the pipeline writes
//! through and the HTTP read surface queries; PostgreSQL (feature
//! `connections`) and an in-memory store implement it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::alert::StoredAlert;

/// Filters, ordering and the SQL built from them.
pub mod alert_query;
/// In-memory alert store.
pub mod db_memory;
/// PostgreSQL alert store.
#[cfg(feature = "connections")]
pub mod db_postgres;

pub use alert_query::{AlertFilter, FieldAccess, SortOrder};
pub use db_memory::MemoryAlertStore;
#[cfg(feature = "connections")]
pub use db_postgres::PostgresAlertStore;

/// Errors raised by an alert store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be reached within the startup retry budget.
    #[error("database unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },
    /// A statement failed.
    #[error("query failed: {0}")]
    Query(String),
    /// Creating the schema failed.
    #[error("schema setup failed: {0}")]
    Schema(String),
}

/// # Alert Store
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Appends one row and returns its id. The row is committed on return.
    async fn insert(&self, topic: &str, payload: &str, timestamp: DateTime<Utc>) -> Result<i64, StoreError>;

    /// Rows matching `filter`, ordered by timestamp. An empty result is not an error.
    async fn query_filtered(&self, filter: &AlertFilter) -> Result<Vec<StoredAlert>, StoreError>;

    /// Releases the store's connections.
    async fn close(&self);
}
