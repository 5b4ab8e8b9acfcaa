//! # PostgreSQL Alert Store
//!
//! Durable alert storage on a `sqlx` PostgreSQL pool.
//!
//! Construction retries the connection a bounded number of times, since the
//! database container is often still starting when the relay comes up.
//! Running out of attempts is fatal for the caller. Once connected, the
//! schema is created if missing. Each schema step runs on its own and a
//! failing step is logged and skipped, because a peer instance or another
//! role may own what already exists. Filters go through the `alert_field`
//! helper when it is installed and fall back to an inline guarded `->>`
//! otherwise.
//!
//! Tables left by earlier deployments may carry `timestamp` as a plain
//! `TIMESTAMP`; those values are read as UTC.
//!
//! Rows are append-only. Writes are serialized through one lock; reads run
//! concurrently on the pool.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::alert_query::{select_alerts, AlertFilter, FieldAccess};
use super::{AlertStore, StoreError};
use crate::configs::StoreSettings;
use crate::models::alert::{AlertPayload, StoredAlert};

const SCHEMA: [(&str, &str); 3] = [
    ("table", "CREATE TABLE IF NOT EXISTS alerts (
        id SERIAL PRIMARY KEY,
        topic VARCHAR(255) NOT NULL,
        payload TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL
    )"),
    ("index", "CREATE INDEX IF NOT EXISTS alerts_timestamp_idx ON alerts (timestamp)"),
    // Non-JSON payloads yield NULL instead of failing the whole query.
    ("alert_field", "CREATE OR REPLACE FUNCTION alert_field(p TEXT, k TEXT) RETURNS TEXT
        LANGUAGE plpgsql IMMUTABLE AS $$
        BEGIN
            RETURN p::jsonb ->> k;
        EXCEPTION WHEN others THEN
            RETURN NULL;
        END;
        $$"),
];

const HELPER_INSTALLED: &str = "SELECT to_regprocedure('alert_field(text,text)') IS NOT NULL";

const INSERT_ALERT: &str = "INSERT INTO alerts (topic, payload, timestamp) VALUES ($1, $2, $3) RETURNING id::BIGINT";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// # Postgres Alert Store
pub struct PostgresAlertStore {
    pool: PgPool,
    write_lock: tokio::sync::Mutex<()>,
    helper_ready: AtomicBool,
}

impl PostgresAlertStore {
    /// Connects with bounded retries, then ensures the schema exists.
    ///
    /// Returns [`StoreError::Unavailable`] once `max_attempts` connection
    /// attempts have failed.
    pub async fn connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.user)
            .password(&settings.password);
        let attempts = settings.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let connected = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(settings.acquire_timeout)
                .connect_with(options.clone())
                .await;
            match connected {
                Ok(pool) => {
                    tracing::info!(host = %settings.host, database = %settings.database, attempt, "connected to PostgreSQL");
                    let store = Self::from_pool(pool);
                    if let Err(e) = store.ensure_schema().await {
                        tracing::warn!(error = %e, "schema setup incomplete, continuing with what exists");
                    }
                    return Ok(store);
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "PostgreSQL not ready");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(settings.retry_pause).await;
                    }
                }
            }
        }

        tracing::error!(attempts, error = %last_error, "giving up on PostgreSQL");
        Err(StoreError::Unavailable { attempts, last_error })
    }

    /// Wraps an existing pool. The schema is left untouched and filters use
    /// inline field access until [`ensure_schema`](Self::ensure_schema) runs.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
            helper_ready: AtomicBool::new(false),
        }
    }

    /// Creates the alert table, its index and the payload field helper.
    ///
    /// Every step is attempted even when an earlier one fails. Afterwards the
    /// store checks whether the helper exists and picks the field access for
    /// later queries. The error lists the steps that failed.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut failed = Vec::new();
        for (step, statement) in SCHEMA {
            if let Err(e) = sqlx::query(statement).execute(&self.pool).await {
                tracing::warn!(step, error = %e, "schema step failed");
                failed.push(format!("{step}: {e}"));
            }
        }

        let helper = match sqlx::query_scalar::<_, bool>(HELPER_INSTALLED).fetch_one(&self.pool).await {
            Ok(installed) => installed,
            Err(e) => {
                tracing::warn!(error = %e, "could not look up the alert_field helper");
                false
            }
        };
        self.helper_ready.store(helper, Ordering::Release);
        if !helper {
            tracing::warn!("alert_field helper missing, filtering with inline field access");
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Schema(failed.join("; ")))
        }
    }

    /// Field access the next filtered query will use.
    pub fn field_access(&self) -> FieldAccess {
        if self.helper_ready.load(Ordering::Acquire) {
            FieldAccess::Helper
        } else {
            FieldAccess::Inline
        }
    }

    /// Round-trips a trivial query.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn decode_row(row: &PgRow) -> Result<StoredAlert, sqlx::Error> {
        let payload: String = row.try_get("payload")?;
        Ok(StoredAlert {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            payload: AlertPayload::decode(&payload),
            timestamp: Self::decode_timestamp(row)?,
        })
    }

    fn decode_timestamp(row: &PgRow) -> Result<DateTime<Utc>, sqlx::Error> {
        match row.try_get::<DateTime<Utc>, _>("timestamp") {
            Ok(ts) => Ok(ts),
            Err(sqlx::Error::ColumnDecode { .. }) => Ok(row.try_get::<NaiveDateTime, _>("timestamp")?.and_utc()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AlertStore for PostgresAlertStore {
    async fn insert(&self, topic: &str, payload: &str, timestamp: DateTime<Utc>) -> Result<i64, StoreError> {
        let _writer = self.write_lock.lock().await;
        let id = sqlx::query_scalar::<_, i64>(INSERT_ALERT)
            .bind(topic)
            .bind(payload)
            .bind(timestamp)
            .fetch_one(&self.pool)
            .await?;
        tracing::debug!(id, topic, "alert stored");
        Ok(id)
    }

    async fn query_filtered(&self, filter: &AlertFilter) -> Result<Vec<StoredAlert>, StoreError> {
        let mut query = select_alerts(filter, self.field_access());
        let rows = query.build().fetch_all(&self.pool).await?;
        let alerts = rows
            .iter()
            .map(Self::decode_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(alerts)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}
