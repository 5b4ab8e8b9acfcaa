//! # Structured Event Log
//!
//! Append-only JSON-lines sink for the ambassador's operational events,
//! consumed by an external log processor. One record per line:
//!
//! ```json
//! {"timestamp":"2026-10-19T12:00:00Z","service":"mqtt_ambassador","client_id":"ambassador-a1",
//!  "event_type":"mqtt_message_sent","data":{...},"metrics":{...}}
//! ```
//!
//! Lines are handed to a `tracing_appender` non-blocking worker, so callers
//! on the async path never touch the file. Buffered lines are flushed when
//! the log is dropped; under sustained overload the worker drops lines rather
//! than stall the ambassador.
//!
//! The sink never fails its caller. If the file cannot be opened or written,
//! a single `warn` is emitted and records keep flowing to `debug` tracing.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Value of the `service` field on every record.
pub const SERVICE_NAME: &str = "mqtt_ambassador";

/// Kind of operational event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A connect attempt finished, successfully or not.
    MqttConnection,
    /// An established connection ended.
    MqttDisconnection,
    /// An inbound message was admitted.
    MqttMessageReceived,
    /// An outbound message was handed to the broker.
    MqttMessageSent,
}

/// One line of the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub client_id: String,
    pub event_type: EventType,
    pub data: Value,
    pub metrics: Value,
}

struct FileSink {
    path: PathBuf,
    writer: NonBlocking,
    failed: AtomicBool,
    _guard: WorkerGuard,
}

impl FileSink {
    fn open(path: &Path) -> Result<Self, String> {
        let file_name = path
            .file_name()
            .ok_or_else(|| "path has no file name".to_string())?
            .to_string_lossy()
            .into_owned();
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(dir)
            .map_err(|e| e.to_string())?;
        let (writer, guard) = NonBlockingBuilder::default().thread_name("eventlog").finish(appender);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            failed: AtomicBool::new(false),
            _guard: guard,
        })
    }

    fn write_line(&self, line: &str) {
        let mut writer = self.writer.clone();
        if let Err(e) = writer.write_all(format!("{line}\n").as_bytes()) {
            if !self.failed.swap(true, Ordering::Relaxed) {
                tracing::warn!(path = %self.path.display(), error = %e, "event log unavailable, records go to tracing only");
            }
        }
    }
}

/// # Event Log
pub struct EventLog {
    client_id: String,
    sink: Option<FileSink>,
}

impl EventLog {
    /// Event log appending to `path`, creating missing parent directories.
    ///
    /// Falls back to tracing only when the file cannot be opened.
    pub fn to_file(client_id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let sink = match FileSink::open(path) {
            Ok(sink) => Some(sink),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "event log unavailable, records go to tracing only");
                None
            }
        };
        Self {
            client_id: client_id.into(),
            sink,
        }
    }

    /// Event log that only emits records to `debug` tracing.
    pub fn tracing_only(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            sink: None,
        }
    }

    /// Client id stamped on every record.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether records reach a file.
    pub fn has_file(&self) -> bool {
        self.sink.is_some()
    }

    /// Appends one record.
    pub fn record<M: Serialize>(&self, event_type: EventType, data: Value, metrics: &M) {
        let record = EventRecord {
            timestamp: Utc::now(),
            service: SERVICE_NAME.to_string(),
            client_id: self.client_id.clone(),
            event_type,
            data,
            metrics: serde_json::to_value(metrics).unwrap_or(Value::Null),
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, ?event_type, "event record could not be serialized");
                return;
            }
        };
        tracing::debug!(target: "eventlog", "{line}");

        if let Some(sink) = &self.sink {
            sink.write_line(&line);
        }
    }
}
