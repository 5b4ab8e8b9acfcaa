//! # Handler Registry
//!
//! Maps broker topic filters to the ordered list of handlers that must run for
//! every message arriving on a matching topic. Handlers registered on the same
//! filter run in registration order; filters are visited in the order they were
//! first registered. There is no unregistration.
//!
//! Filters follow MQTT rules: `+` matches exactly one level and a trailing `#`
//! matches the remaining levels (including none). A plain topic matches only
//! itself.

use std::sync::{Arc, PoisonError, RwLock};

use crate::ingestors::handler::AlertHandler;

struct Entry {
    filter: String,
    handlers: Vec<Arc<dyn AlertHandler>>,
}

/// # Handler Registry
#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list for `filter`.
    ///
    /// Returns `true` when `filter` had no handlers before this call.
    pub fn register(&self, filter: &str, handler: Arc<dyn AlertHandler>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.iter_mut().find(|e| e.filter == filter) {
            entry.handlers.push(handler);
            return false;
        }
        entries.push(Entry {
            filter: filter.to_string(),
            handlers: vec![handler],
        });
        true
    }

    /// Snapshot of the handlers that must run for a message on `topic`.
    pub fn handlers_for(&self, topic: &str) -> Vec<Arc<dyn AlertHandler>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|e| topic_matches(&e.filter, topic))
            .flat_map(|e| e.handlers.iter().cloned())
            .collect()
    }

    /// Number of distinct filters with at least one handler.
    pub fn topic_count(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Registered filters, in registration order.
    pub fn filters(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|e| e.filter.clone()).collect()
    }
}

/// Whether the MQTT topic filter `filter` matches the concrete `topic`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter == topic {
        return true;
    }
    // Wildcards never match system topics at the first level.
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
