//! Append-only audit trail for one migration run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use uuid::Uuid;

/// Severity of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One audit record. Entries are never mutated or deleted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique entry id.
    pub id: Uuid,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// Which component recorded it (e.g. "orchestrator", "worker-2").
    pub component: String,
    /// Human-readable message.
    pub message: String,
    /// Structured payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Thread-safe append-only journal, mirrored to `tracing`.
#[derive(Debug, Default)]
pub struct RunJournal {
    entries: Mutex<Vec<LogEntry>>,
}

impl RunJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry and emit the matching `tracing` event.
    pub fn record(
        &self,
        level: LogLevel,
        component: &str,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(component, "{}", message),
            LogLevel::Info => tracing::info!(component, "{}", message),
            LogLevel::Warn => tracing::warn!(component, "{}", message),
            LogLevel::Error => tracing::error!(component, "{}", message),
        }

        let entry = LogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message,
            details,
        };
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// Snapshot of all entries recorded so far, in append order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of entries recorded so far.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the journal is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_append_only_and_ordered() {
        let journal = RunJournal::new();
        journal.record(LogLevel::Info, "orchestrator", "run started", None);
        journal.record(
            LogLevel::Warn,
            "worker-0",
            "retrying TC-7",
            Some(serde_json::json!({"attempt": 1})),
        );

        let entries = journal.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "run started");
        assert_eq!(entries[1].component, "worker-0");
        assert!(entries[1].details.is_some());
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }
}
