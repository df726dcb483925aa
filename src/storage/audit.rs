// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for processing anomalies.
//!
//! Line-level decryption failures, rejected files, header mismatches and
//! vanished chunks are appended to a daily JSONL log in the object store so
//! they can be inspected after the run that hit them is gone.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::paths::audit_events_path;
use super::{ObjectStore, StorageResult};

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Decryption
    DecryptionLineErrors,
    DecryptionFailed,

    // Binning
    FileRejected,

    // Merging
    HeaderMismatch,
    ChunkVanished,
    MergeFailed,
    ConcurrentCreate,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub participant_id: Option<String>,
    /// Upload or chunk path the event concerns.
    pub resource: Option<String>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            participant_id: None,
            resource: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only daily event log.
pub struct AuditLog {
    store: Arc<dyn ObjectStore>,
    // Keeps concurrent appends from this process from interleaving.
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an event to the log for its day.
    pub fn log(&self, event: &AuditEvent) -> StorageResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let path = audit_events_path(&date);

        let mut line = serde_json::to_vec(event).map_err(|e| {
            super::StorageError::Io(std::io::Error::other(format!(
                "Failed to serialize audit event: {e}"
            )))
        })?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.store.append(&path, &line)
    }

    /// Log an event, reporting failures to tracing instead of the caller.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event) {
            tracing::warn!(error = %e, event_type = ?event.event_type, "Failed to write audit event");
        }
    }

    /// Read the events of one day (`YYYY-MM-DD`). Unparsable lines are skipped.
    pub fn read_events(&self, date: &str) -> StorageResult<Vec<AuditEvent>> {
        let content = match self.store.get(&audit_events_path(date)) {
            Ok(content) => content,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(content
            .split(|b| *b == b'\n')
            .filter(|line| !line.trim_ascii().is_empty())
            .filter_map(|line| serde_json::from_slice(line).ok())
            .collect())
    }
}
