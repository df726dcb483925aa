// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Data Models
//!
//! Records persisted by the stores and the summary returned by a processing
//! run. All persisted types are JSON-serialized into redb values.
//!
//! - [`Participant`]: whose uploads are being processed, and on which OS
//! - [`PendingFile`]: an uploaded file not yet merged into a chunk
//! - [`ChunkRegistryEntry`]: metadata for one stored chunk
//! - [`ProcessingSummary`]: counts and byte volumes reported by one run

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::streams::DataStream;

// =============================================================================
// Participants
// =============================================================================

/// Device operating system, which selects the canonical chunk headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OsType {
    Android,
    Ios,
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsType::Android => write!(f, "ANDROID"),
            OsType::Ios => write!(f, "IOS"),
        }
    }
}

/// A study participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub patient_id: String,
    pub study_id: String,
    pub os_type: OsType,
}

impl Participant {
    pub fn new(patient_id: impl Into<String>, study_id: impl Into<String>, os_type: OsType) -> Self {
        Self {
            patient_id: patient_id.into(),
            study_id: study_id.into(),
            os_type,
        }
    }
}

// =============================================================================
// Pending files
// =============================================================================

/// An uploaded device file awaiting processing.
///
/// `storage_path` points at the raw device ciphertext in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFile {
    pub id: u64,
    pub storage_path: String,
    pub participant_id: String,
    pub study_id: String,
    pub os_type: OsType,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Chunk registry
// =============================================================================

/// Metadata for one stored chunk (or one unchunked file).
///
/// `storage_path` is derived from the key fields, so it doubles as the
/// entry's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRegistryEntry {
    pub storage_path: String,
    pub study_id: String,
    pub participant_id: String,
    pub data_stream: DataStream,
    pub hour_index: i64,
    /// URL-safe base64 SHA-256 of the uncompressed content.
    pub content_hash: String,
    /// Uncompressed content length in bytes.
    pub byte_size: u64,
    pub survey_id: Option<String>,
    pub is_chunkable: bool,
    pub last_updated: DateTime<Utc>,
}

// =============================================================================
// Run summary
// =============================================================================

/// Bytes stored for one stream on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub data_stream: DataStream,
    pub bytes: u64,
}

/// What one orchestrator run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub pages: usize,
    pub files_seen: usize,
    /// Pending files deleted after their data was durably stored.
    pub files_retired: usize,
    /// Pending files that decrypted to nothing and were deleted.
    pub files_empty: usize,
    /// Pending files held back for a later run.
    pub files_failed: usize,
    pub line_errors: usize,
    pub chunks_created: usize,
    pub chunks_updated: usize,
    pub unchunked_registered: usize,
    pub rows_written: usize,
    /// Uncompressed bytes written to the object store.
    pub bytes_written: u64,
    pub earliest_hour: Option<i64>,
    pub latest_hour: Option<i64>,
    /// Uncompressed bytes per stream across this run's writes.
    pub bytes_by_stream: BTreeMap<DataStream, u64>,
    /// Stored bytes per day per stream over the hour range this run touched.
    pub daily_usage: Vec<DailyUsage>,
}

impl ProcessingSummary {
    /// Widen the processed hour range to include `hour`.
    pub fn observe_hour(&mut self, hour: i64) {
        self.earliest_hour = Some(self.earliest_hour.map_or(hour, |h| h.min(hour)));
        self.latest_hour = Some(self.latest_hour.map_or(hour, |h| h.max(hour)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_type_wire_names() {
        assert_eq!(serde_json::to_string(&OsType::Ios).unwrap(), "\"IOS\"");
        assert_eq!(
            serde_json::from_str::<OsType>("\"ANDROID\"").unwrap(),
            OsType::Android
        );
        assert_eq!(OsType::Ios.to_string(), "IOS");
    }

    #[test]
    fn observe_hour_tracks_range() {
        let mut summary = ProcessingSummary::default();
        summary.observe_hour(10);
        summary.observe_hour(4);
        summary.observe_hour(7);
        assert_eq!(summary.earliest_hour, Some(4));
        assert_eq!(summary.latest_hour, Some(10));
    }
}
