// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Object-store key layout.
//!
//! ```text
//! {study_id}/{patient_id}/{upload_folder}/{unix_ms}.csv      raw device uploads
//! CHUNKED_DATA/{study_id}/{patient_id}/{stream}/{hour}.csv    merged chunks
//! keys/{study_id}/{patient_id}_private                        participant RSA keys
//! AUDIT/{yyyy-mm-dd}/events.jsonl                             daily audit log
//! ```

use crate::codec::time::hour_to_string;
use crate::streams::DataStream;

/// Prefix under which merged chunks are stored.
pub const CHUNKS_FOLDER: &str = "CHUNKED_DATA";

pub const KEYS_FOLDER: &str = "keys";

pub const AUDIT_FOLDER: &str = "AUDIT";

/// Deterministic storage path of the chunk for one hour bin.
///
/// Returns `None` only for hour indices outside the representable date range.
pub fn chunk_path(
    study_id: &str,
    patient_id: &str,
    stream: DataStream,
    hour_index: i64,
) -> Option<String> {
    let hour = hour_to_string(hour_index)?;
    Some(format!(
        "{CHUNKS_FOLDER}/{study_id}/{patient_id}/{stream}/{hour}.csv"
    ))
}

/// Prefix holding every chunk of one participant.
pub fn participant_chunk_prefix(study_id: &str, patient_id: &str) -> String {
    format!("{CHUNKS_FOLDER}/{study_id}/{patient_id}/")
}

pub fn private_key_path(study_id: &str, patient_id: &str) -> String {
    format!("{KEYS_FOLDER}/{study_id}/{patient_id}_private")
}

pub fn audit_events_path(date: &str) -> String {
    format!("{AUDIT_FOLDER}/{date}/events.jsonl")
}

/// Strip upload artifacts from a stored path.
///
/// Compressed uploads carry a `.zstd` suffix and re-uploads of an existing
/// name get `-duplicate-<random>` appended.
pub fn normalize_upload_path(path: &str) -> &str {
    let path = path.strip_suffix(".zstd").unwrap_or(path);
    match path.find("-duplicate") {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// File name of an upload without its directory.
pub fn upload_file_name(path: &str) -> &str {
    let path = normalize_upload_path(path);
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Timestamp encoded in an upload's file name (`<unix_ms>.csv`).
pub fn upload_timestamp(path: &str) -> &str {
    let name = upload_file_name(path);
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

/// Survey id of a survey upload: the folder directly above the file.
pub fn survey_id_from_path(path: &str) -> Option<&str> {
    let path = normalize_upload_path(path);
    let mut parts = path.rsplitn(3, '/');
    parts.next()?;
    let parent = parts.next()?;
    parts.next()?;
    Some(parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_paths_use_hour_start() {
        assert_eq!(
            chunk_path("s1", "p1", DataStream::Gps, 472_222).unwrap(),
            "CHUNKED_DATA/s1/p1/gps/2023-11-14T22:00:00.csv"
        );
        assert_eq!(participant_chunk_prefix("s1", "p1"), "CHUNKED_DATA/s1/p1/");
    }

    #[test]
    fn fixed_layout_paths() {
        assert_eq!(private_key_path("s1", "p1"), "keys/s1/p1_private");
        assert_eq!(audit_events_path("2026-01-02"), "AUDIT/2026-01-02/events.jsonl");
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_upload_path("s/p/gps/1.csv.zstd"), "s/p/gps/1.csv");
        assert_eq!(normalize_upload_path("s/p/gps/1.csv-duplicate-abc"), "s/p/gps/1.csv");
        assert_eq!(normalize_upload_path("s/p/gps/1.csv"), "s/p/gps/1.csv");
    }

    #[test]
    fn file_name_parts() {
        assert_eq!(upload_file_name("s/p/wifiLog/1700000000000.csv"), "1700000000000.csv");
        assert_eq!(upload_timestamp("s/p/wifiLog/1700000000000.csv"), "1700000000000");
        assert_eq!(upload_timestamp("s/p/identifiers_1700000000000.csv"), "identifiers_1700000000000");
    }

    #[test]
    fn survey_ids() {
        assert_eq!(survey_id_from_path("s/p/surveyTimings/abc123/1.csv"), Some("abc123"));
        assert_eq!(survey_id_from_path("s/p/surveyAnswers/xyz/1.csv-duplicate-q"), Some("xyz"));
        assert_eq!(survey_id_from_path("1.csv"), None);
    }
}
