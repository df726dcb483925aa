// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Classification and hourly binning of decrypted uploads.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::fixes::prepare_csv;
use super::BinError;
use crate::codec::csv::{insert_header_column, leading_timestamp, Row};
use crate::codec::time::{human_readable_millis, TimestampPolicy};
use crate::models::{OsType, PendingFile};
use crate::storage::paths::survey_id_from_path;
use crate::streams::DataStream;

/// Name of the column inserted after the raw timestamp.
pub const UTC_COLUMN: &[u8] = b"UTC time";

/// What a decrypted file turned into.
#[derive(Debug)]
pub enum Classified {
    Chunkable(BinnedFile),
    /// Stored as a single object, never binned.
    Unchunkable(DataStream),
}

/// Rows of one file grouped by hour, all under the file's header.
#[derive(Debug)]
pub struct BinnedFile {
    pub stream: DataStream,
    pub header: Vec<u8>,
    pub hours: BTreeMap<i64, Vec<Row>>,
    /// Rows dropped for unusable timestamps.
    pub rows_dropped: usize,
    pub survey_id: Option<String>,
}

impl BinnedFile {
    pub fn row_count(&self) -> usize {
        self.hours.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }
}

/// Classify a decrypted upload and bin its rows by hour.
pub fn classify_and_bin(
    file: &PendingFile,
    plaintext: &[u8],
    policy: &TimestampPolicy,
) -> Result<Classified, BinError> {
    let stream = DataStream::from_upload_path(&file.storage_path)
        .ok_or_else(|| BinError::UnknownStream(file.storage_path.clone()))?;
    if !stream.is_chunkable() {
        return Ok(Classified::Unchunkable(stream));
    }
    bin_file(stream, file.os_type, &file.storage_path, plaintext, policy).map(Classified::Chunkable)
}

/// Reshape a chunkable stream's CSV and group its rows by hour.
///
/// Each kept row gains a `UTC time` column at index 1. Rows whose timestamp
/// fails validation or does not parse as a whole integer are dropped.
pub fn bin_file(
    stream: DataStream,
    os: OsType,
    upload_path: &str,
    plaintext: &[u8],
    policy: &TimestampPolicy,
) -> Result<BinnedFile, BinError> {
    let (header, rows) = prepare_csv(stream, os, upload_path, plaintext)?;
    let header = insert_header_column(&header, 1, UTC_COLUMN);

    let mut hours: BTreeMap<i64, Vec<Row>> = BTreeMap::new();
    let mut rows_dropped = 0;
    for mut row in rows {
        let Some(hour) = row_hour(&row, policy) else {
            rows_dropped += 1;
            continue;
        };
        let Some(utc) = leading_timestamp(&row).and_then(human_readable_millis) else {
            rows_dropped += 1;
            continue;
        };
        row.insert(1, utc.into_bytes());
        hours.entry(hour).or_default().push(row);
    }

    if rows_dropped > 0 {
        debug!(path = %upload_path, rows_dropped, "Dropped rows with unusable timestamps");
    }

    let survey_id = if stream.is_survey() {
        survey_id_from_path(upload_path).map(str::to_string)
    } else {
        None
    };

    Ok(BinnedFile {
        stream,
        header,
        hours,
        rows_dropped,
        survey_id,
    })
}

fn row_hour(row: &[Vec<u8>], policy: &TimestampPolicy) -> Option<i64> {
    policy.hour_index(row.first()?).ok()
}

// =============================================================================
// Page-wide bins
// =============================================================================

/// Identity of one bin. Differing headers for the same hour are separate bins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinKey {
    pub study_id: String,
    pub participant_id: String,
    pub stream: DataStream,
    pub hour_index: i64,
    pub header: Vec<u8>,
}

/// Rows of one bin and the pending files that contributed them.
#[derive(Debug, Default, Clone)]
pub struct DataBin {
    pub rows: Vec<Row>,
    pub file_ids: BTreeSet<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SurveyKey {
    study_id: String,
    participant_id: String,
    stream: DataStream,
    header: Vec<u8>,
}

/// Every bin that maps to one chunk path.
#[derive(Debug, Clone)]
pub struct ChunkBatch {
    pub study_id: String,
    pub participant_id: String,
    pub stream: DataStream,
    pub hour_index: i64,
    /// One entry per observed header, in header order.
    pub bins: Vec<(Vec<u8>, DataBin)>,
    pub survey_id: Option<String>,
}

impl ChunkBatch {
    /// Pending files contributing to any bin of this chunk.
    pub fn file_ids(&self) -> BTreeSet<u64> {
        self.bins
            .iter()
            .flat_map(|(_, bin)| bin.file_ids.iter().copied())
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.bins.iter().map(|(_, bin)| bin.rows.len()).sum()
    }
}

/// Bins accumulated across every file of a page.
#[derive(Debug, Default)]
pub struct BinSet {
    bins: BTreeMap<BinKey, DataBin>,
    survey_ids: HashMap<SurveyKey, String>,
}

impl BinSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn get(&self, key: &BinKey) -> Option<&DataBin> {
        self.bins.get(key)
    }

    /// Add a binned file's rows.
    pub fn absorb(&mut self, file: &PendingFile, binned: BinnedFile) {
        if let Some(survey_id) = binned.survey_id {
            self.survey_ids.insert(
                SurveyKey {
                    study_id: file.study_id.clone(),
                    participant_id: file.participant_id.clone(),
                    stream: binned.stream,
                    header: binned.header.clone(),
                },
                survey_id,
            );
        }

        for (hour_index, rows) in binned.hours {
            let key = BinKey {
                study_id: file.study_id.clone(),
                participant_id: file.participant_id.clone(),
                stream: binned.stream,
                hour_index,
                header: binned.header.clone(),
            };
            let bin = self.bins.entry(key).or_default();
            bin.rows.extend(rows);
            bin.file_ids.insert(file.id);
        }
    }

    /// Survey id recorded for a bin's (study, participant, stream, header).
    pub fn survey_id(&self, key: &BinKey) -> Option<&str> {
        self.survey_ids
            .get(&SurveyKey {
                study_id: key.study_id.clone(),
                participant_id: key.participant_id.clone(),
                stream: key.stream,
                header: key.header.clone(),
            })
            .map(String::as_str)
    }

    /// Group bins by chunk, so each chunk path is resolved exactly once.
    pub fn into_chunks(self) -> Vec<ChunkBatch> {
        let mut chunks: Vec<ChunkBatch> = Vec::new();
        let survey_ids = self.survey_ids;

        for (key, bin) in self.bins {
            let survey_id = survey_ids
                .get(&SurveyKey {
                    study_id: key.study_id.clone(),
                    participant_id: key.participant_id.clone(),
                    stream: key.stream,
                    header: key.header.clone(),
                })
                .cloned();

            // BTreeMap order keeps all headers of one chunk adjacent.
            match chunks.last_mut() {
                Some(last)
                    if last.study_id == key.study_id
                        && last.participant_id == key.participant_id
                        && last.stream == key.stream
                        && last.hour_index == key.hour_index =>
                {
                    if last.survey_id.is_none() {
                        last.survey_id = survey_id;
                    }
                    last.bins.push((key.header, bin));
                }
                _ => chunks.push(ChunkBatch {
                    study_id: key.study_id,
                    participant_id: key.participant_id,
                    stream: key.stream,
                    hour_index: key.hour_index,
                    bins: vec![(key.header, bin)],
                    survey_id,
                }),
            }
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn policy() -> TimestampPolicy {
        TimestampPolicy {
            earliest: crate::codec::time::EARLIEST_POSSIBLE_DATA_TIMESTAMP,
            latest: 1_800_000_000,
        }
    }

    fn pending(id: u64, path: &str, os: OsType) -> PendingFile {
        PendingFile {
            id,
            storage_path: path.to_string(),
            participant_id: "p1".to_string(),
            study_id: "s1".to_string(),
            os_type: os,
            created_at: Utc::now(),
        }
    }

    const GPS_HEADER: &str = "timestamp, latitude, longitude, altitude, accuracy";

    #[test]
    fn rows_split_on_hour_boundary() {
        // 1699999200 is an hour start; 3599 s later is the last second of the hour.
        let plaintext = format!(
            "{GPS_HEADER}\n1699999200000,1,2,3,4\n1700002799000,1,2,3,4\n1700002800000,1,2,3,4"
        );
        let binned = bin_file(
            DataStream::Gps,
            OsType::Android,
            "s1/p1/gps/1699999200000.csv",
            plaintext.as_bytes(),
            &policy(),
        )
        .unwrap();

        assert_eq!(binned.hours.len(), 2);
        assert_eq!(binned.hours[&472_222].len(), 2);
        assert_eq!(binned.hours[&472_223].len(), 1);
        assert_eq!(
            binned.header,
            b"timestamp,UTC time,latitude,longitude,altitude,accuracy"
        );
        assert_eq!(binned.hours[&472_222][0][1], b"2023-11-14T22:00:00.000");
    }

    #[test]
    fn bad_timestamps_drop_rows_not_files() {
        let plaintext = format!(
            "{GPS_HEADER}\n1700000000000,1,2,3,4\nnonsense,1,2,3,4\n1000000000000,1,2,3,4\n1900000000000,1,2,3,4\n17000000001x3,1,2,3,4"
        );
        let binned = bin_file(
            DataStream::Gps,
            OsType::Android,
            "s1/p1/gps/1.csv",
            plaintext.as_bytes(),
            &policy(),
        )
        .unwrap();
        assert_eq!(binned.row_count(), 1);
        assert_eq!(binned.rows_dropped, 4);
    }

    #[test]
    fn unchunkable_streams_are_not_binned() {
        let file = pending(1, "s1/p1/surveyAnswers/sv1/1700000000000.csv", OsType::Ios);
        let result = classify_and_bin(&file, b"q,a\n1,2", &policy()).unwrap();
        assert!(matches!(result, Classified::Unchunkable(DataStream::SurveyAnswers)));
    }

    #[test]
    fn unknown_paths_are_rejected() {
        let file = pending(1, "s1/p1/mystery/1700000000000.csv", OsType::Ios);
        assert!(matches!(
            classify_and_bin(&file, b"a\n1", &policy()),
            Err(BinError::UnknownStream(_))
        ));
    }

    #[test]
    fn bins_span_files_and_headers_split_bins() {
        let mut set = BinSet::new();
        let a = pending(1, "s1/p1/gps/1700000000000.csv", OsType::Android);
        let b = pending(2, "s1/p1/gps/1700000001000.csv", OsType::Android);
        let c = pending(3, "s1/p1/gps/1700000002000.csv", OsType::Android);

        for (file, header) in [(&a, GPS_HEADER), (&b, GPS_HEADER), (&c, "timestamp,lat,lon")] {
            let plaintext = format!("{header}\n1700000000000,1,2,3,4");
            match classify_and_bin(file, plaintext.as_bytes(), &policy()).unwrap() {
                Classified::Chunkable(binned) => set.absorb(file, binned),
                Classified::Unchunkable(_) => panic!("gps is chunkable"),
            }
        }
        assert_eq!(set.len(), 2);

        let chunks = set.into_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].bins.len(), 2);
        assert_eq!(chunks[0].file_ids(), BTreeSet::from([1, 2, 3]));
        assert_eq!(chunks[0].row_count(), 3);
    }

    #[test]
    fn survey_ids_follow_bins() {
        let mut set = BinSet::new();
        let file = pending(7, "s1/p1/surveyTimings/sv9/1700000000000.csv", OsType::Android);
        let plaintext = b"timestamp,question id,question type,question text,question answer options,answer\n1700000000000,q,radio,t,o,a";
        let Classified::Chunkable(binned) = classify_and_bin(&file, plaintext, &policy()).unwrap()
        else {
            panic!("survey timings are chunkable");
        };
        let header = binned.header.clone();
        set.absorb(&file, binned);

        let key = BinKey {
            study_id: "s1".into(),
            participant_id: "p1".into(),
            stream: DataStream::SurveyTimings,
            hour_index: 1_700_000_000 / 3600,
            header,
        };
        assert_eq!(set.survey_id(&key), Some("sv9"));
        assert_eq!(set.get(&key).unwrap().rows[0][3], b"sv9");

        let chunks = set.into_chunks();
        assert_eq!(chunks[0].survey_id.as_deref(), Some("sv9"));
    }
}
