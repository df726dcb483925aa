// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Usage accounting reported with each run.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use super::merger::UploadTask;
use crate::codec::time::CHUNK_TIMESLICE_QUANTUM;
use crate::models::{ChunkRegistryEntry, DailyUsage, ProcessingSummary};

/// Fold one committed task into the run summary.
pub fn record_upload(summary: &mut ProcessingSummary, task: &UploadTask) {
    summary.rows_written += task.rows;
    summary.bytes_written += task.entry.byte_size;
    *summary
        .bytes_by_stream
        .entry(task.entry.data_stream)
        .or_default() += task.entry.byte_size;
    summary.observe_hour(task.entry.hour_index);
}

/// Stored bytes per UTC day and stream for entries within `[first_hour, last_hour]`.
pub fn daily_usage(entries: &[ChunkRegistryEntry], first_hour: i64, last_hour: i64) -> Vec<DailyUsage> {
    let mut totals: BTreeMap<(NaiveDate, _), u64> = BTreeMap::new();
    for entry in entries {
        if entry.hour_index < first_hour || entry.hour_index > last_hour {
            continue;
        }
        let Some(date) = hour_date(entry.hour_index) else {
            continue;
        };
        *totals.entry((date, entry.data_stream)).or_default() += entry.byte_size;
    }

    totals
        .into_iter()
        .map(|((date, data_stream), bytes)| DailyUsage {
            date,
            data_stream,
            bytes,
        })
        .collect()
}

fn hour_date(hour_index: i64) -> Option<NaiveDate> {
    let seconds = hour_index.checked_mul(CHUNK_TIMESLICE_QUANTUM)?;
    DateTime::<Utc>::from_timestamp(seconds, 0).map(|dt| dt.date_naive())
}
