// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device timestamp handling.
//!
//! Devices write unix milliseconds. Only the first ten digits (whole seconds)
//! are used for validation and hour binning; the full value feeds the
//! human-readable `UTC time` column.

use chrono::{DateTime, Duration, Utc};

use super::{CodecError, CodecResult};

/// No study data predates 2014-08-01T00:00:00Z.
pub const EARLIEST_POSSIBLE_DATA_TIMESTAMP: i64 = 1_406_851_200;

/// Width of one chunk in seconds.
pub const CHUNK_TIMESLICE_QUANTUM: i64 = 3600;

/// Format used for chunk file names and the `UTC time` column.
pub const API_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Accepted range of row timestamps, in unix seconds: `[earliest, latest)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampPolicy {
    pub earliest: i64,
    pub latest: i64,
}

impl TimestampPolicy {
    /// Policy for a run starting at `now`, accepting data up to `horizon_days` ahead.
    pub fn from_now(now: DateTime<Utc>, horizon_days: i64) -> Self {
        Self {
            earliest: EARLIEST_POSSIBLE_DATA_TIMESTAMP,
            latest: (now + Duration::days(horizon_days)).timestamp(),
        }
    }

    /// Validate a raw timecode and return its value in unix seconds.
    ///
    /// The first ten bytes must be ASCII digits; anything past them
    /// (milliseconds) is ignored.
    pub fn clean_timecode(&self, raw: &[u8]) -> CodecResult<i64> {
        let seconds = leading_seconds(raw).ok_or_else(|| {
            CodecError::Timecode(format!(
                "not a timestamp: {:?}",
                String::from_utf8_lossy(raw)
            ))
        })?;

        if seconds < self.earliest {
            return Err(CodecError::Timecode("data too early".into()));
        }
        if seconds >= self.latest {
            return Err(CodecError::Timecode("data too late".into()));
        }
        Ok(seconds)
    }

    /// Hour bin of a raw timecode.
    pub fn hour_index(&self, raw: &[u8]) -> CodecResult<i64> {
        Ok(self.clean_timecode(raw)? / CHUNK_TIMESLICE_QUANTUM)
    }
}

fn leading_seconds(raw: &[u8]) -> Option<i64> {
    let digits = raw.get(..10)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Render unix seconds as `%Y-%m-%dT%H:%M:%S`.
pub fn unix_time_to_string(seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(seconds, 0).map(|dt| dt.format(API_TIME_FORMAT).to_string())
}

/// Render unix milliseconds as `%Y-%m-%dT%H:%M:%S.mmm`.
pub fn human_readable_millis(millis: i64) -> Option<String> {
    let base = unix_time_to_string(millis.div_euclid(1000))?;
    Some(format!("{base}.{:03}", millis.rem_euclid(1000)))
}

/// Start of an hour bin, formatted for chunk file names.
pub fn hour_to_string(hour_index: i64) -> Option<String> {
    unix_time_to_string(hour_index.checked_mul(CHUNK_TIMESLICE_QUANTUM)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TimestampPolicy {
        TimestampPolicy {
            earliest: EARLIEST_POSSIBLE_DATA_TIMESTAMP,
            latest: 1_800_000_000,
        }
    }

    #[test]
    fn millis_are_truncated_to_seconds() {
        assert_eq!(policy().clean_timecode(b"1700000000123").unwrap(), 1_700_000_000);
        assert_eq!(policy().clean_timecode(b"1700000000").unwrap(), 1_700_000_000);
    }

    #[test]
    fn short_or_non_numeric_timecodes_are_rejected() {
        assert!(policy().clean_timecode(b"170000000").is_err());
        assert!(policy().clean_timecode(b"17000x0000123").is_err());
        assert!(policy().clean_timecode(b"").is_err());
    }

    #[test]
    fn bounds_are_half_open() {
        let p = policy();
        assert!(p.clean_timecode(b"1406851200").is_ok());
        assert!(p.clean_timecode(b"1406851199").is_err());
        assert!(p.clean_timecode(b"1799999999").is_ok());
        assert!(p.clean_timecode(b"1800000000").is_err());
    }

    #[test]
    fn hour_boundaries() {
        let p = policy();
        // 1700002800 is the first second of hour 472223
        assert_eq!(p.hour_index(b"1700002799000").unwrap(), 472_222);
        assert_eq!(p.hour_index(b"1700002800000").unwrap(), 472_223);
    }

    #[test]
    fn policy_from_now() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let p = TimestampPolicy::from_now(now, 90);
        assert_eq!(p.latest, 1_700_000_000 + 90 * 86_400);
        assert_eq!(p.earliest, EARLIEST_POSSIBLE_DATA_TIMESTAMP);
    }

    #[test]
    fn human_readable_formats() {
        assert_eq!(unix_time_to_string(0).unwrap(), "1970-01-01T00:00:00");
        assert_eq!(human_readable_millis(1_700_000_000_007).unwrap(), "2023-11-14T22:13:20.007");
        assert_eq!(hour_to_string(472_222).unwrap(), "2023-11-14T22:00:00");
    }
}
