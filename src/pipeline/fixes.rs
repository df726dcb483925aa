// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stream-specific structural repairs.
//!
//! Some device formats are not quite timestamp-first CSV. These transforms
//! bring every chunkable stream to `timestamp,<columns>` before binning.

use super::BinError;
use crate::codec::csv::{clean_header, insert_header_column, is_empty_row, split_csv, Row};
use crate::models::OsType;
use crate::storage::paths::{survey_id_from_path, upload_timestamp};
use crate::streams::{DataStream, Fixup};

/// Split decrypted contents into header and rows, applying the stream's fixup.
pub fn prepare_csv(
    stream: DataStream,
    os: OsType,
    upload_path: &str,
    contents: &[u8],
) -> Result<(Vec<u8>, Vec<Row>), BinError> {
    let fixup = stream.spec().fixup;
    let android = os == OsType::Android;

    let (mut header, mut rows) = if android && fixup == Fixup::AndroidLog {
        let reshaped = fix_app_log(contents, upload_path);
        split_csv(&reshaped)
    } else {
        split_csv(contents)
    };

    match fixup {
        Fixup::CallLog if android => header = fix_call_log(&header, &mut rows),
        Fixup::Wifi if android => header = fix_wifi(&header, &mut rows, upload_path),
        Fixup::Identifiers => header = fix_identifiers(&header, &mut rows, upload_path)?,
        Fixup::SurveyTimings => header = fix_survey_timings(&header, &mut rows, upload_path)?,
        _ => {}
    }

    Ok((clean_header(&header), rows))
}

/// Reshape the Android app log into `timestamp,event` CSV.
///
/// The first line is a fixed legacy banner. Every other line is
/// `<unix_ms> <free text>`; commas in the text become `;`.
fn fix_app_log(contents: &[u8], upload_path: &str) -> Vec<u8> {
    let file_timestamp = upload_timestamp(upload_path).as_bytes();

    let mut out = b"timestamp,event\n".to_vec();
    out.extend_from_slice(file_timestamp);
    out.extend_from_slice(b",New app log file created");

    let lines = contents
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .skip(1);
    for line in lines {
        let Some(space) = line.iter().position(|b| *b == b' ') else {
            continue;
        };
        let (timestamp, event) = (&line[..space], &line[space + 1..]);
        out.push(b'\n');
        out.extend_from_slice(timestamp);
        out.push(b',');
        out.extend(event.iter().map(|b| if *b == b',' { b';' } else { *b }));
    }
    out
}

/// Android call logs write the timestamp third; move it to the front.
fn fix_call_log(header: &[u8], rows: &mut [Row]) -> Vec<u8> {
    for row in rows.iter_mut() {
        if row.len() > 2 {
            let timestamp = row.remove(2);
            row.insert(0, timestamp);
        }
    }
    let mut columns: Vec<&[u8]> = header.split(|b| *b == b',').collect();
    if columns.len() > 2 {
        let timestamp = columns.remove(2);
        columns.insert(0, timestamp);
    }
    columns.join(&b","[..])
}

/// Android wifi scans have no timestamp column; use the file's timestamp.
fn fix_wifi(header: &[u8], rows: &mut Vec<Row>, upload_path: &str) -> Vec<u8> {
    let file_timestamp = upload_timestamp(upload_path).as_bytes().to_vec();
    rows.retain(|row| !is_empty_row(row));
    for row in rows.iter_mut() {
        row.insert(0, file_timestamp.clone());
    }
    insert_header_column(header, 0, b"timestamp")
}

/// Identifier files are one row named `identifiers_<unix_ms>.csv`.
fn fix_identifiers(header: &[u8], rows: &mut [Row], upload_path: &str) -> Result<Vec<u8>, BinError> {
    let stem = upload_timestamp(upload_path);
    let timestamp = stem.rsplit_once('_').map_or(stem, |(_, ts)| ts);
    let first = rows
        .first_mut()
        .ok_or_else(|| BinError::IdentifiersWithoutRows(upload_path.to_string()))?;
    first.insert(0, timestamp.as_bytes().to_vec());
    Ok(insert_header_column(header, 0, b"timestamp"))
}

/// Survey timings carry their survey id only in the upload path.
fn fix_survey_timings(header: &[u8], rows: &mut [Row], upload_path: &str) -> Result<Vec<u8>, BinError> {
    let survey_id = survey_id_from_path(upload_path)
        .ok_or_else(|| BinError::MissingSurveyId(upload_path.to_string()))?
        .as_bytes()
        .to_vec();
    for row in rows.iter_mut() {
        let index = row.len().min(2);
        row.insert(index, survey_id.clone());
    }
    Ok(insert_header_column(header, 2, b"survey id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::csv::split_row;

    fn rows(lines: &[&str]) -> Vec<Row> {
        lines.iter().map(|l| split_row(l.as_bytes())).collect()
    }

    #[test]
    fn android_call_log_timestamp_first() {
        let contents = b"hashed phone number,call type,timestamp,duration in seconds\nabc,Incoming Call,1700000000000,42";
        let (header, out) =
            prepare_csv(DataStream::Calls, OsType::Android, "s/p/callLog/1700000000000.csv", contents)
                .unwrap();
        assert_eq!(header, b"timestamp,hashed phone number,call type,duration in seconds");
        assert_eq!(out, rows(&["1700000000000,abc,Incoming Call,42"]));
    }

    #[test]
    fn ios_call_log_untouched() {
        let contents = b"a,b,c\n1,2,3";
        let (header, out) =
            prepare_csv(DataStream::Calls, OsType::Ios, "s/p/callLog/1.csv", contents).unwrap();
        assert_eq!(header, b"a,b,c");
        assert_eq!(out, rows(&["1,2,3"]));
    }

    #[test]
    fn wifi_gets_file_timestamp() {
        let contents = b"hashed MAC, frequency, RSSI\nm1,2412,-40\n\nm2,5180,-70\n";
        let (header, out) =
            prepare_csv(DataStream::Wifi, OsType::Android, "s/p/wifiLog/1700000000000.csv", contents)
                .unwrap();
        assert_eq!(header, b"timestamp,hashed MAC,frequency,RSSI");
        assert_eq!(
            out,
            rows(&["1700000000000,m1,2412,-40", "1700000000000,m2,5180,-70"])
        );
    }

    #[test]
    fn identifiers_get_name_timestamp() {
        let contents = b"patient_id,MAC\np1,mac";
        let (header, out) = prepare_csv(
            DataStream::Identifiers,
            OsType::Ios,
            "s/p/identifiers_1700000000000.csv",
            contents,
        )
        .unwrap();
        assert_eq!(header, b"timestamp,patient_id,MAC");
        assert_eq!(out, rows(&["1700000000000,p1,mac"]));
    }

    #[test]
    fn identifiers_without_rows_fail() {
        let result = prepare_csv(
            DataStream::Identifiers,
            OsType::Android,
            "s/p/identifiers_1700000000000.csv",
            b"patient_id,MAC",
        );
        assert!(matches!(result, Err(BinError::IdentifiersWithoutRows(_))));
    }

    #[test]
    fn survey_timings_get_survey_id() {
        let contents = b"timestamp,question id,question type,question text,question answer options,answer\n1700000000000,q1,radio,How?,a;b,a";
        let (header, out) = prepare_csv(
            DataStream::SurveyTimings,
            OsType::Android,
            "s/p/surveyTimings/sv42/1700000000000.csv",
            contents,
        )
        .unwrap();
        assert_eq!(
            header,
            b"timestamp,question id,survey id,question type,question text,question answer options,answer"
        );
        assert_eq!(out, rows(&["1700000000000,q1,sv42,radio,How?,a;b,a"]));
    }

    #[test]
    fn android_log_becomes_csv() {
        let contents = b"THIS LINE IS A LOG FILE HEADER\n1700000001000 screen on, user present\n1700000002000 screen off";
        let (header, out) = prepare_csv(
            DataStream::AndroidLog,
            OsType::Android,
            "s/p/logFile/1700000000000.csv",
            contents,
        )
        .unwrap();
        assert_eq!(header, b"timestamp,event");
        assert_eq!(
            out,
            rows(&[
                "1700000000000,New app log file created",
                "1700000001000,screen on; user present",
                "1700000002000,screen off",
            ])
        );
    }

    #[test]
    fn header_whitespace_trimmed_for_plain_streams() {
        let contents = b"timestamp, latitude, longitude, altitude, accuracy\n1,2,3,4,5";
        let (header, _) =
            prepare_csv(DataStream::Gps, OsType::Android, "s/p/gps/1.csv", contents).unwrap();
        assert_eq!(header, b"timestamp,latitude,longitude,altitude,accuracy");
    }
}
