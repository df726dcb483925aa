// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Minimal CSV tokenizer and writer.
//!
//! Device files never quote fields, so a row is simply the bytes between
//! newlines split on commas. Rows keep their raw bytes.

use std::collections::HashSet;

/// One CSV row as raw column values.
pub type Row = Vec<Vec<u8>>;

/// Split file contents into a header line and rows.
///
/// A file without any newline is treated as a bare header with no rows.
/// Trailing `\r` is removed from every line.
pub fn split_csv(contents: &[u8]) -> (Vec<u8>, Vec<Row>) {
    if !contents.contains(&b'\n') {
        return (trim_cr(contents).to_vec(), Vec::new());
    }

    let mut lines = contents.split(|b| *b == b'\n').map(trim_cr);
    let header = lines.next().unwrap_or_default().to_vec();
    let mut rows: Vec<Row> = lines.map(split_row).collect();

    // A terminating newline leaves one empty trailing line behind.
    if rows.last().is_some_and(|row| is_empty_row(row)) {
        rows.pop();
    }
    (header, rows)
}

/// Split a single line on commas.
pub fn split_row(line: &[u8]) -> Row {
    line.split(|b| *b == b',').map(<[u8]>::to_vec).collect()
}

/// Join a row back into a line.
pub fn join_row(row: &[Vec<u8>]) -> Vec<u8> {
    row.join(&b","[..])
}

/// True for rows produced by blank lines.
pub fn is_empty_row(row: &[Vec<u8>]) -> bool {
    row.iter().all(|value| value.is_empty())
}

/// Trim surrounding whitespace from every header column.
pub fn clean_header(header: &[u8]) -> Vec<u8> {
    header
        .split(|b| *b == b',')
        .map(<[u8]>::trim_ascii)
        .collect::<Vec<_>>()
        .join(&b","[..])
}

/// Insert a column name into a header at `index` (clamped to the end).
pub fn insert_header_column(header: &[u8], index: usize, name: &[u8]) -> Vec<u8> {
    let mut columns: Vec<&[u8]> = header.split(|b| *b == b',').collect();
    let index = index.min(columns.len());
    columns.insert(index, name);
    columns.join(&b","[..])
}

/// Serialize `header` and `rows`, dropping duplicate rows.
///
/// Duplicates are detected on the joined row text; the first occurrence wins
/// and row order is otherwise preserved. The output has no trailing newline.
pub fn construct_csv(header: &[u8], rows: &[Row]) -> Vec<u8> {
    let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(rows.len());
    let mut out = Vec::with_capacity(header.len() + rows.len() * 32);
    out.extend_from_slice(header);
    out.push(b'\n');

    let mut first = true;
    for row in rows {
        let line = join_row(row);
        if !seen.insert(line.clone()) {
            continue;
        }
        if !first {
            out.push(b'\n');
        }
        out.extend_from_slice(&line);
        first = false;
    }
    out
}

/// Parse the leading column of a row as a full integer timestamp.
pub fn leading_timestamp(row: &[Vec<u8>]) -> Option<i64> {
    let first = row.first()?;
    std::str::from_utf8(first).ok()?.trim().parse().ok()
}

/// Stable sort by the leading integer timestamp.
///
/// Rows whose first column is not an integer are removed first, so the sort
/// itself never fails.
pub fn sort_by_timestamp(rows: &mut Vec<Row>) {
    rows.retain(|row| leading_timestamp(row).is_some());
    rows.sort_by_key(|row| leading_timestamp(row).unwrap_or(i64::MIN));
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Row {
        values.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[test]
    fn split_header_and_rows() {
        let (header, rows) = split_csv(b"timestamp,x\r\n1,2\n3,4\n");
        assert_eq!(header, b"timestamp,x");
        assert_eq!(rows, vec![row(&["1", "2"]), row(&["3", "4"])]);
    }

    #[test]
    fn single_line_is_header_only() {
        let (header, rows) = split_csv(b"timestamp,x");
        assert_eq!(header, b"timestamp,x");
        assert!(rows.is_empty());
    }

    #[test]
    fn header_whitespace_is_trimmed() {
        assert_eq!(
            clean_header(b"timestamp, latitude , longitude"),
            b"timestamp,latitude,longitude"
        );
    }

    #[test]
    fn insert_column_into_header() {
        assert_eq!(
            insert_header_column(b"timestamp,x,y", 1, b"UTC time"),
            b"timestamp,UTC time,x,y"
        );
        assert_eq!(insert_header_column(b"a", 5, b"b"), b"a,b");
    }

    #[test]
    fn construct_deduplicates_preserving_order() {
        let rows = vec![row(&["2", "b"]), row(&["1", "a"]), row(&["2", "b"])];
        assert_eq!(construct_csv(b"t,v", &rows), b"t,v\n2,b\n1,a");
    }

    #[test]
    fn construct_with_no_rows() {
        assert_eq!(construct_csv(b"t,v", &[]), b"t,v\n");
    }

    #[test]
    fn sort_drops_unparsable_rows() {
        let mut rows = vec![
            row(&["300", "c"]),
            row(&["garbage", "x"]),
            row(&["100", "a"]),
            row(&["200", "b"]),
            row(&["100", "a2"]),
        ];
        sort_by_timestamp(&mut rows);
        assert_eq!(
            rows,
            vec![
                row(&["100", "a"]),
                row(&["100", "a2"]),
                row(&["200", "b"]),
                row(&["300", "c"]),
            ]
        );
    }
}
