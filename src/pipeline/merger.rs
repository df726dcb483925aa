// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Chunk Merger
//!
//! Resolves one [`ChunkBatch`] against storage:
//!
//! - **Create**: no registry entry at the chunk path. New rows are sorted,
//!   de-duplicated and serialized under the canonical header.
//! - **Merge**: an entry exists. The stored chunk is downloaded, its header
//!   checked against the new rows, both row sets concatenated and re-sorted,
//!   and the existing entry is updated in place.
//!
//! Headers must equal the canonical header for (stream, OS). When two sides
//! disagree the canonical side wins; when no side is canonical the chunk
//! fails and nothing is written.
//!
//! A registry entry whose object has disappeared is deleted so the next run
//! recreates the chunk.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::binner::ChunkBatch;
use super::MergeError;
use crate::codec::base64::encode_base64;
use crate::codec::compress::{compress, decompress};
use crate::codec::csv::{construct_csv, sort_by_timestamp, split_csv, Row};
use crate::models::{ChunkRegistryEntry, OsType};
use crate::storage::paths::chunk_path;
use crate::storage::{ChunkRegistryStore, ObjectStore};

/// How an [`UploadTask`] commits to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// New entry; an existing one at the same path is a conflict.
    Create,
    /// Hash and size of an existing entry.
    Update,
    /// Create, or update if the path is already registered.
    Upsert,
}

/// A compressed payload plus the registry change that goes with it.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub kind: UploadKind,
    pub entry: ChunkRegistryEntry,
    pub payload: Vec<u8>,
    /// Incoming rows this task carries.
    pub rows: usize,
}

/// URL-safe base64 SHA-256 of uncompressed content.
pub fn content_hash(content: &[u8]) -> String {
    encode_base64(&Sha256::digest(content))
}

/// Accept a lone header only if it is canonical.
pub fn validate_one_header(path: &str, header: &[u8], reference: &[u8]) -> Result<(), MergeError> {
    if header == reference {
        Ok(())
    } else {
        Err(header_mismatch(path, header))
    }
}

/// Pick the header to keep when two sides meet.
///
/// Equal headers pass through unchanged (canonicity is checked once at the
/// end by [`validate_one_header`]); otherwise the canonical side wins.
pub fn validate_two_headers<'a>(
    path: &str,
    first: &'a [u8],
    second: &'a [u8],
    reference: &[u8],
) -> Result<&'a [u8], MergeError> {
    if first == second || first == reference {
        Ok(first)
    } else if second == reference {
        Ok(second)
    } else {
        Err(header_mismatch(path, second))
    }
}

fn header_mismatch(path: &str, header: &[u8]) -> MergeError {
    MergeError::HeaderMismatch {
        path: path.to_string(),
        header: String::from_utf8_lossy(header).into_owned(),
    }
}

/// Resolves chunk batches against the object store and registry.
#[derive(Clone)]
pub struct ChunkMerger {
    objects: Arc<dyn ObjectStore>,
    registry: Arc<dyn ChunkRegistryStore>,
}

impl ChunkMerger {
    pub fn new(objects: Arc<dyn ObjectStore>, registry: Arc<dyn ChunkRegistryStore>) -> Self {
        Self { objects, registry }
    }

    /// Build the upload task for one chunk.
    pub fn resolve(&self, batch: &ChunkBatch, os: OsType) -> Result<UploadTask, MergeError> {
        let path = chunk_path(
            &batch.study_id,
            &batch.participant_id,
            batch.stream,
            batch.hour_index,
        )
        .ok_or(MergeError::HourOutOfRange(batch.hour_index))?;
        let reference = batch
            .stream
            .reference_header(os)
            .ok_or(MergeError::Unchunkable(batch.stream))?
            .as_bytes();

        match self.registry.get_chunk(&path)? {
            None => self.create(path, batch, reference),
            Some(entry) => self.merge(entry, batch, reference),
        }
    }

    fn create(&self, path: String, batch: &ChunkBatch, reference: &[u8]) -> Result<UploadTask, MergeError> {
        let header = resolve_headers(&path, None, batch, reference)?.to_vec();
        let rows = incoming_rows(batch);
        debug!(path = %path, rows = rows.len(), "Creating chunk");

        let content = sorted_csv(&header, rows);
        let entry = ChunkRegistryEntry {
            storage_path: path,
            study_id: batch.study_id.clone(),
            participant_id: batch.participant_id.clone(),
            data_stream: batch.stream,
            hour_index: batch.hour_index,
            content_hash: content_hash(&content),
            byte_size: content.len() as u64,
            survey_id: batch.survey_id.clone(),
            is_chunkable: true,
            last_updated: Utc::now(),
        };

        Ok(UploadTask {
            kind: UploadKind::Create,
            payload: compress(&content)?,
            entry,
            rows: batch.row_count(),
        })
    }

    fn merge(
        &self,
        existing: ChunkRegistryEntry,
        batch: &ChunkBatch,
        reference: &[u8],
    ) -> Result<UploadTask, MergeError> {
        let path = existing.storage_path.clone();
        let stored = match self.objects.get(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                self.registry.delete_chunk(&path)?;
                return Err(MergeError::ChunkVanished(path));
            }
            Err(e) => return Err(e.into()),
        };

        let (old_header, old_rows) = split_csv(&decompress(&stored)?);
        let header = resolve_headers(&path, Some(old_header.as_slice()), batch, reference)?.to_vec();
        debug!(path = %path, old_rows = old_rows.len(), new_rows = batch.row_count(), "Merging chunk");

        let mut rows = old_rows;
        rows.extend(incoming_rows(batch));
        let content = sorted_csv(&header, rows);

        let entry = ChunkRegistryEntry {
            content_hash: content_hash(&content),
            byte_size: content.len() as u64,
            survey_id: existing.survey_id.clone().or_else(|| batch.survey_id.clone()),
            last_updated: Utc::now(),
            ..existing
        };

        Ok(UploadTask {
            kind: UploadKind::Update,
            payload: compress(&content)?,
            entry,
            rows: batch.row_count(),
        })
    }
}

/// Fold the stored header (if any) and every incoming header into one.
fn resolve_headers<'a>(
    path: &str,
    stored: Option<&'a [u8]>,
    batch: &'a ChunkBatch,
    reference: &[u8],
) -> Result<&'a [u8], MergeError> {
    let mut headers = stored
        .into_iter()
        .chain(batch.bins.iter().map(|(header, _)| header.as_slice()));

    let Some(mut kept) = headers.next() else {
        return Err(header_mismatch(path, b""));
    };
    for header in headers {
        kept = validate_two_headers(path, kept, header, reference)?;
    }
    validate_one_header(path, kept, reference)?;
    Ok(kept)
}

fn incoming_rows(batch: &ChunkBatch) -> Vec<Row> {
    batch
        .bins
        .iter()
        .flat_map(|(_, bin)| bin.rows.iter().cloned())
        .collect()
}

fn sorted_csv(header: &[u8], mut rows: Vec<Row>) -> Vec<u8> {
    sort_by_timestamp(&mut rows);
    construct_csv(header, &rows)
}
