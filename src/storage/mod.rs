// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistence used by the processing pipeline:
//!
//! - an [`ObjectStore`] holding raw uploads, merged chunks, participant keys
//!   and the audit log ([`FsObjectStore`] on local disk)
//! - a [`PendingFileStore`], [`ChunkRegistryStore`] and [`IosKeyStore`],
//!   all implemented by the redb-backed [`IngestDatabase`]
//! - [`PrivateKeySource`] resolving participant RSA keys
//! - [`AuditLog`] appending JSONL events per day
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   {study_id}/{patient_id}/{folder}/{ts}.csv     # raw uploads
//!   CHUNKED_DATA/{study_id}/{patient_id}/...      # merged hourly chunks
//!   keys/{study_id}/{patient_id}_private          # participant PEM keys
//!   AUDIT/{date}/events.jsonl                     # daily audit log
//!   ingest.redb                                   # registry, pending files, iOS keys
//! ```
//!
//! The store traits are synchronous; callers on the async side go through
//! the worker pool or `spawn_blocking`.

pub mod audit;
pub mod database;
pub mod keys;
pub mod object_store;
pub mod paths;

pub use audit::{AuditEvent, AuditEventType, AuditLog};
pub use database::{DbError, DbResult, IngestDatabase};
pub use keys::{PrivateKeySource, StoredPrivateKeys};
pub use object_store::{FsObjectStore, ObjectStore, StorageError, StorageResult};

use crate::models::{ChunkRegistryEntry, Participant, PendingFile};

/// Uploaded files waiting to be merged.
pub trait PendingFileStore: Send + Sync {
    /// Record a new upload (done by upload intake).
    fn create_pending(&self, participant: &Participant, storage_path: &str) -> DbResult<PendingFile>;

    /// Ids of a participant's pending files, ordered by storage path.
    fn pending_ids_for_participant(&self, patient_id: &str) -> DbResult<Vec<u64>>;

    /// Fetch files by id; ids that no longer exist are skipped.
    fn get_pending(&self, ids: &[u64]) -> DbResult<Vec<PendingFile>>;

    /// Delete files by id, returning how many existed.
    fn delete_pending(&self, ids: &[u64]) -> DbResult<usize>;

    /// Every participant with at least one pending file.
    fn participants_with_pending(&self) -> DbResult<Vec<Participant>>;
}

/// Metadata about stored chunks.
pub trait ChunkRegistryStore: Send + Sync {
    fn get_chunk(&self, storage_path: &str) -> DbResult<Option<ChunkRegistryEntry>>;

    /// Insert a new entry; [`DbError::AlreadyExists`] if the path is taken.
    fn create_chunk(&self, entry: &ChunkRegistryEntry) -> DbResult<()>;

    /// Replace hash and size of an existing entry.
    fn update_chunk(
        &self,
        storage_path: &str,
        content_hash: &str,
        byte_size: u64,
    ) -> DbResult<ChunkRegistryEntry>;

    /// Remove an entry, returning whether it existed.
    fn delete_chunk(&self, storage_path: &str) -> DbResult<bool>;

    fn chunks_for_participant(&self, patient_id: &str) -> DbResult<Vec<ChunkRegistryEntry>>;
}

/// Persisted iOS per-file AES keys.
pub trait IosKeyStore: Send + Sync {
    fn get_ios_key(&self, upload_path: &str) -> DbResult<Option<String>>;

    /// Store a key unless one exists; returns the existing key if so.
    fn insert_ios_key(&self, upload_path: &str, key_b64: &str) -> DbResult<Option<String>>;
}
