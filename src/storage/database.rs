// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ingest database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `chunk_registry`: storage_path → serialized ChunkRegistryEntry
//! - `registry_by_participant`: composite key (patient_id|storage_path) → storage_path
//! - `pending_files`: id → serialized PendingFile
//! - `pending_by_participant`: composite key (patient_id|storage_path|id_be) → id
//! - `ios_keys`: normalized upload path → base64 AES key
//! - `meta`: key → u64 (id counters)
//!
//! Every check-then-write (registry create, iOS key insert) happens inside a
//! single write transaction, so concurrent callers observe a conflict instead
//! of overwriting each other.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{ChunkRegistryStore, IosKeyStore, PendingFileStore};
use crate::models::{ChunkRegistryEntry, Participant, PendingFile};

// =============================================================================
// Table Definitions
// =============================================================================

const CHUNK_REGISTRY: TableDefinition<&str, &[u8]> = TableDefinition::new("chunk_registry");

const REGISTRY_BY_PARTICIPANT: TableDefinition<&[u8], &str> =
    TableDefinition::new("registry_by_participant");

const PENDING_FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("pending_files");

/// Key format: `patient_id|storage_path|id_be` so a prefix scan yields a
/// participant's files ordered by path.
const PENDING_BY_PARTICIPANT: TableDefinition<&[u8], u64> =
    TableDefinition::new("pending_by_participant");

const IOS_KEYS: TableDefinition<&str, &str> = TableDefinition::new("ios_keys");

const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_PENDING_ID: &str = "next_pending_id";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database directory error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

const SEPARATOR: u8 = b'|';

fn make_registry_key(patient_id: &str, storage_path: &str) -> Vec<u8> {
    let mut key = make_prefix(patient_id);
    key.extend_from_slice(storage_path.as_bytes());
    key
}

fn make_pending_key(patient_id: &str, storage_path: &str, id: u64) -> Vec<u8> {
    let mut key = make_prefix(patient_id);
    key.extend_from_slice(storage_path.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Prefix shared by every index key of a participant.
fn make_prefix(patient_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(patient_id.len() + 64);
    prefix.extend_from_slice(patient_id.as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

/// Exclusive upper bound of a participant's prefix range.
fn make_prefix_end(patient_id: &str) -> Vec<u8> {
    let mut end = Vec::with_capacity(patient_id.len() + 1);
    end.extend_from_slice(patient_id.as_bytes());
    end.push(SEPARATOR + 1);
    end
}

// =============================================================================
// IngestDatabase
// =============================================================================

/// Registry, pending-file and iOS key store in one redb file.
pub struct IngestDatabase {
    db: Database,
}

impl IngestDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CHUNK_REGISTRY)?;
            let _ = write_txn.open_table(REGISTRY_BY_PARTICIPANT)?;
            let _ = write_txn.open_table(PENDING_FILES)?;
            let _ = write_txn.open_table(PENDING_BY_PARTICIPANT)?;
            let _ = write_txn.open_table(IOS_KEYS)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

// =============================================================================
// Pending files
// =============================================================================

impl PendingFileStore for IngestDatabase {
    fn create_pending(&self, participant: &Participant, storage_path: &str) -> DbResult<PendingFile> {
        let write_txn = self.db.begin_write()?;
        let file = {
            let mut meta = write_txn.open_table(META)?;
            let id = meta.get(NEXT_PENDING_ID)?.map(|v| v.value()).unwrap_or(1);
            meta.insert(NEXT_PENDING_ID, id + 1)?;

            let file = PendingFile {
                id,
                storage_path: storage_path.to_string(),
                participant_id: participant.patient_id.clone(),
                study_id: participant.study_id.clone(),
                os_type: participant.os_type,
                created_at: Utc::now(),
            };
            let json = serde_json::to_vec(&file)?;

            let mut files = write_txn.open_table(PENDING_FILES)?;
            files.insert(id, json.as_slice())?;

            let mut index = write_txn.open_table(PENDING_BY_PARTICIPANT)?;
            let key = make_pending_key(&participant.patient_id, storage_path, id);
            index.insert(key.as_slice(), id)?;
            file
        };
        write_txn.commit()?;
        Ok(file)
    }

    fn pending_ids_for_participant(&self, patient_id: &str) -> DbResult<Vec<u64>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(PENDING_BY_PARTICIPANT)?;

        let prefix = make_prefix(patient_id);
        let prefix_end = make_prefix_end(patient_id);

        let mut ids = Vec::new();
        for entry in index.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (_, id) = entry?;
            ids.push(id.value());
        }
        Ok(ids)
    }

    fn get_pending(&self, ids: &[u64]) -> DbResult<Vec<PendingFile>> {
        let read_txn = self.db.begin_read()?;
        let files = read_txn.open_table(PENDING_FILES)?;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = files.get(*id)? {
                out.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(out)
    }

    fn delete_pending(&self, ids: &[u64]) -> DbResult<usize> {
        let write_txn = self.db.begin_write()?;
        let mut removed = 0;
        {
            let mut files = write_txn.open_table(PENDING_FILES)?;
            let mut index = write_txn.open_table(PENDING_BY_PARTICIPANT)?;
            for id in ids {
                let existing = files.remove(*id)?.map(|v| v.value().to_vec());
                let Some(bytes) = existing else {
                    continue;
                };
                let file: PendingFile = serde_json::from_slice(&bytes)?;
                let key = make_pending_key(&file.participant_id, &file.storage_path, file.id);
                index.remove(key.as_slice())?;
                removed += 1;
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    fn participants_with_pending(&self) -> DbResult<Vec<Participant>> {
        let read_txn = self.db.begin_read()?;
        let files = read_txn.open_table(PENDING_FILES)?;

        let mut participants: BTreeMap<String, Participant> = BTreeMap::new();
        for entry in files.iter()? {
            let (_, value) = entry?;
            let file: PendingFile = serde_json::from_slice(value.value())?;
            participants
                .entry(file.participant_id.clone())
                .or_insert_with(|| Participant::new(file.participant_id, file.study_id, file.os_type));
        }
        Ok(participants.into_values().collect())
    }
}

// =============================================================================
// Chunk registry
// =============================================================================

impl ChunkRegistryStore for IngestDatabase {
    fn get_chunk(&self, storage_path: &str) -> DbResult<Option<ChunkRegistryEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHUNK_REGISTRY)?;
        match table.get(storage_path)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn create_chunk(&self, entry: &ChunkRegistryEntry) -> DbResult<()> {
        let json = serde_json::to_vec(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CHUNK_REGISTRY)?;
            if table.get(entry.storage_path.as_str())?.is_some() {
                return Err(DbError::AlreadyExists(entry.storage_path.clone()));
            }
            table.insert(entry.storage_path.as_str(), json.as_slice())?;

            let mut index = write_txn.open_table(REGISTRY_BY_PARTICIPANT)?;
            let key = make_registry_key(&entry.participant_id, &entry.storage_path);
            index.insert(key.as_slice(), entry.storage_path.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn update_chunk(
        &self,
        storage_path: &str,
        content_hash: &str,
        byte_size: u64,
    ) -> DbResult<ChunkRegistryEntry> {
        let write_txn = self.db.begin_write()?;
        let entry = {
            let mut table = write_txn.open_table(CHUNK_REGISTRY)?;

            // Read existing value and deserialize before mutating
            let existing_bytes = {
                let existing = table
                    .get(storage_path)?
                    .ok_or_else(|| DbError::NotFound(format!("Chunk {storage_path}")))?;
                existing.value().to_vec()
            };

            let mut entry: ChunkRegistryEntry = serde_json::from_slice(&existing_bytes)?;
            entry.content_hash = content_hash.to_string();
            entry.byte_size = byte_size;
            entry.last_updated = Utc::now();

            let json = serde_json::to_vec(&entry)?;
            table.insert(storage_path, json.as_slice())?;
            entry
        };
        write_txn.commit()?;
        Ok(entry)
    }

    fn delete_chunk(&self, storage_path: &str) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(CHUNK_REGISTRY)?;
            let existing = table.remove(storage_path)?.map(|v| v.value().to_vec());
            match existing {
                Some(bytes) => {
                    let entry: ChunkRegistryEntry = serde_json::from_slice(&bytes)?;
                    let mut index = write_txn.open_table(REGISTRY_BY_PARTICIPANT)?;
                    let key = make_registry_key(&entry.participant_id, storage_path);
                    index.remove(key.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn chunks_for_participant(&self, patient_id: &str) -> DbResult<Vec<ChunkRegistryEntry>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(REGISTRY_BY_PARTICIPANT)?;
        let table = read_txn.open_table(CHUNK_REGISTRY)?;

        let prefix = make_prefix(patient_id);
        let prefix_end = make_prefix_end(patient_id);

        let mut entries = Vec::new();
        for item in index.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (_, path) = item?;
            if let Some(value) = table.get(path.value())? {
                entries.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(entries)
    }
}

// =============================================================================
// iOS keys
// =============================================================================

impl IosKeyStore for IngestDatabase {
    fn get_ios_key(&self, upload_path: &str) -> DbResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IOS_KEYS)?;
        Ok(table.get(upload_path)?.map(|v| v.value().to_string()))
    }

    fn insert_ios_key(&self, upload_path: &str, key_b64: &str) -> DbResult<Option<String>> {
        let write_txn = self.db.begin_write()?;
        let existing = {
            let mut table = write_txn.open_table(IOS_KEYS)?;
            let existing = table.get(upload_path)?.map(|v| v.value().to_string());
            if existing.is_none() {
                table.insert(upload_path, key_b64)?;
            }
            existing
        };
        write_txn.commit()?;
        Ok(existing)
    }
}
