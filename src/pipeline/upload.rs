// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Commit of resolved upload tasks: object first, then registry.

use std::sync::Arc;

use tracing::{debug, warn};

use super::merger::{UploadKind, UploadTask};
use super::UploadError;
use crate::storage::{ChunkRegistryStore, DbError, ObjectStore};

/// Writes upload tasks to the object store and registry.
#[derive(Clone)]
pub struct Uploader {
    objects: Arc<dyn ObjectStore>,
    registry: Arc<dyn ChunkRegistryStore>,
}

impl Uploader {
    pub fn new(objects: Arc<dyn ObjectStore>, registry: Arc<dyn ChunkRegistryStore>) -> Self {
        Self { objects, registry }
    }

    /// Record one task in the registry and store its payload.
    ///
    /// Creates and upserts register before writing. A create whose path is
    /// already registered is [`UploadError::ConcurrentCreate`] and writes
    /// nothing, so the other run's object survives. A create whose write
    /// fails takes its registration back.
    pub fn execute(&self, task: &UploadTask) -> Result<UploadKind, UploadError> {
        let entry = &task.entry;
        let path = entry.storage_path.as_str();

        match task.kind {
            UploadKind::Create => {
                self.registry.create_chunk(entry).map_err(|e| match e {
                    DbError::AlreadyExists(path) => UploadError::ConcurrentCreate(path),
                    other => other.into(),
                })?;
                if let Err(e) = self.objects.put(path, &task.payload) {
                    if let Err(undo) = self.registry.delete_chunk(path) {
                        warn!(path = %path, error = %undo, "Cannot remove registration of unwritten chunk");
                    }
                    return Err(e.into());
                }
                debug!(path = %path, bytes = entry.byte_size, "Chunk created");
                Ok(UploadKind::Create)
            }
            UploadKind::Update => {
                self.objects.put(path, &task.payload)?;
                self.registry
                    .update_chunk(path, &entry.content_hash, entry.byte_size)?;
                debug!(path = %path, bytes = entry.byte_size, "Chunk updated");
                Ok(UploadKind::Update)
            }
            UploadKind::Upsert => {
                // The object at `path` is still the raw upload until the put
                // below; a run that stops in between decrypts it again.
                let kind = if self.registry.get_chunk(path)?.is_some() {
                    self.registry
                        .update_chunk(path, &entry.content_hash, entry.byte_size)?;
                    UploadKind::Update
                } else {
                    self.registry.create_chunk(entry)?;
                    UploadKind::Create
                };
                self.objects.put(path, &task.payload)?;
                Ok(kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compress::compress;
    use crate::models::ChunkRegistryEntry;
    use crate::storage::{FsObjectStore, IngestDatabase};
    use crate::streams::DataStream;
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<FsObjectStore>, Arc<IngestDatabase>, Uploader) {
        let temp = TempDir::new().unwrap();
        let objects = Arc::new(FsObjectStore::open(temp.path().join("objects")).unwrap());
        let registry = Arc::new(IngestDatabase::open(&temp.path().join("db.redb")).unwrap());
        let uploader = Uploader::new(objects.clone(), registry.clone());
        (temp, objects, registry, uploader)
    }

    fn task(kind: UploadKind, content: &[u8]) -> UploadTask {
        UploadTask {
            kind,
            entry: ChunkRegistryEntry {
                storage_path: "CHUNKED_DATA/s1/p1/gps/2023-11-14T22:00:00.csv".into(),
                study_id: "s1".into(),
                participant_id: "p1".into(),
                data_stream: DataStream::Gps,
                hour_index: 472_222,
                content_hash: crate::pipeline::merger::content_hash(content),
                byte_size: content.len() as u64,
                survey_id: None,
                is_chunkable: true,
                last_updated: Utc::now(),
            },
            payload: compress(content).unwrap(),
            rows: 1,
        }
    }

    #[test]
    fn create_then_update() {
        let (_temp, objects, registry, uploader) = setup();
        let created = task(UploadKind::Create, b"h\n1");
        assert_eq!(uploader.execute(&created).unwrap(), UploadKind::Create);

        let updated = task(UploadKind::Update, b"h\n1\n2");
        assert_eq!(uploader.execute(&updated).unwrap(), UploadKind::Update);

        let entry = registry.get_chunk(&created.entry.storage_path).unwrap().unwrap();
        assert_eq!(entry.byte_size, 5);
        assert_eq!(objects.get(&entry.storage_path).unwrap(), updated.payload);
    }

    #[test]
    fn second_create_is_a_conflict_and_keeps_first_object() {
        let (_temp, objects, _registry, uploader) = setup();
        let first = task(UploadKind::Create, b"h\n1");
        uploader.execute(&first).unwrap();

        let second = task(UploadKind::Create, b"h\n2");
        assert!(matches!(
            uploader.execute(&second),
            Err(UploadError::ConcurrentCreate(_))
        ));
        assert_eq!(objects.get(&first.entry.storage_path).unwrap(), first.payload);
    }

    #[test]
    fn failed_create_write_drops_registration() {
        let (temp, _objects, registry, uploader) = setup();
        let created = task(UploadKind::Create, b"h\n1");
        std::fs::create_dir_all(temp.path().join("objects").join(&created.entry.storage_path)).unwrap();

        assert!(matches!(uploader.execute(&created), Err(UploadError::Storage(_))));
        assert!(registry.get_chunk(&created.entry.storage_path).unwrap().is_none());
    }

    #[test]
    fn upsert_creates_or_updates() {
        let (_temp, _objects, registry, uploader) = setup();
        assert_eq!(uploader.execute(&task(UploadKind::Upsert, b"a")).unwrap(), UploadKind::Create);
        assert_eq!(uploader.execute(&task(UploadKind::Upsert, b"abc")).unwrap(), UploadKind::Update);
        let entry = registry
            .get_chunk("CHUNKED_DATA/s1/p1/gps/2023-11-14T22:00:00.csv")
            .unwrap()
            .unwrap();
        assert_eq!(entry.byte_size, 3);
    }
}
