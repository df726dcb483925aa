// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::config::ProcessingConfig;
use crate::crypto::IosKeyCache;
use crate::error::ProcessingError;
use crate::storage::{
    AuditLog, ChunkRegistryStore, FsObjectStore, IngestDatabase, ObjectStore, PendingFileStore,
    PrivateKeySource, StoredPrivateKeys,
};

/// Shared collaborators of the processing pipeline.
#[derive(Clone)]
pub struct ProcessingContext {
    pub config: Arc<ProcessingConfig>,
    pub objects: Arc<dyn ObjectStore>,
    pub pending: Arc<dyn PendingFileStore>,
    pub registry: Arc<dyn ChunkRegistryStore>,
    pub private_keys: Arc<dyn PrivateKeySource>,
    pub ios_keys: Arc<IosKeyCache>,
    pub audit: Arc<AuditLog>,
}

impl ProcessingContext {
    /// Wire every store around one object store and one database.
    pub fn new(config: ProcessingConfig, objects: Arc<dyn ObjectStore>, db: Arc<IngestDatabase>) -> Self {
        let capacity = config.key_cache_capacity;
        Self {
            pending: db.clone(),
            registry: db.clone(),
            private_keys: Arc::new(StoredPrivateKeys::new(objects.clone(), capacity)),
            ios_keys: Arc::new(IosKeyCache::new(db, capacity)),
            audit: Arc::new(AuditLog::new(objects.clone())),
            objects,
            config: Arc::new(config),
        }
    }

    /// Open the filesystem object store and database named by `config`.
    pub fn open(config: ProcessingConfig) -> Result<Self, ProcessingError> {
        let objects = Arc::new(FsObjectStore::open(&config.data_dir)?);
        let db = Arc::new(IngestDatabase::open(&config.database_path)?);
        Ok(Self::new(config, objects, db))
    }
}
