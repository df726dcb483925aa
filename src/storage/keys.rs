// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Participant private key lookup.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use super::paths::private_key_path;
use super::ObjectStore;
use crate::crypto::{DecryptError, ParticipantKey};
use crate::models::Participant;

/// Resolves the RSA private key used to decrypt a participant's uploads.
pub trait PrivateKeySource: Send + Sync {
    fn private_key(&self, participant: &Participant) -> Result<ParticipantKey, DecryptError>;
}

/// PEM keys read from the object store, parsed keys cached in memory.
pub struct StoredPrivateKeys {
    store: Arc<dyn ObjectStore>,
    cache: Mutex<LruCache<String, ParticipantKey>>,
}

impl StoredPrivateKeys {
    pub fn new(store: Arc<dyn ObjectStore>, capacity: usize) -> Self {
        Self {
            store,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }
}

impl PrivateKeySource for StoredPrivateKeys {
    fn private_key(&self, participant: &Participant) -> Result<ParticipantKey, DecryptError> {
        let path = private_key_path(&participant.study_id, &participant.patient_id);

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(key) = cache.get(&path) {
                return Ok(key.clone());
            }
        }

        let pem = self.store.get(&path).map_err(|e| {
            DecryptError::PrivateKey(format!("cannot read {path}: {e}"))
        })?;
        let key = ParticipantKey::from_pem(&pem)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(path, key.clone());
        }
        Ok(key)
    }
}
