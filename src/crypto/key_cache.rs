// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cache of AES keys recovered from iOS uploads.
//!
//! Keys are persisted in an [`IosKeyStore`] keyed by normalized upload path,
//! with an in-process LRU in front for repeated lookups during a run.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use super::DecryptError;
use crate::codec::base64::{decode_base64, encode_base64};
use crate::storage::paths::normalize_upload_path;
use crate::storage::IosKeyStore;

pub struct IosKeyCache {
    store: Arc<dyn IosKeyStore>,
    cache: Mutex<LruCache<String, Vec<u8>>>,
}

impl IosKeyCache {
    pub fn new(store: Arc<dyn IosKeyStore>, capacity: usize) -> Self {
        Self {
            store,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Key recorded for an upload path.
    pub fn get(&self, upload_path: &str) -> Result<Vec<u8>, DecryptError> {
        let path = normalize_upload_path(upload_path);

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(key) = cache.get(path) {
                return Ok(key.clone());
            }
        }

        let encoded = self
            .store
            .get_ios_key(path)?
            .ok_or_else(|| DecryptError::KeyCacheMiss(path.to_string()))?;
        let key = decode_base64(encoded.as_bytes())
            .map_err(|e| DecryptError::KeyInvalid(e.to_string()))?;

        self.put_local(path, &key);
        Ok(key)
    }

    /// Record the key of an upload.
    ///
    /// Re-recording the same key is a no-op; a different key under the same
    /// path is [`DecryptError::KeyCacheConflict`].
    pub fn remember(&self, upload_path: &str, key: &[u8]) -> Result<(), DecryptError> {
        let path = normalize_upload_path(upload_path);
        let encoded = encode_base64(key);

        if let Some(existing) = self.store.insert_ios_key(path, &encoded)? {
            if existing != encoded {
                return Err(DecryptError::KeyCacheConflict(path.to_string()));
            }
        }

        self.put_local(path, key);
        Ok(())
    }

    fn put_local(&self, path: &str, key: &[u8]) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(path.to_string(), key.to_vec());
        }
    }
}
