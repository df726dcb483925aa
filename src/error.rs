// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::crypto::DecryptError;
use crate::pipeline::{PoolError, UploadError};
use crate::storage::{DbError, StorageError};

/// Failure of one orchestrator run.
///
/// Per-file and per-chunk problems never surface here; they hold back the
/// affected pending files and the run carries on. What remains is a reason
/// to retry the whole participant later.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("participant key unavailable: {0}")]
    PrivateKey(#[from] DecryptError),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ProcessingError {
    /// Another run created the same chunk first; try again next cycle.
    pub fn is_retry_later(&self) -> bool {
        matches!(self, Self::Upload(UploadError::ConcurrentCreate(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_create_is_benign() {
        let err: ProcessingError = UploadError::ConcurrentCreate("CHUNKED_DATA/x.csv".into()).into();
        assert!(err.is_retry_later());
        assert!(err.to_string().contains("CHUNKED_DATA/x.csv"));
    }

    #[test]
    fn other_failures_are_not() {
        let err: ProcessingError = PoolError::Cancelled.into();
        assert!(!err.is_retry_later());

        let err: ProcessingError = DbError::NotFound("Chunk x".into()).into();
        assert!(!err.is_retry_later());
    }
}
