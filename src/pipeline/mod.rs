// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Processing Pipeline
//!
//! Turns a participant's pending uploads into merged hourly chunks.
//!
//! ```text
//! Orchestrator ──page──▶ pool: download ─▶ decrypt ─▶ classify/fix/bin
//!                          │
//!                          ▼
//!                     BinSet (whole page) ─▶ ChunkBatch per chunk path
//!                          │
//!                          ▼
//!                     pool: resolve (create | merge) ─▶ UploadTask
//!                          │
//!                          ▼
//!                     pool: upload + registry commit ─▶ retire pending files
//! ```
//!
//! Error scope follows the stage that raised it: [`BinError`] holds back one
//! file, [`MergeError`] holds back every file of one chunk, and
//! [`UploadError`] aborts the page.

pub mod binner;
pub mod fixes;
pub mod merger;
pub mod orchestrator;
pub mod pool;
pub mod stats;
pub mod upload;

pub use binner::{classify_and_bin, BinKey, BinSet, BinnedFile, ChunkBatch, Classified, DataBin};
pub use merger::{ChunkMerger, UploadKind, UploadTask};
pub use orchestrator::Orchestrator;
pub use pool::{PoolError, WorkerPool};

use crate::codec::CodecError;
use crate::storage::{DbError, StorageError};
use crate::streams::DataStream;

/// A file could not be classified or reshaped.
#[derive(Debug, thiserror::Error)]
pub enum BinError {
    #[error("no data stream matches upload path {0}")]
    UnknownStream(String),

    #[error("identifiers upload has no data row: {0}")]
    IdentifiersWithoutRows(String),

    #[error("survey upload path has no survey id: {0}")]
    MissingSurveyId(String),
}

/// A chunk could not be resolved against storage.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("header mismatch for {path}: {header:?}")]
    HeaderMismatch { path: String, header: String },

    #[error("chunk object vanished, registry entry dropped: {0}")]
    ChunkVanished(String),

    #[error("stream {0} has no chunk header")]
    Unchunkable(DataStream),

    #[error("hour index {0} is out of range")]
    HourOutOfRange(i64),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("registry error: {0}")]
    Registry(#[from] DbError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Committing an upload task failed; the page must not retire its files.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("chunk created concurrently by another run: {0}")]
    ConcurrentCreate(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("registry error: {0}")]
    Registry(#[from] DbError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}
