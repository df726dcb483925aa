// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Binary Codec
//!
//! Byte-level helpers shared by the decryptor and the processing pipeline.
//! Device data is handled as raw bytes end to end; nothing here assumes UTF-8.
//!
//! - `base64` - URL-safe base64 with padding self-healing
//! - `csv` - minimal comma/newline tokenizer and writer (no quoting)
//! - `time` - unix timestamp validation, hour bins, human-readable stamps
//! - `compress` - gzip wrapper for stored chunk payloads

pub mod base64;
pub mod compress;
pub mod csv;
pub mod time;

/// Errors raised by the codec helpers.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] ::base64::DecodeError),

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("bad timecode: {0}")]
    Timecode(String),
}

pub type CodecResult<T> = Result<T, CodecError>;
