// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Device File Decryption
//!
//! Devices encrypt every upload with a fresh AES-128 key. The key is itself
//! RSA-encrypted with the participant's public key and written, base64
//! encoded twice, as the first line of the file. Every following line is
//! `base64(iv):base64(aes_cbc(data))`.
//!
//! ## Failure classes
//!
//! - [`DecryptError`] is fatal for one file: the file is skipped for this run.
//! - [`LineErrorKind`] is recoverable: the line is dropped and recorded, the
//!   rest of the file is processed normally.
//!
//! ## iOS split uploads
//!
//! iOS sometimes splits one upload into several files of the same name where
//! only the first carries a key line. [`IosKeyCache`] remembers recovered keys
//! by normalized path so later parts can still be decrypted.

pub mod decryptor;
pub mod key_cache;
pub mod rsa;

pub use decryptor::{decrypt, decrypt_with_key, extract_aes_key, DecryptedFile, KeySource};
pub use key_cache::IosKeyCache;
pub use self::rsa::ParticipantKey;

use serde::{Deserialize, Serialize};

use crate::storage::DbError;

/// Errors that make a whole file undecryptable.
#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("file contains no data")]
    EmptyFile,

    #[error("key line is not url-safe base64")]
    KeyNotBase64,

    #[error("invalid decryption key: {0}")]
    KeyInvalid(String),

    #[error("decryption key is {0} bytes, expected 16")]
    KeyInvalidLength(usize),

    #[error("no cached iOS decryption key for {0}")]
    KeyCacheMiss(String),

    #[error("conflicting iOS decryption keys for {0}")]
    KeyCacheConflict(String),

    #[error("participant private key unusable: {0}")]
    PrivateKey(String),

    #[error("key store error: {0}")]
    KeyStore(#[from] DbError),

    #[error("unclassified decryption failure: {0}")]
    Unclassified(String),
}

impl DecryptError {
    /// True for failures caused by the key line itself.
    ///
    /// These are the cases where an iOS participant's file may still be
    /// readable with a cached key.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::KeyNotBase64 | Self::KeyInvalid(_) | Self::KeyInvalidLength(_)
        )
    }
}

/// Kind of a recoverable per-line failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineErrorKind {
    /// IV or payload was not decodable base64.
    PaddingError,
    /// Cipher was given an empty key.
    EmptyKey,
    /// Line did not split into exactly `iv:data`.
    MalformedConfig,
    /// Payload decoded to fewer than 16 bytes.
    LineEmpty,
    /// IV decoded to fewer than 16 bytes.
    IvMissing,
    /// IV decoded to more than 16 bytes.
    IvBadLength,
    /// Final line was cut short mid-write.
    Mp4PaddingTruncated,
}

/// One dropped line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub line_index: usize,
    pub kind: LineErrorKind,
    pub raw_line: Vec<u8>,
}
