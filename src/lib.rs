// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Study Ingest - Encrypted Device Upload Processing
//!
//! Decrypts files uploaded by research-study devices and merges their rows
//! into hourly, gzip-compressed CSV chunks tracked by a registry.
//!
//! ## Modules
//!
//! - `codec` - CSV, base64, timestamp and compression primitives
//! - `crypto` - RSA/AES-CBC device file decryption and the iOS key cache
//! - `streams` - the closed set of data streams and their canonical headers
//! - `pipeline` - binning, chunk merging, uploads and the orchestrator
//! - `storage` - object store, redb-backed registry and pending files, audit log
//! - `poller` - background sweep over participants with pending files

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod poller;
pub mod state;
pub mod storage;
pub mod streams;
