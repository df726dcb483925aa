// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults and the [`ProcessingConfig`] loader.
//! Configuration is read once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory of the filesystem object store | `/data` |
//! | `DATABASE_PATH` | redb file for registry, pending files, iOS keys | `$DATA_DIR/ingest.redb` |
//! | `FILE_PROCESS_PAGE_SIZE` | Pending files processed per page | `100` |
//! | `CONCURRENT_NETWORK_OPS` | Worker pool width for downloads and uploads | `10` |
//! | `LATEST_TIMESTAMP_HORIZON_DAYS` | Newest accepted data, in days past run start | `90` |
//! | `POLL_INTERVAL_SECS` | Seconds between poller sweeps | `3600` |
//! | `STORE_DECRYPTION_LINE_ERRORS` | Keep raw bad lines in audit records | `false` |
//! | `KEY_CACHE_CAPACITY` | In-memory key cache entries | `1024` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::codec::time::TimestampPolicy;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const DATABASE_PATH_ENV: &str = "DATABASE_PATH";
pub const PAGE_SIZE_ENV: &str = "FILE_PROCESS_PAGE_SIZE";
pub const CONCURRENCY_ENV: &str = "CONCURRENT_NETWORK_OPS";
pub const HORIZON_DAYS_ENV: &str = "LATEST_TIMESTAMP_HORIZON_DAYS";
pub const POLL_INTERVAL_ENV: &str = "POLL_INTERVAL_SECS";
pub const STORE_LINE_ERRORS_ENV: &str = "STORE_DECRYPTION_LINE_ERRORS";
pub const KEY_CACHE_CAPACITY_ENV: &str = "KEY_CACHE_CAPACITY";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DATABASE_FILE_NAME: &str = "ingest.redb";
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_HORIZON_DAYS: i64 = 90;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_KEY_CACHE_CAPACITY: usize = 1024;

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
#[error("{key} {message}")]
pub struct ConfigError {
    pub key: &'static str,
    pub message: String,
}

/// Settings for the processing pipeline and its background poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingConfig {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub page_size: usize,
    pub concurrency: usize,
    pub horizon_days: i64,
    pub poll_interval: Duration,
    pub store_line_errors: bool,
    pub key_cache_capacity: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            database_path: data_dir.join(DATABASE_FILE_NAME),
            data_dir,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            horizon_days: DEFAULT_HORIZON_DAYS,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            store_line_errors: false,
            key_cache_capacity: DEFAULT_KEY_CACHE_CAPACITY,
        }
    }
}

impl ProcessingConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_path: data_dir.join(DATABASE_FILE_NAME),
            data_dir,
            ..Self::default()
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_kv(&vars)
    }

    /// Load from a key/value map using the environment variable names.
    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let data_dir = kv
            .get(DATA_DIR_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let database_path = kv
            .get(DATABASE_PATH_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DATABASE_FILE_NAME));

        let page_size = parse_positive(kv.get(PAGE_SIZE_ENV), DEFAULT_PAGE_SIZE, PAGE_SIZE_ENV)?;
        let concurrency = parse_positive(kv.get(CONCURRENCY_ENV), DEFAULT_CONCURRENCY, CONCURRENCY_ENV)?;
        let horizon_days = parse_number(kv.get(HORIZON_DAYS_ENV), DEFAULT_HORIZON_DAYS, HORIZON_DAYS_ENV)?;
        let poll_secs = parse_number(
            kv.get(POLL_INTERVAL_ENV),
            DEFAULT_POLL_INTERVAL_SECS,
            POLL_INTERVAL_ENV,
        )?;
        let store_line_errors = parse_bool(kv.get(STORE_LINE_ERRORS_ENV), STORE_LINE_ERRORS_ENV)?;
        let key_cache_capacity = parse_positive(
            kv.get(KEY_CACHE_CAPACITY_ENV),
            DEFAULT_KEY_CACHE_CAPACITY,
            KEY_CACHE_CAPACITY_ENV,
        )?;

        Ok(Self {
            data_dir,
            database_path,
            page_size,
            concurrency,
            horizon_days,
            poll_interval: Duration::from_secs(poll_secs),
            store_line_errors,
            key_cache_capacity,
        })
    }

    /// Accepted timestamp range for a run starting at `now`.
    pub fn timestamp_policy(&self, now: DateTime<Utc>) -> TimestampPolicy {
        TimestampPolicy::from_now(now, self.horizon_days)
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<&String>,
    default: T,
    key: &'static str,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<T>().map_err(|_| ConfigError {
            key,
            message: "must be an integer".to_string(),
        }),
    }
}

fn parse_positive(value: Option<&String>, default: usize, key: &'static str) -> Result<usize, ConfigError> {
    let n = parse_number(value, default, key)?;
    if n == 0 {
        return Err(ConfigError {
            key,
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(n)
}

fn parse_bool(value: Option<&String>, key: &'static str) -> Result<bool, ConfigError> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "" | "0" | "false" | "no" => Ok(false),
            "1" | "true" | "yes" => Ok(true),
            _ => Err(ConfigError {
                key,
                message: "must be a boolean".to_string(),
            }),
        },
    }
}
