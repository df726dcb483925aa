// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use study_ingest::config::{ProcessingConfig, LOG_FORMAT_ENV};
use study_ingest::pipeline::Orchestrator;
use study_ingest::poller::PendingFilePoller;
use study_ingest::state::ProcessingContext;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match ProcessingConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("STARTUP_ERROR {err}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        data_dir = %config.data_dir.display(),
        database = %config.database_path.display(),
        page_size = config.page_size,
        concurrency = config.concurrency,
        "study-ingest starting"
    );

    let ctx = match ProcessingContext::open(config) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("STARTUP_ERROR {err}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let poller = PendingFilePoller::new(Orchestrator::new(ctx));
    let handle = tokio::spawn(poller.run(shutdown.clone()));

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Cannot listen for ctrl-c, shutting down");
    }
    shutdown.cancel();

    if let Err(err) = handle.await {
        tracing::warn!(error = %err, "Poller task ended abnormally");
    }
    tracing::info!("study-ingest stopped");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
