// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Pending File Poller
//!
//! Background task that periodically processes every participant with
//! pending uploads.
//!
//! ## Strategy
//!
//! Every `poll_interval` the poller:
//! 1. Lists participants that have at least one pending file.
//! 2. Runs the [`Orchestrator`] for each in turn.
//! 3. Logs a benign concurrent-create conflict at `info`; anything else at
//!    `warn`. Either way the files stay pending for the next sweep.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. Cancellation is checked
//! between participants, so an in-flight run always finishes its page.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ProcessingError;
use crate::pipeline::pool::run_blocking;
use crate::pipeline::Orchestrator;

/// Outcome counts of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub participants: usize,
    pub succeeded: usize,
    pub deferred: usize,
    pub failed: usize,
}

pub struct PendingFilePoller {
    orchestrator: Orchestrator,
    poll_interval: Duration,
}

impl PendingFilePoller {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let poll_interval = orchestrator.context().config.poll_interval;
        Self {
            orchestrator,
            poll_interval,
        }
    }

    /// Run the poller loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Pending file poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Pending file poller shutting down");
                return;
            }

            match self.sweep(&shutdown).await {
                Ok(report) if report.participants > 0 => {
                    info!(
                        participants = report.participants,
                        succeeded = report.succeeded,
                        deferred = report.deferred,
                        failed = report.failed,
                        "Poller sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Poller sweep could not list participants"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Pending file poller shutting down");
                    return;
                }
            }
        }
    }

    /// Process every participant with pending files once.
    pub async fn sweep(&self, shutdown: &CancellationToken) -> Result<SweepReport, ProcessingError> {
        let pending = self.orchestrator.context().pending.clone();
        let participants = run_blocking(move || pending.participants_with_pending()).await??;

        let mut report = SweepReport {
            participants: participants.len(),
            ..SweepReport::default()
        };

        for participant in &participants {
            if shutdown.is_cancelled() {
                break;
            }
            match self.orchestrator.run(participant).await {
                Ok(_) => report.succeeded += 1,
                Err(e) if e.is_retry_later() => {
                    info!(participant = %participant.patient_id, error = %e, "Deferred to next sweep");
                    report.deferred += 1;
                }
                Err(e) => {
                    warn!(participant = %participant.patient_id, error = %e, "Processing run failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::models::{OsType, Participant};
    use crate::state::ProcessingContext;
    use crate::storage::PendingFileStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn poller(temp: &TempDir) -> PendingFilePoller {
        let mut config = ProcessingConfig::with_data_dir(temp.path());
        config.poll_interval = Duration::from_millis(10);
        PendingFilePoller::new(Orchestrator::new(ProcessingContext::open(config).unwrap()))
    }

    #[tokio::test]
    async fn empty_sweep() {
        let temp = TempDir::new().unwrap();
        let report = poller(&temp).sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn missing_key_counts_as_failure() {
        let temp = TempDir::new().unwrap();
        let poller = poller(&temp);
        let participant = Participant::new("p1", "s1", OsType::Android);
        poller
            .orchestrator
            .context()
            .pending
            .create_pending(&participant, "s1/p1/gps/1700000000000.csv")
            .unwrap();

        let report = poller.sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.participants, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let temp = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(poller(&temp).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
