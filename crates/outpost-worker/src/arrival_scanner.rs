// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that moves due missions to `arrived`.
//!
//! Every scan:
//! 1. Recovers jobs whose lease expired (their worker died mid-resolution)
//! 2. Claims traveling missions whose arrival time has passed and enqueues a
//!    resolution job for each one it wins
//! 3. Re-enqueues arrived missions that have no job at all
//! 4. Reports jobs that exhausted their retries
//!
//! Claims are conditional updates, so any number of scanners can run against
//! the same store; each due mission is claimed exactly once. Enqueue is keyed
//! by mission, so a mission that already has a job (direct dispatch, or a
//! previous scan) is not queued twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use outpost_core::{Enqueued, JobQueue, MissionStore, RetryPolicy, Store, Transition};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Configuration for the arrival scanner.
#[derive(Debug, Clone)]
pub struct ArrivalScannerConfig {
    /// How often to scan.
    pub poll_interval: Duration,
    /// Maximum due missions handled per scan.
    pub batch_size: u32,
    /// Retry policy stamped on new jobs.
    pub retry_policy: RetryPolicy,
}

impl Default for ArrivalScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 100,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Counters from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Due missions found.
    pub due: usize,
    /// Missions this scan moved to `arrived`.
    pub claimed: usize,
    /// Jobs created.
    pub enqueued: usize,
    /// Missions that already had a job.
    pub duplicates: usize,
    /// Arrived missions found without a job and re-enqueued.
    pub stranded: usize,
    /// Expired leases put back in the queue.
    pub requeued: u64,
    /// Expired leases that had no attempts left.
    pub exhausted: u64,
    /// Failed jobs awaiting an operator.
    pub failed_jobs: usize,
}

/// Background worker that claims due missions.
pub struct ArrivalScanner {
    store: Arc<dyn Store>,
    config: ArrivalScannerConfig,
    shutdown: Arc<Notify>,
}

impl ArrivalScanner {
    /// Create a new arrival scanner.
    pub fn new(store: Arc<dyn Store>, config: ArrivalScannerConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scanner loop.
    ///
    /// Scans once at startup to pick up missions that arrived while the
    /// process was down, then every poll interval until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Arrival scanner started"
        );

        if let Err(e) = self.scan(Utc::now()).await {
            error!(error = %e, "Failed to scan for arrived missions on startup");
        }

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Arrival scanner received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.scan(Utc::now()).await {
                        error!(error = %e, "Failed to scan for arrived missions");
                    }
                }
            }
        }

        info!("Arrival scanner stopped");
    }

    /// Run one scan at `now`.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        let sweep = self.store.requeue_expired(now).await?;
        report.requeued = sweep.requeued;
        report.exhausted = sweep.failed;
        if sweep.requeued > 0 || sweep.failed > 0 {
            warn!(
                requeued = sweep.requeued,
                failed = sweep.failed,
                "Recovered resolution jobs with expired leases"
            );
        }

        let due = self
            .store
            .find_due_missions(now, self.config.batch_size)
            .await?;
        report.due = due.len();

        for mission in &due {
            match self.store.claim_arrival(mission.id, now).await {
                Ok(Transition::Applied) => {
                    report.claimed += 1;
                    debug!(mission_id = %mission.id, kind = %mission.kind, "Mission arrived");
                }
                Ok(Transition::Lost) => {
                    debug!(mission_id = %mission.id, "Mission claimed by another scanner");
                    continue;
                }
                Err(e) => {
                    error!(mission_id = %mission.id, error = %e, "Failed to claim arrival");
                    continue;
                }
            }

            match self.enqueue(mission.id, now).await {
                Ok(Enqueued::Queued) => report.enqueued += 1,
                Ok(Enqueued::Duplicate) => report.duplicates += 1,
                // Picked up as stranded on the next scan.
                Err(e) => error!(mission_id = %mission.id, error = %e, "Failed to enqueue resolution job"),
            }
        }

        let stranded = self.store.find_stranded(self.config.batch_size).await?;
        for mission in &stranded {
            warn!(
                mission_id = %mission.id,
                kind = %mission.kind,
                arrival_at = %mission.arrival_at,
                "Arrived mission has no resolution job, re-enqueuing"
            );
            match self.enqueue(mission.id, now).await {
                Ok(Enqueued::Queued) => report.stranded += 1,
                Ok(Enqueued::Duplicate) => report.duplicates += 1,
                Err(e) => error!(mission_id = %mission.id, error = %e, "Failed to re-enqueue stranded mission"),
            }
        }

        let failed = self.store.list_failed_jobs(self.config.batch_size).await?;
        report.failed_jobs = failed.len();
        for job in &failed {
            error!(
                job_key = %job.job_key,
                mission_id = %job.mission_id,
                kind = %job.kind,
                attempts = job.attempts,
                last_error = job.last_error.as_deref().unwrap_or("-"),
                "Resolution job failed, operator action required"
            );
        }

        if report.claimed > 0 || report.stranded > 0 {
            info!(
                due = report.due,
                claimed = report.claimed,
                enqueued = report.enqueued,
                stranded = report.stranded,
                "Arrival scan complete"
            );
        } else {
            debug!(due = report.due, "Arrival scan complete");
        }

        Ok(report)
    }

    async fn enqueue(&self, mission_id: uuid::Uuid, now: DateTime<Utc>) -> Result<Enqueued> {
        Ok(self
            .store
            .enqueue(mission_id, now, &self.config.retry_policy, now)
            .await?)
    }
}
