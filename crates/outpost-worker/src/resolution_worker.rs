// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that resolves arrived missions.
//!
//! Each worker serves one mission type. It leases the next queued job of that
//! type, brings the mission to `arrived` if the job came from direct dispatch,
//! builds the resolution and commits it. The commit is conditional on the
//! mission still being `arrived`, so a second delivery of the same job finds
//! nothing to do.
//!
//! ```text
//!   claim_next ──► mission status?
//!                   │ traveling, not due ──► reschedule(arrival_at)
//!                   │ traveling, due ──────► claim_arrival ─┐
//!                   │ arrived ─────────────────────────────┤
//!                   │                                       ▼
//!                   │                         resolve ──► commit_resolution
//!                   │ terminal ──► complete                 │
//!                   ▼                                       ▼
//!              transient error ──► retry(backoff)      complete
//!              permanent error ──► fail
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use outpost_core::{
    CoreError, JobQueue, MissionKind, MissionRecord, MissionStatus, MissionStore, ResolutionJob,
    Store, Transition,
};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::resolver::Resolver;

/// Configuration for a resolution worker.
#[derive(Debug, Clone)]
pub struct ResolutionWorkerConfig {
    /// How long to wait when the queue is empty.
    pub poll_interval: Duration,
    /// Lease taken on a claimed job.
    pub lease: chrono::Duration,
}

impl Default for ResolutionWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lease: chrono::Duration::seconds(120),
        }
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The resolution was committed with this status.
    Resolved(MissionStatus),
    /// The mission was already terminal or another worker committed first.
    AlreadyFinished,
    /// The job ran before the mission arrived and was pushed back.
    Rescheduled,
    /// A transient error put the job back with backoff.
    Retrying,
    /// The job was marked failed.
    Failed,
}

/// Background worker that drains the resolution queue for one mission type.
pub struct ResolutionWorker {
    store: Arc<dyn Store>,
    resolver: Arc<Resolver>,
    kind: MissionKind,
    config: ResolutionWorkerConfig,
    shutdown: Arc<Notify>,
}

impl ResolutionWorker {
    /// Create a worker for `kind`.
    pub fn new(
        store: Arc<dyn Store>,
        resolver: Arc<Resolver>,
        kind: MissionKind,
        config: ResolutionWorkerConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            kind,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop.
    ///
    /// Drains jobs back to back while the queue has work and sleeps for the
    /// poll interval once it is empty. The job in flight finishes before a
    /// shutdown signal is honored.
    pub async fn run(&self) {
        info!(
            kind = %self.kind,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Resolution worker started"
        );

        loop {
            let idle = match self.process_next(Utc::now()).await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(kind = %self.kind, error = %e, "Failed to process resolution job");
                    true
                }
            };

            if idle {
                tokio::select! {
                    biased;

                    _ = self.shutdown.notified() => {
                        info!(kind = %self.kind, "Resolution worker received shutdown signal");
                        break;
                    }

                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        info!(kind = %self.kind, "Resolution worker stopped");
    }

    /// Claim and process one job.
    ///
    /// Returns `None` when no job of this type is due. Errors raised while
    /// handling the job are absorbed into a retry or a failure; only queue
    /// errors are returned.
    pub async fn process_next(&self, now: DateTime<Utc>) -> Result<Option<JobOutcome>> {
        let Some(job) = self.store.claim_next(self.kind, now, self.config.lease).await? else {
            return Ok(None);
        };

        debug!(
            job_key = %job.job_key,
            mission_id = %job.mission_id,
            attempt = job.attempts,
            "Claimed resolution job"
        );

        let outcome = match self.handle(&job, now).await {
            Ok(outcome) => {
                if !matches!(outcome, JobOutcome::Rescheduled) {
                    let transition = self.store.complete(&job, now).await?;
                    self.warn_if_lease_lost(&job, transition);
                }
                outcome
            }
            Err(e) => self.handle_error(&job, e, now).await?,
        };

        Ok(Some(outcome))
    }

    async fn handle(&self, job: &ResolutionJob, now: DateTime<Utc>) -> Result<JobOutcome> {
        let mission = self
            .store
            .get_mission(job.mission_id)
            .await?
            .ok_or_else(|| CoreError::MissionNotFound {
                mission_id: job.mission_id.to_string(),
            })?;

        let current_status = mission.status;
        let mission = match current_status {
            MissionStatus::Traveling if !mission.is_due(now) => {
                let transition = self.store.reschedule(job, mission.arrival_at, now).await?;
                self.warn_if_lease_lost(job, transition);
                debug!(
                    mission_id = %mission.id,
                    arrival_at = %mission.arrival_at,
                    "Job ran before arrival, rescheduled"
                );
                return Ok(JobOutcome::Rescheduled);
            }
            MissionStatus::Traveling => match self.store.claim_arrival(mission.id, now).await? {
                Transition::Applied => MissionRecord {
                    status: MissionStatus::Arrived,
                    ..mission
                },
                Transition::Lost => match self.store.get_mission(mission.id).await? {
                    Some(current) if current.status == MissionStatus::Arrived => current,
                    _ => return Ok(JobOutcome::AlreadyFinished),
                },
            },
            MissionStatus::Arrived => mission,
            status => {
                debug!(mission_id = %mission.id, status = %status, "Mission already finished");
                return Ok(JobOutcome::AlreadyFinished);
            }
        };

        let resolution = self.resolver.resolve(self.store.as_ref(), &mission, now).await?;
        let status = resolution.status;

        match self.store.commit_resolution(&resolution, now).await? {
            Transition::Applied => {
                info!(
                    mission_id = %mission.id,
                    kind = %mission.kind,
                    status = %status,
                    outcome = resolution.outcome.as_deref().unwrap_or("-"),
                    "Mission resolved"
                );
                Ok(JobOutcome::Resolved(status))
            }
            Transition::Lost => {
                debug!(mission_id = %mission.id, "Resolution already committed elsewhere");
                Ok(JobOutcome::AlreadyFinished)
            }
        }
    }

    async fn handle_error(
        &self,
        job: &ResolutionJob,
        err: Error,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome> {
        let message = err.to_string();

        if err.is_transient() && !job.is_last_attempt() {
            let run_at = now + job.policy().delay_after(job.attempts);
            warn!(
                job_key = %job.job_key,
                mission_id = %job.mission_id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                retry_at = %run_at,
                error = %message,
                "Resolution failed, will retry"
            );
            let transition = self.store.retry(job, &message, run_at, now).await?;
            self.warn_if_lease_lost(job, transition);
            return Ok(JobOutcome::Retrying);
        }

        error!(
            job_key = %job.job_key,
            mission_id = %job.mission_id,
            attempt = job.attempts,
            transient = err.is_transient(),
            error = %message,
            "Resolution job failed permanently"
        );
        let transition = self.store.fail(job, &message, now).await?;
        self.warn_if_lease_lost(job, transition);
        Ok(JobOutcome::Failed)
    }

    fn warn_if_lease_lost(&self, job: &ResolutionJob, transition: Transition) {
        if !transition.is_applied() {
            warn!(
                job_key = %job.job_key,
                mission_id = %job.mission_id,
                lease_until = ?job.lease_until,
                "Job lease expired before the result was recorded"
            );
        }
    }
}
