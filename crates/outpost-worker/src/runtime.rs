// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for outpost-worker.
//!
//! [`WorkerRuntime`] runs the arrival scanner, one pool of resolution workers
//! per mission type and the outbox relay inside an existing tokio
//! application. The request path uses [`WorkerRuntime::mission_scheduler`]
//! to create and cancel missions against the same store.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use outpost_core::SqliteStore;
//! use outpost_worker::runtime::WorkerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::connect("sqlite:outpost.db?mode=rwc").await?);
//!
//!     let runtime = WorkerRuntime::builder()
//!         .store(store)
//!         .worker_concurrency(4)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let missions = runtime.mission_scheduler();
//!     // ... serve requests ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use outpost_combat::{BossConfig, EncounterConfig, UnitCatalog};
use outpost_core::{
    MissionKind, MissionScheduler, RetryPolicy, SchedulerConfig, Store, StrategyRouter,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::arrival_scanner::{ArrivalScanner, ArrivalScannerConfig};
use crate::config::Config;
use crate::outbox_relay::{OutboxRelay, OutboxRelayConfig};
use crate::resolution_worker::{ResolutionWorker, ResolutionWorkerConfig};
use crate::resolver::Resolver;
use crate::sink::{EventSink, FanoutSink, LedgerSink, MailboxSink, PushSink};

/// Builder for creating a [`WorkerRuntime`].
pub struct WorkerRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    sink: Option<Arc<dyn EventSink>>,
    catalog: UnitCatalog,
    encounter: EncounterConfig,
    boss: BossConfig,
    scan_interval: Duration,
    scan_batch_size: u32,
    worker_concurrency: usize,
    worker_poll_interval: Duration,
    job_lease: chrono::Duration,
    retry_policy: RetryPolicy,
    direct_dispatch: Vec<MissionKind>,
    scheduler: SchedulerConfig,
    outbox: OutboxRelayConfig,
}

impl Default for WorkerRuntimeBuilder {
    fn default() -> Self {
        let config = Config::default();
        Self {
            store: None,
            sink: None,
            catalog: UnitCatalog::default(),
            encounter: EncounterConfig::default(),
            boss: BossConfig::default(),
            scan_interval: config.scan_interval,
            scan_batch_size: config.scan_batch_size,
            worker_concurrency: config.worker_concurrency,
            worker_poll_interval: config.worker_poll_interval,
            job_lease: config.job_lease,
            retry_policy: config.retry_policy,
            direct_dispatch: config.direct_dispatch,
            scheduler: SchedulerConfig::default(),
            outbox: OutboxRelayConfig::default(),
        }
    }
}

impl WorkerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every setting from an environment configuration.
    pub fn config(mut self, config: &Config) -> Self {
        self.scan_interval = config.scan_interval;
        self.scan_batch_size = config.scan_batch_size;
        self.worker_concurrency = config.worker_concurrency;
        self.worker_poll_interval = config.worker_poll_interval;
        self.job_lease = config.job_lease;
        self.retry_policy = config.retry_policy;
        self.direct_dispatch = config.direct_dispatch.clone();
        self.scheduler.min_travel = config.min_travel;
        self.scheduler.guards = config.guards;
        self.boss = BossConfig::default()
            .with_round_cap(config.boss_round_cap)
            .with_ability_chance(config.boss_ability_chance);
        self.outbox.poll_interval = config.outbox_poll_interval;
        self
    }

    /// Set the store (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the event sink. Defaults to the push channel, the mailbox and the ledger.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the unit catalog.
    pub fn catalog(mut self, catalog: UnitCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set the boss engine configuration.
    pub fn boss_config(mut self, boss: BossConfig) -> Self {
        self.boss = boss;
        self
    }

    /// Set the arrival scan period.
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Set the number of workers per mission type.
    pub fn worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency;
        self
    }

    /// Set the idle poll interval of resolution workers.
    pub fn worker_poll_interval(mut self, interval: Duration) -> Self {
        self.worker_poll_interval = interval;
        self
    }

    /// Set the retry policy for new jobs.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the mission types scheduled by direct dispatch.
    pub fn direct_dispatch(mut self, kinds: impl IntoIterator<Item = MissionKind>) -> Self {
        self.direct_dispatch = kinds.into_iter().collect();
        self
    }

    /// Set the outbox relay poll interval.
    pub fn outbox_poll_interval(mut self, interval: Duration) -> Self {
        self.outbox.poll_interval = interval;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<WorkerRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        if self.worker_concurrency == 0 {
            return Err(anyhow::anyhow!("worker_concurrency must be at least 1"));
        }

        let mailbox = Arc::new(MailboxSink::new());
        let sink: Arc<dyn EventSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(
                FanoutSink::new()
                    .with(Arc::new(PushSink))
                    .with(mailbox.clone())
                    .with(Arc::new(LedgerSink::new(store.clone()))),
            ),
        };

        let router: Arc<StrategyRouter<dyn Store>> = Arc::new(StrategyRouter::new(
            store.clone(),
            self.direct_dispatch.iter().copied(),
            self.retry_policy,
        ));
        let missions = Arc::new(MissionScheduler::new(
            store.clone(),
            self.catalog.clone(),
            router,
            self.scheduler,
        ));

        Ok(WorkerRuntimeConfig {
            store,
            sink,
            mailbox,
            missions,
            resolver: Arc::new(Resolver::new(self.catalog, self.encounter, self.boss)),
            scanner: ArrivalScannerConfig {
                poll_interval: self.scan_interval,
                batch_size: self.scan_batch_size,
                retry_policy: self.retry_policy,
            },
            worker: ResolutionWorkerConfig {
                poll_interval: self.worker_poll_interval,
                lease: self.job_lease,
            },
            worker_concurrency: self.worker_concurrency,
            outbox: self.outbox,
        })
    }
}

/// Configuration for a [`WorkerRuntime`].
pub struct WorkerRuntimeConfig {
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
    mailbox: Arc<MailboxSink>,
    missions: Arc<MissionScheduler<dyn Store>>,
    resolver: Arc<Resolver>,
    scanner: ArrivalScannerConfig,
    worker: ResolutionWorkerConfig,
    worker_concurrency: usize,
    outbox: OutboxRelayConfig,
}

impl WorkerRuntimeConfig {
    /// Start the runtime, spawning the scanner, worker pools and outbox relay.
    pub async fn start(self) -> Result<WorkerRuntime> {
        let scanner = ArrivalScanner::new(self.store.clone(), self.scanner);
        let scanner_shutdown = scanner.shutdown_handle();
        let scanner_handle = tokio::spawn(async move {
            scanner.run().await;
        });

        let mut workers = Vec::new();
        for kind in MissionKind::ALL {
            for _ in 0..self.worker_concurrency {
                let worker = ResolutionWorker::new(
                    self.store.clone(),
                    self.resolver.clone(),
                    kind,
                    self.worker.clone(),
                );
                let shutdown = worker.shutdown_handle();
                let handle = tokio::spawn(async move {
                    worker.run().await;
                });
                workers.push(WorkerHandle {
                    kind,
                    shutdown,
                    handle,
                });
            }
        }

        let relay = OutboxRelay::new(self.store.clone(), self.sink.clone(), self.outbox);
        let relay_shutdown = relay.shutdown_handle();
        let relay_handle = tokio::spawn(async move {
            relay.run().await;
        });

        info!(
            workers = workers.len(),
            per_kind = self.worker_concurrency,
            "WorkerRuntime started"
        );

        Ok(WorkerRuntime {
            scanner_handle,
            scanner_shutdown,
            workers,
            relay_handle,
            relay_shutdown,
            missions: self.missions,
            mailbox: self.mailbox,
            store: self.store,
        })
    }
}

struct WorkerHandle {
    kind: MissionKind,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// A running outpost worker set that can be embedded in an application.
///
/// The runtime manages:
/// - Arrival scanner claiming due missions
/// - Resolution workers, `worker_concurrency` per mission type
/// - Outbox relay delivering notifications and economy credits
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct WorkerRuntime {
    scanner_handle: JoinHandle<()>,
    scanner_shutdown: Arc<Notify>,
    workers: Vec<WorkerHandle>,
    relay_handle: JoinHandle<()>,
    relay_shutdown: Arc<Notify>,
    missions: Arc<MissionScheduler<dyn Store>>,
    mailbox: Arc<MailboxSink>,
    store: Arc<dyn Store>,
}

impl WorkerRuntime {
    /// Create a new builder.
    pub fn builder() -> WorkerRuntimeBuilder {
        WorkerRuntimeBuilder::new()
    }

    /// Mission scheduler for the request path.
    pub fn mission_scheduler(&self) -> Arc<MissionScheduler<dyn Store>> {
        self.missions.clone()
    }

    /// Mailbox fed by the default sink. Stays empty when a custom sink is set.
    pub fn mailbox(&self) -> Arc<MailboxSink> {
        self.mailbox.clone()
    }

    /// Store shared by every task.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Workers finish the job in flight, then the relay flushes pending
    /// events once more before stopping.
    pub async fn shutdown(self) -> Result<()> {
        info!("WorkerRuntime shutting down...");

        self.scanner_shutdown.notify_one();
        for worker in &self.workers {
            worker.shutdown.notify_one();
        }

        if let Err(e) = self.scanner_handle.await {
            error!("Arrival scanner task panicked: {}", e);
        }

        for worker in self.workers {
            if let Err(e) = worker.handle.await {
                error!("Resolution worker ({}) task panicked: {}", worker.kind, e);
            }
        }

        // Stop the relay last so it sees the final commits.
        self.relay_shutdown.notify_one();
        if let Err(e) = self.relay_handle.await {
            error!("Outbox relay task panicked: {}", e);
        }

        info!("WorkerRuntime shutdown complete");
        Ok(())
    }

    /// Check if every task is still running.
    pub fn is_running(&self) -> bool {
        !self.scanner_handle.is_finished()
            && !self.relay_handle.is_finished()
            && self.workers.iter().all(|w| !w.handle.is_finished())
    }
}
