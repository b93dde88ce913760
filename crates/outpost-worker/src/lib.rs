// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outpost Worker - Mission Arrival and Resolution
//!
//! This crate runs the background side of the mission lifecycle: it notices
//! missions whose arrival time has passed, resolves them with the combat
//! engine and delivers the resulting notifications and economy credits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Request path                                 │
//! │          MissionScheduler::create_mission / cancel_mission           │
//! └──────────────────────────────────────────────────────────────────────┘
//!                  │ insert (traveling)          │ direct dispatch
//!                  ▼                             ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         SQLite store                                 │
//! │     missions · resolution_jobs · world state · outbox_events         │
//! └──────────────────────────────────────────────────────────────────────┘
//!        ▲ claim due           ▲ claim job / commit          │ pending
//!        │ + enqueue           │                             ▼
//! ┌──────────────┐   ┌───────────────────────────┐   ┌──────────────────┐
//! │   Arrival    │   │   Resolution workers      │   │   Outbox relay   │
//! │   scanner    │   │   (N per mission type)    │   │                  │
//! └──────────────┘   │   Resolver ─► combat      │   └──────────────────┘
//!                    └───────────────────────────┘            │
//!                                                             ▼
//!                                            push · mailbox · ledger sinks
//! ```
//!
//! # Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | A mission arrives once | conditional `traveling → arrived` claim |
//! | A mission resolves once | conditional `arrived → resolved` commit |
//! | One job per mission | job key is the mission ID |
//! | Crashed workers recover | lease expiry, counted as an attempt |
//! | Retries are bounded | exhausted jobs become `failed` and are logged |
//! | Boss damage is never lost | optimistic version check, retried on conflict |
//! | Credits apply once | ledger keyed by outbox event ID |
//!
//! # Configuration
//!
//! See [`config::Config`] for the environment variables read by the binary.

#![deny(missing_docs)]

/// Arrival scanner.
pub mod arrival_scanner;

/// Worker configuration.
pub mod config;

/// Worker error types.
pub mod error;

/// Outbox relay.
pub mod outbox_relay;

/// Resolution workers.
pub mod resolution_worker;

/// Per-type mission resolution.
pub mod resolver;

/// Embeddable runtime.
pub mod runtime;

/// Outbox event sinks.
pub mod sink;

pub use arrival_scanner::{ArrivalScanner, ArrivalScannerConfig, ScanReport};
pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use outbox_relay::{OutboxRelay, OutboxRelayConfig, RelayReport};
pub use resolution_worker::{JobOutcome, ResolutionWorker, ResolutionWorkerConfig};
pub use resolver::Resolver;
pub use runtime::{WorkerRuntime, WorkerRuntimeBuilder, WorkerRuntimeConfig};
pub use sink::{EventSink, FanoutSink, LedgerSink, MailboxEntry, MailboxSink, PushSink};
