// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outpost Core - Mission Lifecycle
//!
//! This crate owns everything about a mission between the moment a player
//! sends it and the moment its outcome is committed: the mission model and
//! its status machine, validation and travel time, the persistence seams
//! (missions, resolution jobs, outbox) and their SQLite backend.
//!
//! # Architecture
//!
//! ```text
//!   player request
//!        │
//!        ▼
//! ┌──────────────────┐  insert (reserve units, cargo)   ┌──────────────────┐
//! │ MissionScheduler │─────────────────────────────────▶│   MissionStore   │
//! └────────┬─────────┘                                  │  (SQLite, sqlx)  │
//!          │ schedule_resolution                        └────────▲─────────┘
//!          ▼                                                     │
//! ┌──────────────────┐   direct dispatch   ┌──────────┐          │ commit
//! │ResolutionScheduler│───────────────────▶│ JobQueue │          │
//! └──────────────────┘                     └────┬─────┘          │
//!          ▲ poll: arrival scanner enqueues     │ claim          │
//!          │                                    ▼                │
//!   outpost-worker ─────────────────────▶ resolution worker ─────┘
//! ```
//!
//! # Mission Status
//!
//! | From | To | Who |
//! |------|----|-----|
//! | `traveling` | `arrived` | Arrival scanner or worker, conditional on arrival time |
//! | `traveling` | `cancelled` | Owner, conditional; refunds half the payload |
//! | `arrived` | `resolved` | Resolution commit, together with result and effects |
//! | `arrived` | `failed` | Resolution commit when the target no longer exists |
//!
//! A conditional update that affects no row returns [`Transition::Lost`].
//! That is not an error: someone else already advanced the mission.
//!
//! # Error Codes
//!
//! | Code | Class | Description |
//! |------|-------|-------------|
//! | `VALIDATION_ERROR` | rejected | Bad request, missing resources, cooldown |
//! | `MISSION_NOT_FOUND` | permanent | Mission row does not exist |
//! | `ENCOUNTER_NOT_FOUND` | permanent | Boss encounter does not exist |
//! | `TARGET_NOT_FOUND` | permanent | Target settlement or portal does not exist |
//! | `UNIT_DEFINITION_MISSING` | permanent | Unit type not in the catalog |
//! | `INVALID_TRANSITION` | permanent | Illegal status edge requested |
//! | `VERSION_CONFLICT` | transient | Shared state changed during resolution |
//! | `CORRUPT_RECORD` | permanent | Stored row cannot be decoded |
//! | `DATABASE_ERROR` | transient | Storage unavailable |

#![deny(missing_docs)]

/// Error types and codes.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Mission model, status machine and travel time.
pub mod mission;

/// Persistence traits and the SQLite backend.
pub mod persistence;

/// Mission creation and resolution scheduling.
pub mod scheduler;

pub use error::CoreError;
pub use mission::{
    Coordinates, MissionKind, MissionPayload, MissionRecord, MissionStatus, NewMission, Target,
    Transition, travel_time,
};
pub use persistence::{
    BossAttemptRecord, BossUpdate, EncounterRecord, Enqueued, JobQueue, JobStatus, LeaseSweep,
    MissionGuards, MissionStore, NewOutboxEvent, Outbox, OutboxEvent, PortalRecord, Resolution,
    ResolutionJob, RetryPolicy, SettlementRecord, SqliteStore, Store, StoredResult, WorldEffect,
};
pub use scheduler::{
    DirectDispatchScheduler, MissionRequest, MissionScheduler, PollScheduler, ResolutionScheduler,
    SchedulerConfig, StrategyRouter,
};
