// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and the SQLite backend.
//!
//! Three seams, one backend:
//!
//! - [`MissionStore`]: missions, world state the scheduler reserves from,
//!   boss encounters, and the resolution commit.
//! - [`JobQueue`]: delayed resolution jobs with leases and bounded retries.
//! - [`Outbox`]: events written inside resolution transactions, relayed to
//!   collaborators afterwards.

pub mod sqlite;

pub use self::sqlite::SqliteStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use outpost_combat::{BossState, CombatEvent, CombatOutcome, Force, Loot, Tier};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::mission::{Coordinates, MissionKind, MissionRecord, MissionStatus, NewMission, Transition};

/// A settlement or free settlement slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Settlement ID.
    pub id: String,
    /// Owning player, `None` for a free slot.
    pub owner_id: Option<String>,
    /// Grid position.
    pub coordinates: Coordinates,
    /// Loot tier when raided.
    pub tier: Tier,
}

/// A portal and the enemies guarding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalRecord {
    /// Portal ID.
    pub id: String,
    /// Loot tier.
    pub tier: Tier,
    /// Difficulty level (1 = base).
    pub difficulty: u32,
    /// Grid position.
    pub coordinates: Coordinates,
    /// Defending force.
    pub enemy_units: Force,
    /// Still open for expeditions.
    pub active: bool,
    /// Player who cleared it.
    pub cleared_by: Option<String>,
}

/// Shared, persistent boss state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterRecord {
    /// Encounter ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Boss type (selects a named-boss drop).
    pub boss_type: String,
    /// Loot tier.
    pub tier: Tier,
    /// Grid position.
    pub coordinates: Coordinates,
    /// Full health.
    pub max_health: u64,
    /// Health left, in `[0, max_health]`.
    pub current_health: u64,
    /// Defense rating.
    pub defense: u64,
    /// Phase derived from health when last written.
    pub current_phase: u8,
    /// Terminal flag.
    pub defeated: bool,
    /// Player who landed the final blow.
    pub defeated_by: Option<String>,
    /// Optimistic concurrency version, bumped on every write.
    pub version: i64,
}

impl EncounterRecord {
    /// A fresh encounter at full health.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        boss_type: impl Into<String>,
        tier: Tier,
        coordinates: Coordinates,
        max_health: u64,
        defense: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            boss_type: boss_type.into(),
            tier,
            coordinates,
            max_health,
            current_health: max_health,
            defense,
            current_phase: 1,
            defeated: false,
            defeated_by: None,
            version: 0,
        }
    }

    /// State handed to the boss engine.
    pub fn boss_state(&self) -> BossState {
        BossState {
            max_health: self.max_health,
            current_health: self.current_health,
            defense: self.defense,
            defeated: self.defeated,
        }
    }
}

/// One player's immutable battle session against an encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossAttemptRecord {
    /// Attempt ID.
    pub id: Uuid,
    /// Encounter fought.
    pub encounter_id: String,
    /// Mission that carried the attempt.
    pub mission_id: Uuid,
    /// Acting player.
    pub actor_id: String,
    /// Units sent.
    pub units_sent: Force,
    /// Units lost.
    pub units_lost: Force,
    /// Units that survived.
    pub units_survived: Force,
    /// Health removed from the boss.
    pub damage_dealt: u64,
    /// Highest phase reached.
    pub phase_reached: u8,
    /// Verdict.
    pub outcome: CombatOutcome,
    /// Reward granted.
    pub rewards: Loot,
    /// Replay log.
    pub log: Vec<CombatEvent>,
    /// When the attempt was recorded.
    pub created_at: DateTime<Utc>,
}

/// A persisted resolution outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    /// Mission resolved.
    pub mission_id: Uuid,
    /// Outcome string (victory, defeat, draw).
    pub outcome: Option<String>,
    /// Full result document.
    pub result: serde_json::Value,
    /// RNG seed used.
    pub seed: u64,
    /// When it was written.
    pub created_at: DateTime<Utc>,
}

/// Boss write guarded by the version read before the fight.
#[derive(Debug, Clone, PartialEq)]
pub struct BossUpdate {
    /// Encounter ID.
    pub encounter_id: String,
    /// Version the fight was computed against.
    pub expected_version: i64,
    /// New health.
    pub current_health: u64,
    /// New phase.
    pub current_phase: u8,
    /// Whether the boss fell.
    pub defeated: bool,
    /// Player who landed the final blow.
    pub defeated_by: Option<String>,
}

/// A world mutation applied inside the resolution transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEffect {
    /// Add units to a garrison (e.g. survivors returning home).
    ReinforceGarrison {
        /// Settlement ID.
        settlement_id: String,
        /// Units to add.
        units: Force,
    },
    /// Remove units from a garrison, floored at zero.
    DepleteGarrison {
        /// Settlement ID.
        settlement_id: String,
        /// Units to remove.
        units: Force,
    },
    /// Give a free slot an owner; conflicts if it was taken meanwhile.
    ClaimSettlement {
        /// Settlement ID.
        settlement_id: String,
        /// New owner.
        owner_id: String,
    },
    /// Close a portal; conflicts if it was cleared meanwhile.
    ClearPortal {
        /// Portal ID.
        portal_id: String,
        /// Player who cleared it.
        cleared_by: String,
    },
    /// Persist boss state; conflicts on a version mismatch.
    UpdateBoss(BossUpdate),
}

/// Outbox event before insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    /// Player addressed, `None` for broadcasts.
    pub recipient_id: Option<String>,
    /// Event type (`mission.resolved`, `economy.credit`, ...).
    pub event_type: String,
    /// Event body.
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    /// Event for one player.
    pub fn to(recipient: impl Into<String>, event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            recipient_id: Some(recipient.into()),
            event_type: event_type.to_string(),
            payload,
        }
    }

    /// Event for everyone.
    pub fn broadcast(event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            recipient_id: None,
            event_type: event_type.to_string(),
            payload,
        }
    }
}

/// Everything one resolution writes, committed atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Mission being closed.
    pub mission_id: Uuid,
    /// `Resolved` or `Failed`.
    pub status: MissionStatus,
    /// Outcome string for the result row.
    pub outcome: Option<String>,
    /// Result document.
    pub result: serde_json::Value,
    /// RNG seed used.
    pub seed: u64,
    /// Failure reason for `Failed`.
    pub failure_reason: Option<String>,
    /// World mutations.
    pub effects: Vec<WorldEffect>,
    /// Boss attempt to record.
    pub attempt: Option<BossAttemptRecord>,
    /// Events for the outbox.
    pub events: Vec<NewOutboxEvent>,
}

/// Rules checked inside the mission-creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissionGuards {
    /// Minimum interval between attacks by one player on one target.
    pub attack_cooldown: Duration,
    /// Concurrent colonization missions allowed per player.
    pub max_active_colonizations: u32,
}

impl Default for MissionGuards {
    fn default() -> Self {
        Self {
            attack_cooldown: Duration::seconds(3600),
            max_active_colonizations: 3,
        }
    }
}

/// Resolution job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_at`.
    Queued,
    /// Leased by a worker.
    Running,
    /// Done.
    Completed,
    /// Retries exhausted or permanent error; needs an operator.
    Failed,
}

impl JobStatus {
    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::CorruptRecord {
                entity: "resolution_job".to_string(),
                details: format!("unknown status '{}'", other),
            }),
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries before the job fails for good.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::seconds(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure: `backoff × 2^(attempt − 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.backoff * (1i32 << exponent)
    }
}

/// A resolution job row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionJob {
    /// Deduplication key (the mission ID).
    pub job_key: String,
    /// Mission to resolve.
    pub mission_id: Uuid,
    /// Mission type, selects the worker pool.
    pub kind: MissionKind,
    /// Job status.
    pub status: JobStatus,
    /// Earliest delivery time.
    pub run_at: DateTime<Utc>,
    /// Deliveries so far.
    pub attempts: u32,
    /// Delivery limit.
    pub max_attempts: u32,
    /// Backoff base.
    pub backoff: Duration,
    /// Lease expiry while running.
    pub lease_until: Option<DateTime<Utc>>,
    /// Last failure message.
    pub last_error: Option<String>,
}

impl ResolutionJob {
    /// Policy the job was enqueued with.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
        }
    }

    /// No deliveries left after the current one.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new job row was created.
    Queued,
    /// A job with this key already exists.
    Duplicate,
}

/// Result of sweeping expired leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaseSweep {
    /// Jobs put back in the queue.
    pub requeued: u64,
    /// Jobs failed because their attempts were used up.
    pub failed: u64,
}

/// An undelivered outbox event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Row ID, also the idempotency key for consumers.
    pub id: i64,
    /// Player addressed, `None` for broadcasts.
    pub recipient_id: Option<String>,
    /// Event type.
    pub event_type: String,
    /// Event body.
    pub payload: serde_json::Value,
    /// When the event was written.
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

/// Missions, world state and boss encounters.
#[allow(missing_docs)]
#[async_trait]
pub trait MissionStore: Send + Sync {
    /// Validate ownership, cooldowns and limits, deduct reserved units and
    /// resources, and insert the mission as `traveling`, all in one
    /// transaction. Any violation rolls everything back.
    async fn insert_mission(
        &self,
        mission: &NewMission,
        guards: &MissionGuards,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    async fn get_mission(&self, mission_id: Uuid) -> Result<Option<MissionRecord>, CoreError>;

    /// Traveling missions with `arrival_at <= now`, oldest arrival first.
    async fn find_due_missions(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MissionRecord>, CoreError>;

    /// Conditional `traveling → arrived` for a due mission.
    async fn claim_arrival(&self, mission_id: Uuid, now: DateTime<Utc>) -> Result<Transition, CoreError>;

    /// Conditional `traveling → cancelled`, refunding `refund_percent` of the
    /// reserved units and resources to the origin in the same transaction.
    async fn cancel_mission(
        &self,
        mission_id: Uuid,
        actor_id: &str,
        refund_percent: u64,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError>;

    /// Conditional `arrived → resolved|failed` plus result, effects, attempt
    /// and outbox events, atomically. `Lost` when the mission was no longer
    /// `arrived`; `VersionConflict` when shared state moved underneath.
    async fn commit_resolution(
        &self,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError>;

    /// Arrived missions with no resolution job at all.
    async fn find_stranded(&self, limit: u32) -> Result<Vec<MissionRecord>, CoreError>;

    async fn get_result(&self, mission_id: Uuid) -> Result<Option<StoredResult>, CoreError>;

    async fn upsert_settlement(&self, settlement: &SettlementRecord) -> Result<(), CoreError>;

    async fn get_settlement(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, CoreError>;

    async fn set_garrison(
        &self,
        settlement_id: &str,
        unit_type: &str,
        quantity: u64,
    ) -> Result<(), CoreError>;

    async fn get_garrison(&self, settlement_id: &str) -> Result<Force, CoreError>;

    async fn set_stockpile(
        &self,
        settlement_id: &str,
        resource: &str,
        amount: u64,
    ) -> Result<(), CoreError>;

    async fn get_stockpile(&self, settlement_id: &str) -> Result<BTreeMap<String, u64>, CoreError>;

    /// Credit resources once per `event_id`. Returns false if already applied.
    async fn credit_stockpile(
        &self,
        event_id: i64,
        settlement_id: &str,
        resources: &BTreeMap<String, u64>,
    ) -> Result<bool, CoreError>;

    async fn upsert_portal(&self, portal: &PortalRecord) -> Result<(), CoreError>;

    async fn get_portal(&self, portal_id: &str) -> Result<Option<PortalRecord>, CoreError>;

    async fn upsert_encounter(&self, encounter: &EncounterRecord) -> Result<(), CoreError>;

    async fn get_encounter(&self, encounter_id: &str) -> Result<Option<EncounterRecord>, CoreError>;

    /// Administrative reset: full health, phase 1, not defeated, version bumped.
    async fn reset_encounter(&self, encounter_id: &str, now: DateTime<Utc>) -> Result<(), CoreError>;

    /// Attempts against an encounter, most damage first.
    async fn list_attempts(
        &self,
        encounter_id: &str,
        limit: u32,
    ) -> Result<Vec<BossAttemptRecord>, CoreError>;
}

/// Delayed resolution jobs.
#[allow(missing_docs)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a job keyed by mission ID. Duplicate keys are rejected.
    async fn enqueue(
        &self,
        mission_id: Uuid,
        run_at: DateTime<Utc>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Enqueued, CoreError>;

    /// Lease the next due job of one mission type.
    async fn claim_next(
        &self,
        kind: MissionKind,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<ResolutionJob>, CoreError>;

    /// Mark a leased job done.
    ///
    /// The writes below apply only while `job` is still running under the
    /// lease it was claimed with; a worker whose lease expired and was
    /// reclaimed gets [`Transition::Lost`].
    async fn complete(
        &self,
        job: &ResolutionJob,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError>;

    /// Put a failed delivery back in the queue for `run_at`.
    async fn retry(
        &self,
        job: &ResolutionJob,
        error: &str,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError>;

    /// Put a job back without counting the delivery (mission not due yet).
    async fn reschedule(
        &self,
        job: &ResolutionJob,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError>;

    async fn fail(
        &self,
        job: &ResolutionJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError>;

    /// Recover jobs whose worker died: requeue or fail by remaining attempts.
    async fn requeue_expired(&self, now: DateTime<Utc>) -> Result<LeaseSweep, CoreError>;

    async fn get_job(&self, job_key: &str) -> Result<Option<ResolutionJob>, CoreError>;

    async fn list_failed_jobs(&self, limit: u32) -> Result<Vec<ResolutionJob>, CoreError>;

    /// Operator action: re-queue a failed job with a fresh attempt budget.
    async fn retry_failed_job(&self, job_key: &str, now: DateTime<Utc>) -> Result<bool, CoreError>;
}

/// Transactional outbox.
#[allow(missing_docs)]
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Undelivered events with fewer than `max_attempts` failures, oldest first.
    async fn pending_events(&self, limit: u32, max_attempts: u32) -> Result<Vec<OutboxEvent>, CoreError>;

    async fn mark_delivered(&self, event_id: i64, now: DateTime<Utc>) -> Result<(), CoreError>;

    async fn record_delivery_failure(&self, event_id: i64, error: &str) -> Result<(), CoreError>;
}

/// A backend providing every persistence seam.
pub trait Store: MissionStore + JobQueue + Outbox {}

impl<T: MissionStore + JobQueue + Outbox> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::seconds(5));
        assert_eq!(policy.delay_after(2), Duration::seconds(10));
        assert_eq!(policy.delay_after(3), Duration::seconds(20));
    }

    #[test]
    fn test_encounter_starts_at_full_health() {
        let encounter = EncounterRecord::new(
            "b-1",
            "Titan",
            "ancient_titan",
            Tier::Red,
            Coordinates::new(0, 0),
            5000,
            80,
        );
        let state = encounter.boss_state();
        assert_eq!(state.current_health, 5000);
        assert_eq!(state.phase(), 1);
        assert!(!state.defeated);
    }
}
