// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use outpost_combat::{Force, Tier};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreError;
use crate::mission::{
    Coordinates, MissionKind, MissionPayload, MissionRecord, MissionStatus, NewMission, Target,
    Transition, portion,
};

use super::{
    BossAttemptRecord, EncounterRecord, Enqueued, JobQueue, JobStatus, LeaseSweep, MissionGuards,
    MissionStore, NewOutboxEvent, Outbox, OutboxEvent, PortalRecord, Resolution, ResolutionJob,
    SettlementRecord, StoredResult, WorldEffect,
};

use crate::migrations::SQLITE as MIGRATOR;

const MISSION_COLUMNS: &str = "id, kind, status, actor_id, origin_id, target_kind, target_id, \
     payload, departure_at, arrival_at, finished_at, failure_reason";

const JOB_COLUMNS: &str = "job_key, mission_id, kind, status, run_at, attempts, max_attempts, \
     backoff_ms, lease_until, last_error";

const ACTIVE_STATUSES: &str = "('pending', 'traveling', 'arrived')";

/// SQLite-backed store implementing every persistence seam.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL and run all migrations.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    ///
    /// ```ignore
    /// let store = SqliteStore::from_path(".data/outpost.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::DatabaseError {
                    operation: "create_dir".to_string(),
                    details: format!("Failed to create directory {:?}: {}", parent, e),
                })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(value: i64) -> Result<DateTime<Utc>, CoreError> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| CoreError::CorruptRecord {
        entity: "timestamp".to_string(),
        details: format!("{} is out of range", value),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CoreError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(entity: &str, text: &str) -> Result<T, CoreError> {
    serde_json::from_str(text).map_err(|e| CoreError::CorruptRecord {
        entity: entity.to_string(),
        details: e.to_string(),
    })
}

fn parse_uuid(entity: &str, text: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(text).map_err(|e| CoreError::CorruptRecord {
        entity: entity.to_string(),
        details: format!("bad id '{}': {}", text, e),
    })
}

fn parse_tier(entity: &str, text: &str) -> Result<Tier, CoreError> {
    text.parse().map_err(|details| CoreError::CorruptRecord {
        entity: entity.to_string(),
        details,
    })
}

fn mission_from_row(row: &SqliteRow) -> Result<MissionRecord, CoreError> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let target_kind: String = row.try_get("target_kind")?;
    let payload: String = row.try_get("payload")?;
    let finished_at: Option<i64> = row.try_get("finished_at")?;

    let kind: MissionKind = kind.parse().map_err(|_| CoreError::CorruptRecord {
        entity: "mission".to_string(),
        details: format!("unknown kind '{}'", kind),
    })?;

    Ok(MissionRecord {
        id: parse_uuid("mission", &id)?,
        kind,
        status: status.parse()?,
        actor_id: row.try_get("actor_id")?,
        origin_id: row.try_get("origin_id")?,
        target: Target::from_parts(&target_kind, row.try_get("target_id")?)?,
        payload: from_json::<MissionPayload>("mission", &payload)?,
        departure_at: from_millis(row.try_get("departure_at")?)?,
        arrival_at: from_millis(row.try_get("arrival_at")?)?,
        finished_at: finished_at.map(from_millis).transpose()?,
        failure_reason: row.try_get("failure_reason")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<ResolutionJob, CoreError> {
    let mission_id: String = row.try_get("mission_id")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let lease_until: Option<i64> = row.try_get("lease_until")?;
    let attempts: i64 = row.try_get("attempts")?;
    let max_attempts: i64 = row.try_get("max_attempts")?;

    let kind: MissionKind = kind.parse().map_err(|_| CoreError::CorruptRecord {
        entity: "resolution_job".to_string(),
        details: format!("unknown kind '{}'", kind),
    })?;

    Ok(ResolutionJob {
        job_key: row.try_get("job_key")?,
        mission_id: parse_uuid("resolution_job", &mission_id)?,
        kind,
        status: status.parse::<JobStatus>()?,
        run_at: from_millis(row.try_get("run_at")?)?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        max_attempts: u32::try_from(max_attempts).unwrap_or(0),
        backoff: Duration::milliseconds(row.try_get("backoff_ms")?),
        lease_until: lease_until.map(from_millis).transpose()?,
        last_error: row.try_get("last_error")?,
    })
}

fn encounter_from_row(row: &SqliteRow) -> Result<EncounterRecord, CoreError> {
    let tier: String = row.try_get("tier")?;
    let phase: i64 = row.try_get("current_phase")?;
    Ok(EncounterRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        boss_type: row.try_get("boss_type")?,
        tier: parse_tier("boss_encounter", &tier)?,
        coordinates: Coordinates::new(row.try_get("x")?, row.try_get("y")?),
        max_health: to_u64(row.try_get("max_health")?),
        current_health: to_u64(row.try_get("current_health")?),
        defense: to_u64(row.try_get("defense")?),
        current_phase: u8::try_from(phase).unwrap_or(1),
        defeated: row.try_get("defeated")?,
        defeated_by: row.try_get("defeated_by")?,
        version: row.try_get("version")?,
    })
}

fn attempt_from_row(row: &SqliteRow) -> Result<BossAttemptRecord, CoreError> {
    let id: String = row.try_get("id")?;
    let mission_id: String = row.try_get("mission_id")?;
    let outcome: String = row.try_get("outcome")?;
    let phase: i64 = row.try_get("phase_reached")?;
    let units_sent: String = row.try_get("units_sent")?;
    let units_lost: String = row.try_get("units_lost")?;
    let units_survived: String = row.try_get("units_survived")?;
    let rewards: String = row.try_get("rewards")?;
    let log: String = row.try_get("log")?;

    Ok(BossAttemptRecord {
        id: parse_uuid("boss_attempt", &id)?,
        encounter_id: row.try_get("encounter_id")?,
        mission_id: parse_uuid("boss_attempt", &mission_id)?,
        actor_id: row.try_get("actor_id")?,
        units_sent: from_json("boss_attempt", &units_sent)?,
        units_lost: from_json("boss_attempt", &units_lost)?,
        units_survived: from_json("boss_attempt", &units_survived)?,
        damage_dealt: to_u64(row.try_get("damage_dealt")?),
        phase_reached: u8::try_from(phase).unwrap_or(1),
        outcome: from_json("boss_attempt", &format!("\"{}\"", outcome))?,
        rewards: from_json("boss_attempt", &rewards)?,
        log: from_json("boss_attempt", &log)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

async fn add_units(
    conn: &mut SqliteConnection,
    settlement_id: &str,
    units: &Force,
) -> Result<(), CoreError> {
    for (unit_type, quantity) in units.iter().filter(|(_, quantity)| **quantity > 0) {
        sqlx::query(
            r#"
            INSERT INTO garrisons (settlement_id, unit_type, quantity)
            VALUES (?, ?, ?)
            ON CONFLICT(settlement_id, unit_type)
            DO UPDATE SET quantity = quantity + excluded.quantity
            "#,
        )
        .bind(settlement_id)
        .bind(unit_type)
        .bind(to_i64(*quantity))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn remove_units(
    conn: &mut SqliteConnection,
    settlement_id: &str,
    units: &Force,
) -> Result<(), CoreError> {
    for (unit_type, quantity) in units.iter().filter(|(_, quantity)| **quantity > 0) {
        sqlx::query(
            r#"
            UPDATE garrisons
            SET quantity = MAX(quantity - ?, 0)
            WHERE settlement_id = ? AND unit_type = ?
            "#,
        )
        .bind(to_i64(*quantity))
        .bind(settlement_id)
        .bind(unit_type)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn add_resources(
    conn: &mut SqliteConnection,
    settlement_id: &str,
    resources: &BTreeMap<String, u64>,
) -> Result<(), CoreError> {
    for (resource, amount) in resources.iter().filter(|(_, amount)| **amount > 0) {
        sqlx::query(
            r#"
            INSERT INTO stockpiles (settlement_id, resource, amount)
            VALUES (?, ?, ?)
            ON CONFLICT(settlement_id, resource)
            DO UPDATE SET amount = amount + excluded.amount
            "#,
        )
        .bind(settlement_id)
        .bind(resource)
        .bind(to_i64(*amount))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_event(
    conn: &mut SqliteConnection,
    event: &NewOutboxEvent,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_events (recipient_id, event_type, payload, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&event.recipient_id)
    .bind(&event.event_type)
    .bind(to_json(&event.payload)?)
    .bind(millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn count(conn: &mut SqliteConnection, sql: &str, binds: &[&str]) -> Result<i64, CoreError> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    for value in binds {
        query = query.bind(*value);
    }
    Ok(query.fetch_one(&mut *conn).await?)
}

async fn apply_effect(
    conn: &mut SqliteConnection,
    effect: &WorldEffect,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    match effect {
        WorldEffect::ReinforceGarrison {
            settlement_id,
            units,
        } => add_units(conn, settlement_id, units).await,
        WorldEffect::DepleteGarrison {
            settlement_id,
            units,
        } => remove_units(conn, settlement_id, units).await,
        WorldEffect::ClaimSettlement {
            settlement_id,
            owner_id,
        } => {
            let result = sqlx::query(
                r#"
                UPDATE settlements
                SET owner_id = ?
                WHERE id = ? AND owner_id IS NULL
                "#,
            )
            .bind(owner_id)
            .bind(settlement_id)
            .execute(&mut *conn)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::VersionConflict {
                    entity: "settlement".to_string(),
                    id: settlement_id.clone(),
                });
            }
            Ok(())
        }
        WorldEffect::ClearPortal {
            portal_id,
            cleared_by,
        } => {
            let result = sqlx::query(
                r#"
                UPDATE portals
                SET active = 0, cleared_by = ?
                WHERE id = ? AND active = 1
                "#,
            )
            .bind(cleared_by)
            .bind(portal_id)
            .execute(&mut *conn)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::VersionConflict {
                    entity: "portal".to_string(),
                    id: portal_id.clone(),
                });
            }
            Ok(())
        }
        WorldEffect::UpdateBoss(update) => {
            let result = sqlx::query(
                r#"
                UPDATE boss_encounters
                SET current_health = ?,
                    current_phase = ?,
                    defeated = ?,
                    defeated_by = ?,
                    version = version + 1,
                    updated_at = ?
                WHERE id = ? AND version = ? AND defeated = 0
                "#,
            )
            .bind(to_i64(update.current_health))
            .bind(i64::from(update.current_phase))
            .bind(update.defeated)
            .bind(&update.defeated_by)
            .bind(millis(now))
            .bind(&update.encounter_id)
            .bind(update.expected_version)
            .execute(&mut *conn)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::VersionConflict {
                    entity: "boss_encounter".to_string(),
                    id: update.encounter_id.clone(),
                });
            }
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl MissionStore for SqliteStore {
    async fn insert_mission(
        &self,
        mission: &NewMission,
        guards: &MissionGuards,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if mission.arrival_at < mission.departure_at {
            return Err(CoreError::validation(
                "arrival_at",
                "arrival cannot precede departure",
            ));
        }

        let mut tx = self.pool.begin().await?;

        let owner: Option<Option<String>> =
            sqlx::query_scalar("SELECT owner_id FROM settlements WHERE id = ?")
                .bind(&mission.origin_id)
                .fetch_optional(&mut *tx)
                .await?;
        match owner {
            None => {
                return Err(CoreError::validation(
                    "origin_id",
                    format!("settlement '{}' does not exist", mission.origin_id),
                ));
            }
            Some(owner) if owner.as_deref() != Some(mission.actor_id.as_str()) => {
                return Err(CoreError::validation(
                    "origin_id",
                    "origin settlement is not owned by the actor",
                ));
            }
            Some(_) => {}
        }

        match mission.kind() {
            MissionKind::Attack => {
                let since = millis(now - guards.attack_cooldown).to_string();
                let recent = count(
                    &mut tx,
                    r#"
                    SELECT COUNT(*) FROM missions
                    WHERE actor_id = ? AND kind = 'attack' AND target_id = ?
                      AND status != 'cancelled' AND departure_at > CAST(? AS INTEGER)
                    "#,
                    &[&mission.actor_id, mission.target.id(), &since],
                )
                .await?;
                if recent > 0 {
                    return Err(CoreError::validation(
                        "target",
                        "attack cooldown on this target has not expired",
                    ));
                }
            }
            MissionKind::Colonization => {
                let active = count(
                    &mut tx,
                    &format!(
                        "SELECT COUNT(*) FROM missions WHERE actor_id = ? AND kind = 'colonization' AND status IN {}",
                        ACTIVE_STATUSES
                    ),
                    &[&mission.actor_id],
                )
                .await?;
                if active >= i64::from(guards.max_active_colonizations) {
                    return Err(CoreError::validation(
                        "kind",
                        format!(
                            "at most {} colonization missions may be underway",
                            guards.max_active_colonizations
                        ),
                    ));
                }
                let contested = count(
                    &mut tx,
                    &format!(
                        "SELECT COUNT(*) FROM missions WHERE kind = 'colonization' AND target_id = ? AND status IN {}",
                        ACTIVE_STATUSES
                    ),
                    &[mission.target.id()],
                )
                .await?;
                if contested > 0 {
                    return Err(CoreError::validation(
                        "target",
                        "a colonization mission is already heading to this slot",
                    ));
                }
            }
            _ => {}
        }

        for (unit_type, quantity) in mission.payload.reserved_units() {
            if quantity == 0 {
                continue;
            }
            let result = sqlx::query(
                r#"
                UPDATE garrisons
                SET quantity = quantity - ?
                WHERE settlement_id = ? AND unit_type = ? AND quantity >= ?
                "#,
            )
            .bind(to_i64(quantity))
            .bind(&mission.origin_id)
            .bind(&unit_type)
            .bind(to_i64(quantity))
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::validation(
                    "units",
                    format!("not enough '{}' available", unit_type),
                ));
            }
        }

        for (resource, amount) in mission.payload.reserved_resources() {
            if amount == 0 {
                continue;
            }
            let result = sqlx::query(
                r#"
                UPDATE stockpiles
                SET amount = amount - ?
                WHERE settlement_id = ? AND resource = ? AND amount >= ?
                "#,
            )
            .bind(to_i64(amount))
            .bind(&mission.origin_id)
            .bind(&resource)
            .bind(to_i64(amount))
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::validation(
                    "cargo",
                    format!("not enough '{}' available", resource),
                ));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO missions (id, kind, status, actor_id, origin_id, target_kind, target_id,
                                  payload, departure_at, arrival_at, created_at)
            VALUES (?, ?, 'traveling', ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mission.id.to_string())
        .bind(mission.kind().as_str())
        .bind(&mission.actor_id)
        .bind(&mission.origin_id)
        .bind(mission.target.kind_str())
        .bind(mission.target.id())
        .bind(to_json(&mission.payload)?)
        .bind(millis(mission.departure_at))
        .bind(millis(mission.arrival_at))
        .bind(millis(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_mission(&self, mission_id: Uuid) -> Result<Option<MissionRecord>, CoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM missions WHERE id = ?", MISSION_COLUMNS))
            .bind(mission_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(mission_from_row).transpose()
    }

    async fn find_due_missions(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MissionRecord>, CoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM missions
            WHERE status = 'traveling' AND arrival_at <= ?
            ORDER BY arrival_at ASC
            LIMIT ?
            "#,
            MISSION_COLUMNS
        ))
        .bind(millis(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(mission_from_row).collect()
    }

    async fn claim_arrival(&self, mission_id: Uuid, now: DateTime<Utc>) -> Result<Transition, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE missions
            SET status = 'arrived'
            WHERE id = ? AND status = 'traveling' AND arrival_at <= ?
            "#,
        )
        .bind(mission_id.to_string())
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        Ok(Transition::from_applied(result.rows_affected() > 0))
    }

    async fn cancel_mission(
        &self,
        mission_id: Uuid,
        actor_id: &str,
        refund_percent: u64,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {} FROM missions WHERE id = ?", MISSION_COLUMNS))
            .bind(mission_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let mission = match row {
            Some(row) => mission_from_row(&row)?,
            None => {
                return Err(CoreError::MissionNotFound {
                    mission_id: mission_id.to_string(),
                });
            }
        };
        if mission.actor_id != actor_id {
            return Err(CoreError::validation(
                "actor_id",
                "only the mission owner can cancel it",
            ));
        }

        let result = sqlx::query(
            r#"
            UPDATE missions
            SET status = 'cancelled', finished_at = ?
            WHERE id = ? AND status = 'traveling'
            "#,
        )
        .bind(millis(now))
        .bind(mission_id.to_string())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(Transition::Lost);
        }

        let refunded_units = portion(&mission.payload.reserved_units(), refund_percent);
        let refunded_resources = portion(&mission.payload.reserved_resources(), refund_percent);
        add_units(&mut tx, &mission.origin_id, &refunded_units).await?;
        add_resources(&mut tx, &mission.origin_id, &refunded_resources).await?;

        sqlx::query("DELETE FROM resolution_jobs WHERE job_key = ? AND status = 'queued'")
            .bind(mission_id.to_string())
            .execute(&mut *tx)
            .await?;

        let event = NewOutboxEvent::to(
            &mission.actor_id,
            "mission.cancelled",
            serde_json::json!({
                "mission_id": mission_id,
                "kind": mission.kind,
                "origin_id": mission.origin_id,
                "refunded_units": refunded_units,
                "refunded_resources": refunded_resources,
            }),
        );
        insert_event(&mut tx, &event, now).await?;

        tx.commit().await?;
        Ok(Transition::Applied)
    }

    async fn commit_resolution(
        &self,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        if !MissionStatus::Arrived.can_transition_to(resolution.status) {
            return Err(CoreError::InvalidTransition {
                mission_id: resolution.mission_id.to_string(),
                from: MissionStatus::Arrived.to_string(),
                to: resolution.status.to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE missions
            SET status = ?, finished_at = ?, failure_reason = ?
            WHERE id = ? AND status = 'arrived'
            "#,
        )
        .bind(resolution.status.as_str())
        .bind(millis(now))
        .bind(&resolution.failure_reason)
        .bind(resolution.mission_id.to_string())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(Transition::Lost);
        }

        sqlx::query(
            r#"
            INSERT INTO combat_results (mission_id, outcome, result, seed, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(resolution.mission_id.to_string())
        .bind(&resolution.outcome)
        .bind(to_json(&resolution.result)?)
        .bind(resolution.seed as i64)
        .bind(millis(now))
        .execute(&mut *tx)
        .await?;

        for effect in &resolution.effects {
            apply_effect(&mut tx, effect, now).await?;
        }

        if let Some(attempt) = &resolution.attempt {
            sqlx::query(
                r#"
                INSERT INTO boss_attempts (id, encounter_id, mission_id, actor_id, units_sent,
                                           units_lost, units_survived, damage_dealt, phase_reached,
                                           outcome, rewards, log, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(attempt.id.to_string())
            .bind(&attempt.encounter_id)
            .bind(attempt.mission_id.to_string())
            .bind(&attempt.actor_id)
            .bind(to_json(&attempt.units_sent)?)
            .bind(to_json(&attempt.units_lost)?)
            .bind(to_json(&attempt.units_survived)?)
            .bind(to_i64(attempt.damage_dealt))
            .bind(i64::from(attempt.phase_reached))
            .bind(attempt.outcome.as_str())
            .bind(to_json(&attempt.rewards)?)
            .bind(to_json(&attempt.log)?)
            .bind(millis(attempt.created_at))
            .execute(&mut *tx)
            .await?;
        }

        for event in &resolution.events {
            insert_event(&mut tx, event, now).await?;
        }

        tx.commit().await?;
        debug!(mission_id = %resolution.mission_id, status = %resolution.status, "Resolution committed");
        Ok(Transition::Applied)
    }

    async fn find_stranded(&self, limit: u32) -> Result<Vec<MissionRecord>, CoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM missions m
            WHERE m.status = 'arrived'
              AND NOT EXISTS (SELECT 1 FROM resolution_jobs j WHERE j.mission_id = m.id)
            ORDER BY m.arrival_at ASC
            LIMIT ?
            "#,
            MISSION_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(mission_from_row).collect()
    }

    async fn get_result(&self, mission_id: Uuid) -> Result<Option<StoredResult>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT mission_id, outcome, result, seed, created_at
            FROM combat_results
            WHERE mission_id = ?
            "#,
        )
        .bind(mission_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let result: String = row.try_get("result")?;
        let seed: i64 = row.try_get("seed")?;
        Ok(Some(StoredResult {
            mission_id,
            outcome: row.try_get("outcome")?,
            result: from_json("combat_result", &result)?,
            seed: seed as u64,
            created_at: from_millis(row.try_get("created_at")?)?,
        }))
    }

    async fn upsert_settlement(&self, settlement: &SettlementRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO settlements (id, owner_id, x, y, tier)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                x = excluded.x,
                y = excluded.y,
                tier = excluded.tier
            "#,
        )
        .bind(&settlement.id)
        .bind(&settlement.owner_id)
        .bind(settlement.coordinates.x)
        .bind(settlement.coordinates.y)
        .bind(settlement.tier.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_settlement(&self, settlement_id: &str) -> Result<Option<SettlementRecord>, CoreError> {
        let row = sqlx::query("SELECT id, owner_id, x, y, tier FROM settlements WHERE id = ?")
            .bind(settlement_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let tier: String = row.try_get("tier")?;
        Ok(Some(SettlementRecord {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            coordinates: Coordinates::new(row.try_get("x")?, row.try_get("y")?),
            tier: parse_tier("settlement", &tier)?,
        }))
    }

    async fn set_garrison(
        &self,
        settlement_id: &str,
        unit_type: &str,
        quantity: u64,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO garrisons (settlement_id, unit_type, quantity)
            VALUES (?, ?, ?)
            ON CONFLICT(settlement_id, unit_type) DO UPDATE SET quantity = excluded.quantity
            "#,
        )
        .bind(settlement_id)
        .bind(unit_type)
        .bind(to_i64(quantity))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_garrison(&self, settlement_id: &str) -> Result<Force, CoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT unit_type, quantity
            FROM garrisons
            WHERE settlement_id = ? AND quantity > 0
            "#,
        )
        .bind(settlement_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(unit_type, quantity)| (unit_type, to_u64(quantity)))
            .collect())
    }

    async fn set_stockpile(
        &self,
        settlement_id: &str,
        resource: &str,
        amount: u64,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO stockpiles (settlement_id, resource, amount)
            VALUES (?, ?, ?)
            ON CONFLICT(settlement_id, resource) DO UPDATE SET amount = excluded.amount
            "#,
        )
        .bind(settlement_id)
        .bind(resource)
        .bind(to_i64(amount))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_stockpile(&self, settlement_id: &str) -> Result<BTreeMap<String, u64>, CoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT resource, amount
            FROM stockpiles
            WHERE settlement_id = ?
            "#,
        )
        .bind(settlement_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(resource, amount)| (resource, to_u64(amount)))
            .collect())
    }

    async fn credit_stockpile(
        &self,
        event_id: i64,
        settlement_id: &str,
        resources: &BTreeMap<String, u64>,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = count(&mut tx, "SELECT COUNT(*) FROM settlements WHERE id = ?", &[settlement_id]).await?;
        if exists == 0 {
            return Err(CoreError::TargetNotFound {
                kind: "settlement".to_string(),
                target_id: settlement_id.to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO stockpile_credits (event_id, settlement_id, applied_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(event_id)
        .bind(settlement_id)
        .bind(millis(Utc::now()))
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        add_resources(&mut tx, settlement_id, resources).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn upsert_portal(&self, portal: &PortalRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO portals (id, tier, difficulty, x, y, enemy_units, active, cleared_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tier = excluded.tier,
                difficulty = excluded.difficulty,
                x = excluded.x,
                y = excluded.y,
                enemy_units = excluded.enemy_units,
                active = excluded.active,
                cleared_by = excluded.cleared_by
            "#,
        )
        .bind(&portal.id)
        .bind(portal.tier.as_str())
        .bind(i64::from(portal.difficulty))
        .bind(portal.coordinates.x)
        .bind(portal.coordinates.y)
        .bind(to_json(&portal.enemy_units)?)
        .bind(portal.active)
        .bind(&portal.cleared_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_portal(&self, portal_id: &str) -> Result<Option<PortalRecord>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, tier, difficulty, x, y, enemy_units, active, cleared_by
            FROM portals
            WHERE id = ?
            "#,
        )
        .bind(portal_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let tier: String = row.try_get("tier")?;
        let difficulty: i64 = row.try_get("difficulty")?;
        let enemy_units: String = row.try_get("enemy_units")?;
        Ok(Some(PortalRecord {
            id: row.try_get("id")?,
            tier: parse_tier("portal", &tier)?,
            difficulty: u32::try_from(difficulty).unwrap_or(1),
            coordinates: Coordinates::new(row.try_get("x")?, row.try_get("y")?),
            enemy_units: from_json("portal", &enemy_units)?,
            active: row.try_get("active")?,
            cleared_by: row.try_get("cleared_by")?,
        }))
    }

    async fn upsert_encounter(&self, encounter: &EncounterRecord) -> Result<(), CoreError> {
        if encounter.current_health > encounter.max_health {
            return Err(CoreError::validation(
                "current_health",
                "health cannot exceed max health",
            ));
        }
        sqlx::query(
            r#"
            INSERT INTO boss_encounters (id, name, boss_type, tier, x, y, max_health,
                                         current_health, defense, current_phase, defeated,
                                         defeated_by, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                boss_type = excluded.boss_type,
                tier = excluded.tier,
                x = excluded.x,
                y = excluded.y,
                max_health = excluded.max_health,
                current_health = excluded.current_health,
                defense = excluded.defense,
                current_phase = excluded.current_phase,
                defeated = excluded.defeated,
                defeated_by = excluded.defeated_by,
                version = boss_encounters.version + 1
            "#,
        )
        .bind(&encounter.id)
        .bind(&encounter.name)
        .bind(&encounter.boss_type)
        .bind(encounter.tier.as_str())
        .bind(encounter.coordinates.x)
        .bind(encounter.coordinates.y)
        .bind(to_i64(encounter.max_health))
        .bind(to_i64(encounter.current_health))
        .bind(to_i64(encounter.defense))
        .bind(i64::from(encounter.current_phase))
        .bind(encounter.defeated)
        .bind(&encounter.defeated_by)
        .bind(encounter.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_encounter(&self, encounter_id: &str) -> Result<Option<EncounterRecord>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, boss_type, tier, x, y, max_health, current_health, defense,
                   current_phase, defeated, defeated_by, version
            FROM boss_encounters
            WHERE id = ?
            "#,
        )
        .bind(encounter_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(encounter_from_row).transpose()
    }

    async fn reset_encounter(&self, encounter_id: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE boss_encounters
            SET current_health = max_health,
                current_phase = 1,
                defeated = 0,
                defeated_by = NULL,
                version = version + 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(millis(now))
        .bind(encounter_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::EncounterNotFound {
                encounter_id: encounter_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_attempts(
        &self,
        encounter_id: &str,
        limit: u32,
    ) -> Result<Vec<BossAttemptRecord>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, encounter_id, mission_id, actor_id, units_sent, units_lost, units_survived,
                   damage_dealt, phase_reached, outcome, rewards, log, created_at
            FROM boss_attempts
            WHERE encounter_id = ?
            ORDER BY damage_dealt DESC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(encounter_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attempt_from_row).collect()
    }
}

#[async_trait::async_trait]
impl JobQueue for SqliteStore {
    async fn enqueue(
        &self,
        mission_id: Uuid,
        run_at: DateTime<Utc>,
        policy: &super::RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Enqueued, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO resolution_jobs (job_key, mission_id, kind, status, run_at, attempts,
                                         max_attempts, backoff_ms, created_at, updated_at)
            SELECT id, id, kind, 'queued', ?, 0, ?, ?, ?, ?
            FROM missions
            WHERE id = ?
            "#,
        )
        .bind(millis(run_at))
        .bind(i64::from(policy.max_attempts))
        .bind(policy.backoff.num_milliseconds())
        .bind(millis(now))
        .bind(millis(now))
        .bind(mission_id.to_string())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(CoreError::MissionNotFound {
                mission_id: mission_id.to_string(),
            }),
            Ok(_) => Ok(Enqueued::Queued),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(Enqueued::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_next(
        &self,
        kind: MissionKind,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<ResolutionJob>, CoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE resolution_jobs
            SET status = 'running', attempts = attempts + 1, lease_until = ?, updated_at = ?
            WHERE job_key = (
                SELECT job_key FROM resolution_jobs
                WHERE kind = ? AND status = 'queued' AND run_at <= ?
                ORDER BY run_at ASC, created_at ASC
                LIMIT 1
            )
              AND status = 'queued'
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(millis(now + lease))
        .bind(millis(now))
        .bind(kind.as_str())
        .bind(millis(now))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn complete(
        &self,
        job: &ResolutionJob,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE resolution_jobs
            SET status = 'completed', lease_until = NULL, updated_at = ?
            WHERE job_key = ? AND status = 'running' AND lease_until = ?
            "#,
        )
        .bind(millis(now))
        .bind(&job.job_key)
        .bind(job.lease_until.map(millis))
        .execute(&self.pool)
        .await?;
        Ok(Transition::from_applied(result.rows_affected() > 0))
    }

    async fn retry(
        &self,
        job: &ResolutionJob,
        error: &str,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE resolution_jobs
            SET status = 'queued', run_at = ?, last_error = ?, lease_until = NULL, updated_at = ?
            WHERE job_key = ? AND status = 'running' AND lease_until = ?
            "#,
        )
        .bind(millis(run_at))
        .bind(error)
        .bind(millis(now))
        .bind(&job.job_key)
        .bind(job.lease_until.map(millis))
        .execute(&self.pool)
        .await?;
        Ok(Transition::from_applied(result.rows_affected() > 0))
    }

    async fn reschedule(
        &self,
        job: &ResolutionJob,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE resolution_jobs
            SET status = 'queued', run_at = ?, attempts = MAX(attempts - 1, 0),
                lease_until = NULL, updated_at = ?
            WHERE job_key = ? AND status = 'running' AND lease_until = ?
            "#,
        )
        .bind(millis(run_at))
        .bind(millis(now))
        .bind(&job.job_key)
        .bind(job.lease_until.map(millis))
        .execute(&self.pool)
        .await?;
        Ok(Transition::from_applied(result.rows_affected() > 0))
    }

    async fn fail(
        &self,
        job: &ResolutionJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE resolution_jobs
            SET status = 'failed', last_error = ?, lease_until = NULL, updated_at = ?
            WHERE job_key = ? AND status = 'running' AND lease_until = ?
            "#,
        )
        .bind(error)
        .bind(millis(now))
        .bind(&job.job_key)
        .bind(job.lease_until.map(millis))
        .execute(&self.pool)
        .await?;
        Ok(Transition::from_applied(result.rows_affected() > 0))
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> Result<LeaseSweep, CoreError> {
        let mut tx = self.pool.begin().await?;

        let failed = sqlx::query(
            r#"
            UPDATE resolution_jobs
            SET status = 'failed', last_error = 'lease expired on final attempt',
                lease_until = NULL, updated_at = ?
            WHERE status = 'running' AND lease_until <= ? AND attempts >= max_attempts
            "#,
        )
        .bind(millis(now))
        .bind(millis(now))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            r#"
            UPDATE resolution_jobs
            SET status = 'queued', run_at = ?, last_error = 'lease expired',
                lease_until = NULL, updated_at = ?
            WHERE status = 'running' AND lease_until <= ?
            "#,
        )
        .bind(millis(now))
        .bind(millis(now))
        .bind(millis(now))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(LeaseSweep { requeued, failed })
    }

    async fn get_job(&self, job_key: &str) -> Result<Option<ResolutionJob>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM resolution_jobs WHERE job_key = ?",
            JOB_COLUMNS
        ))
        .bind(job_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_failed_jobs(&self, limit: u32) -> Result<Vec<ResolutionJob>, CoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM resolution_jobs
            WHERE status = 'failed'
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
            JOB_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn retry_failed_job(&self, job_key: &str, now: DateTime<Utc>) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE resolution_jobs
            SET status = 'queued', attempts = 0, run_at = ?, lease_until = NULL, updated_at = ?
            WHERE job_key = ? AND status = 'failed'
            "#,
        )
        .bind(millis(now))
        .bind(millis(now))
        .bind(job_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl Outbox for SqliteStore {
    async fn pending_events(&self, limit: u32, max_attempts: u32) -> Result<Vec<OutboxEvent>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, recipient_id, event_type, payload, created_at, attempts
            FROM outbox_events
            WHERE delivered_at IS NULL AND attempts < ?
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(i64::from(max_attempts))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                let attempts: i64 = row.try_get("attempts")?;
                Ok(OutboxEvent {
                    id: row.try_get("id")?,
                    recipient_id: row.try_get("recipient_id")?,
                    event_type: row.try_get("event_type")?,
                    payload: from_json("outbox_event", &payload)?,
                    created_at: from_millis(row.try_get("created_at")?)?,
                    attempts: u32::try_from(attempts).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn mark_delivered(&self, event_id: i64, now: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query("UPDATE outbox_events SET delivered_at = ? WHERE id = ?")
            .bind(millis(now))
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_delivery_failure(&self, event_id: i64, error: &str) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
