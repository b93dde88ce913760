// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mission creation and resolution scheduling.
//!
//! [`MissionScheduler`] validates a player's request, computes travel time
//! and persists the mission as `traveling` (reserving units and cargo in the
//! same transaction). It then hands the mission to a [`ResolutionScheduler`]:
//!
//! | Strategy | Implementation | What happens at creation |
//! |----------|----------------|--------------------------|
//! | Poll | [`PollScheduler`] | Nothing; the arrival scanner finds the mission |
//! | Direct dispatch | [`DirectDispatchScheduler`] | One delayed job keyed by mission ID |
//! | Per type | [`StrategyRouter`] | Picks one of the above by mission type |
//!
//! Callers only ever see `schedule_resolution(mission_id, arrival_time)`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use outpost_combat::UnitCatalog;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::mission::{
    Coordinates, MissionKind, MissionPayload, MissionRecord, MissionStatus, NewMission, Target, Transition,
    travel_time,
};
use crate::persistence::{
    Enqueued, JobQueue, MissionGuards, MissionStore, RetryPolicy, SettlementRecord,
};

/// Arranges for a mission to be resolved once it arrives.
#[async_trait]
pub trait ResolutionScheduler: Send + Sync {
    /// Make sure `mission_id` is resolved no earlier than `arrival_time`.
    async fn schedule_resolution(
        &self,
        mission_id: Uuid,
        arrival_time: DateTime<Utc>,
    ) -> Result<(), CoreError>;
}

/// Relies on the arrival scanner; schedules nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollScheduler;

#[async_trait]
impl ResolutionScheduler for PollScheduler {
    async fn schedule_resolution(
        &self,
        mission_id: Uuid,
        arrival_time: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        debug!(mission_id = %mission_id, arrival_time = %arrival_time, "Left for arrival scan");
        Ok(())
    }
}

/// Enqueues one resolution job per mission, due at arrival.
pub struct DirectDispatchScheduler<Q: JobQueue + ?Sized> {
    queue: Arc<Q>,
    policy: RetryPolicy,
}

impl<Q: JobQueue + ?Sized> DirectDispatchScheduler<Q> {
    /// Create a scheduler enqueuing with `policy`.
    pub fn new(queue: Arc<Q>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }
}

#[async_trait]
impl<Q: JobQueue + ?Sized> ResolutionScheduler for DirectDispatchScheduler<Q> {
    async fn schedule_resolution(
        &self,
        mission_id: Uuid,
        arrival_time: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        match self
            .queue
            .enqueue(mission_id, arrival_time, &self.policy, Utc::now())
            .await?
        {
            Enqueued::Queued => {
                debug!(mission_id = %mission_id, run_at = %arrival_time, "Resolution job enqueued");
            }
            Enqueued::Duplicate => {
                debug!(mission_id = %mission_id, "Resolution job already exists");
            }
        }
        Ok(())
    }
}

/// Chooses poll or direct dispatch by mission type.
pub struct StrategyRouter<S: MissionStore + JobQueue + ?Sized> {
    store: Arc<S>,
    direct_kinds: HashSet<MissionKind>,
    direct: DirectDispatchScheduler<S>,
    poll: PollScheduler,
}

impl<S: MissionStore + JobQueue + ?Sized> StrategyRouter<S> {
    /// Route `direct_kinds` to direct dispatch and everything else to polling.
    pub fn new(
        store: Arc<S>,
        direct_kinds: impl IntoIterator<Item = MissionKind>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            direct: DirectDispatchScheduler::new(store.clone(), policy),
            store,
            direct_kinds: direct_kinds.into_iter().collect(),
            poll: PollScheduler,
        }
    }

    /// Whether missions of `kind` get a job at creation.
    pub fn is_direct(&self, kind: MissionKind) -> bool {
        self.direct_kinds.contains(&kind)
    }
}

#[async_trait]
impl<S: MissionStore + JobQueue + ?Sized> ResolutionScheduler for StrategyRouter<S> {
    async fn schedule_resolution(
        &self,
        mission_id: Uuid,
        arrival_time: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mission = self
            .store
            .get_mission(mission_id)
            .await?
            .ok_or_else(|| CoreError::MissionNotFound {
                mission_id: mission_id.to_string(),
            })?;

        if self.is_direct(mission.kind) {
            self.direct.schedule_resolution(mission_id, arrival_time).await
        } else {
            self.poll.schedule_resolution(mission_id, arrival_time).await
        }
    }
}

/// Mission creation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Travel time floor added to every mission.
    pub min_travel: Duration,
    /// Cooldown and concurrency rules.
    pub guards: MissionGuards,
    /// Share of reserved units and cargo returned on cancellation.
    pub refund_percent: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_travel: Duration::seconds(60),
            guards: MissionGuards::default(),
            refund_percent: 50,
        }
    }
}

/// A player's request to send a mission.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionRequest {
    /// Acting player.
    pub actor_id: String,
    /// Settlement the mission leaves from.
    pub origin_id: String,
    /// Destination.
    pub target: Target,
    /// Per-type data; also selects the mission type.
    pub payload: MissionPayload,
}

/// Validates, persists and schedules missions.
pub struct MissionScheduler<S: MissionStore + ?Sized> {
    store: Arc<S>,
    catalog: UnitCatalog,
    resolution: Arc<dyn ResolutionScheduler>,
    config: SchedulerConfig,
}

impl<S: MissionStore + ?Sized> MissionScheduler<S> {
    /// Create a scheduler.
    pub fn new(
        store: Arc<S>,
        catalog: UnitCatalog,
        resolution: Arc<dyn ResolutionScheduler>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            resolution,
            config,
        }
    }

    /// Validate a request and persist it as a `traveling` mission.
    ///
    /// Validation failures are returned before anything is written. Once the
    /// mission row exists a scheduling failure is only logged: the arrival
    /// scanner picks up every due `traveling` mission regardless of strategy.
    pub async fn create_mission(
        &self,
        request: MissionRequest,
        now: DateTime<Utc>,
    ) -> Result<MissionRecord, CoreError> {
        self.validate_payload(&request.payload)?;

        let origin = self
            .store
            .get_settlement(&request.origin_id)
            .await?
            .ok_or_else(|| {
                CoreError::validation(
                    "origin_id",
                    format!("settlement '{}' does not exist", request.origin_id),
                )
            })?;
        if origin.owner_id.as_deref() != Some(request.actor_id.as_str()) {
            return Err(CoreError::validation(
                "origin_id",
                "origin settlement is not owned by the actor",
            ));
        }
        if request.target == Target::Settlement(origin.id.clone()) {
            return Err(CoreError::validation(
                "target",
                "a mission cannot target its own origin",
            ));
        }

        let kind = request.payload.kind();
        let destination = self.validate_target(kind, &request, &origin).await?;
        let distance = origin.coordinates.distance(&destination);
        let arrival_at = travel_time(kind, distance, self.config.min_travel)
            .and_then(|travel| now.checked_add_signed(travel))
            .ok_or_else(|| CoreError::validation("target", "target is too far away to reach"))?;

        let mission = NewMission {
            id: Uuid::new_v4(),
            actor_id: request.actor_id,
            origin_id: request.origin_id,
            target: request.target,
            payload: request.payload,
            departure_at: now,
            arrival_at,
        };
        self.store
            .insert_mission(&mission, &self.config.guards, now)
            .await?;

        info!(
            mission_id = %mission.id,
            kind = %kind,
            actor_id = %mission.actor_id,
            target = %mission.target.id(),
            distance = distance,
            arrival_at = %arrival_at,
            "Mission dispatched"
        );

        if let Err(e) = self
            .resolution
            .schedule_resolution(mission.id, arrival_at)
            .await
        {
            warn!(
                mission_id = %mission.id,
                error = %e,
                "Failed to schedule resolution, leaving mission to the arrival scan"
            );
        }

        Ok(MissionRecord {
            id: mission.id,
            kind,
            status: MissionStatus::Traveling,
            actor_id: mission.actor_id,
            origin_id: mission.origin_id,
            target: mission.target,
            payload: mission.payload,
            departure_at: mission.departure_at,
            arrival_at: mission.arrival_at,
            finished_at: None,
            failure_reason: None,
        })
    }

    /// Call a traveling mission back, refunding part of what it carried.
    ///
    /// Returns [`Transition::Lost`] when the mission already arrived or was
    /// cancelled; the caller must not retry.
    pub async fn cancel_mission(
        &self,
        mission_id: Uuid,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        let transition = self
            .store
            .cancel_mission(mission_id, actor_id, self.config.refund_percent, now)
            .await?;

        match transition {
            Transition::Applied => {
                info!(mission_id = %mission_id, actor_id = %actor_id, "Mission cancelled");
            }
            Transition::Lost => {
                debug!(mission_id = %mission_id, "Cancel lost the race, mission already advanced");
            }
        }
        Ok(transition)
    }

    fn validate_payload(&self, payload: &MissionPayload) -> Result<(), CoreError> {
        match payload {
            MissionPayload::Attack { units, .. } | MissionPayload::Expedition { units, .. } => {
                if units.values().all(|quantity| *quantity == 0) {
                    return Err(CoreError::validation("units", "at least one unit must be sent"));
                }
                if let Some(unknown) = units.keys().find(|unit| !self.catalog.contains(unit)) {
                    return Err(CoreError::validation(
                        "units",
                        format!("unknown unit type '{}'", unknown),
                    ));
                }
                self.catalog.power(units)?;
            }
            MissionPayload::Spy { spies, .. } => {
                if *spies == 0 {
                    return Err(CoreError::validation("spies", "at least one spy must be sent"));
                }
            }
            MissionPayload::Colonization { colonists } => {
                if *colonists == 0 {
                    return Err(CoreError::validation(
                        "colonists",
                        "at least one colonist must be sent",
                    ));
                }
            }
            MissionPayload::Convoy { cargo } => {
                if cargo.values().all(|amount| *amount == 0) {
                    return Err(CoreError::validation("cargo", "a convoy must carry something"));
                }
            }
        }
        Ok(())
    }

    async fn validate_target(
        &self,
        kind: MissionKind,
        request: &MissionRequest,
        origin: &SettlementRecord,
    ) -> Result<Coordinates, CoreError> {
        match (&request.target, kind) {
            (
                Target::Settlement(id),
                MissionKind::Attack | MissionKind::Spy | MissionKind::Colonization | MissionKind::Convoy,
            ) => {
                let settlement = self.store.get_settlement(id).await?.ok_or_else(|| {
                    CoreError::validation("target", format!("settlement '{}' does not exist", id))
                })?;
                match (kind, settlement.owner_id.as_deref()) {
                    (MissionKind::Colonization, Some(_)) => Err(CoreError::validation(
                        "target",
                        "only free settlement slots can be colonized",
                    )),
                    (MissionKind::Colonization, None) => Ok(settlement.coordinates),
                    (_, None) => Err(CoreError::validation(
                        "target",
                        "the target slot is not settled",
                    )),
                    (MissionKind::Attack | MissionKind::Spy, Some(owner))
                        if owner == request.actor_id =>
                    {
                        Err(CoreError::validation(
                            "target",
                            "cannot send hostile missions to your own settlement",
                        ))
                    }
                    (_, Some(_)) => Ok(settlement.coordinates),
                }
            }
            (Target::Portal(id), MissionKind::Expedition) => {
                let portal = self.store.get_portal(id).await?.ok_or_else(|| {
                    CoreError::validation("target", format!("portal '{}' does not exist", id))
                })?;
                if !portal.active {
                    return Err(CoreError::validation("target", "portal has already been cleared"));
                }
                Ok(portal.coordinates)
            }
            (Target::Boss(id), MissionKind::Expedition) => {
                let encounter = self.store.get_encounter(id).await?.ok_or_else(|| {
                    CoreError::validation("target", format!("boss encounter '{}' does not exist", id))
                })?;
                if encounter.defeated {
                    return Err(CoreError::validation("target", "boss has already been defeated"));
                }
                Ok(encounter.coordinates)
            }
            (target, kind) => {
                debug!(origin = %origin.id, target = ?target, kind = %kind, "Rejected target");
                Err(CoreError::validation(
                    "target",
                    format!("{} missions cannot target a {}", kind, target.kind_str()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_scheduler_is_a_no_op() {
        let scheduler = PollScheduler;
        scheduler
            .schedule_resolution(Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.min_travel, Duration::seconds(60));
        assert_eq!(config.refund_percent, 50);
        assert_eq!(config.guards.max_active_colonizations, 3);
    }
}
