// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-type mission resolution.
//!
//! A [`Resolver`] reads the combat inputs for an arrived mission, runs the
//! matching engine and returns a [`Resolution`]: everything the commit writes
//! in one transaction. It never writes anything itself.
//!
//! | Mission | Target | Engine | Effects |
//! |---------|--------|--------|---------|
//! | attack | settlement | single encounter, defender losses | survivors home, garrison depleted, loot credited |
//! | spy | settlement | espionage rolls | surviving spies home, owner warned if detected |
//! | colonization | free slot | none | slot claimed and settled, or colonists home |
//! | convoy | settlement | none | cargo credited to the target |
//! | expedition | portal | single encounter | survivors home, portal cleared, loot credited |
//! | expedition | boss | multi-phase boss | survivors home, boss state written, attempt recorded |
//!
//! A target that no longer exists (or can no longer be fought) fails the
//! mission and sends everything it carried back home. The RNG is seeded
//! from the mission ID, so a retried resolution replays the same dice.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use outpost_combat::loot::{boss_table, difficulty_multiplier, encounter_table};
use outpost_combat::units::total_units;
use outpost_combat::{
    BossConfig, BossEngine, Casualties, CombatOutcome, CombatResult, EncounterConfig,
    EncounterEngine, EncounterRequest, Force, Loot, SpyObjective, Tactic, UnitCatalog,
    phase_for, resolve_spy_mission, seed_from_id,
};
use outpost_core::{
    BossAttemptRecord, BossUpdate, CoreError, MissionPayload, MissionRecord,
    MissionStatus, MissionStore, NewOutboxEvent, Resolution, Target, WorldEffect,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

/// Event types written to the outbox.
pub mod events {
    /// A mission reached `resolved`.
    pub const MISSION_RESOLVED: &str = "mission.resolved";
    /// A mission reached `failed`.
    pub const MISSION_FAILED: &str = "mission.failed";
    /// A traveling mission was cancelled and partly refunded.
    pub const MISSION_CANCELLED: &str = "mission.cancelled";
    /// A settlement owner noticed enemy spies.
    pub const SPY_DETECTED: &str = "spy.detected";
    /// A settlement owner was raided.
    pub const SETTLEMENT_ATTACKED: &str = "settlement.attacked";
    /// A boss attempt was recorded.
    pub const BOSS_ATTEMPT: &str = "boss.attempt";
    /// A boss fell.
    pub const BOSS_DEFEATED: &str = "boss.defeated";
    /// Resources to add to a settlement's stockpile.
    pub const ECONOMY_CREDIT: &str = "economy.credit";
}

/// Turns arrived missions into resolutions.
#[derive(Debug, Clone)]
pub struct Resolver {
    catalog: UnitCatalog,
    encounter: EncounterConfig,
    boss: BossConfig,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(UnitCatalog::default(), EncounterConfig::default(), BossConfig::default())
    }
}

impl Resolver {
    /// Create a resolver.
    pub fn new(catalog: UnitCatalog, encounter: EncounterConfig, boss: BossConfig) -> Self {
        Self {
            catalog,
            encounter,
            boss,
        }
    }

    /// Unit catalog used for power.
    pub fn catalog(&self) -> &UnitCatalog {
        &self.catalog
    }

    /// Build the resolution for an arrived mission.
    pub async fn resolve<S: MissionStore + ?Sized>(
        &self,
        store: &S,
        mission: &MissionRecord,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let seed = seed_from_id(mission.id.as_u128());
        let mut rng = StdRng::seed_from_u64(seed);

        debug!(mission_id = %mission.id, kind = %mission.kind, seed = seed, "Resolving mission");

        match (&mission.payload, &mission.target) {
            (MissionPayload::Attack { units, tactic }, Target::Settlement(target_id)) => {
                self.resolve_attack(store, mission, units, *tactic, target_id, seed, &mut rng)
                    .await
            }
            (MissionPayload::Spy { spies, objective }, Target::Settlement(target_id)) => {
                self.resolve_spy(store, mission, *spies, *objective, target_id, seed, &mut rng)
                    .await
            }
            (MissionPayload::Colonization { colonists }, Target::Settlement(target_id)) => {
                self.resolve_colonization(store, mission, *colonists, target_id, seed)
                    .await
            }
            (MissionPayload::Convoy { cargo }, Target::Settlement(target_id)) => {
                self.resolve_convoy(store, mission, cargo, target_id, seed).await
            }
            (MissionPayload::Expedition { units, tactic }, Target::Portal(portal_id)) => {
                self.resolve_portal(store, mission, units, *tactic, portal_id, seed, &mut rng)
                    .await
            }
            (MissionPayload::Expedition { units, .. }, Target::Boss(encounter_id)) => {
                self.resolve_boss(store, mission, units, encounter_id, seed, now, &mut rng)
                    .await
            }
            (payload, target) => Err(CoreError::CorruptRecord {
                entity: "mission".to_string(),
                details: format!(
                    "{} payload cannot target a {}",
                    payload.kind(),
                    target.kind_str()
                ),
            }
            .into()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_attack<S: MissionStore + ?Sized>(
        &self,
        store: &S,
        mission: &MissionRecord,
        units: &Force,
        tactic: Tactic,
        target_id: &str,
        seed: u64,
        rng: &mut StdRng,
    ) -> Result<Resolution> {
        let Some(target) = store.get_settlement(target_id).await? else {
            return Ok(failed(mission, seed, "target settlement no longer exists"));
        };
        let garrison = store.get_garrison(target_id).await?;
        let table = encounter_table(target.tier);

        let engine = EncounterEngine::new(&self.catalog, self.encounter);
        let result = engine.compute_outcome(
            &EncounterRequest {
                attacker: units,
                defender: &garrison,
                tactic,
                loot: Some((&table, 1.0)),
                defender_losses: true,
            },
            rng,
        )?;

        let mut effects = vec![return_home(mission, &result.attacker.survived)];
        if let Some(defender) = result.defender.as_ref().filter(|d| total_units(&d.lost) > 0) {
            effects.push(WorldEffect::DepleteGarrison {
                settlement_id: target_id.to_string(),
                units: defender.lost.clone(),
            });
        }

        let mut events = vec![resolved_event(mission, &result)];
        if let Some(owner) = &target.owner_id {
            events.push(NewOutboxEvent::to(
                owner,
                events::SETTLEMENT_ATTACKED,
                json!({
                    "mission_id": mission.id,
                    "attacker_id": mission.actor_id,
                    "settlement_id": target_id,
                    "outcome": result.outcome,
                    "defender": result.defender,
                }),
            ));
        }
        events.extend(credit_event(mission, &mission.origin_id, &result.loot.resources));

        Ok(resolved(mission, seed, &result, json!({ "combat": result }), effects, events))
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_spy<S: MissionStore + ?Sized>(
        &self,
        store: &S,
        mission: &MissionRecord,
        spies: u64,
        objective: SpyObjective,
        target_id: &str,
        seed: u64,
        rng: &mut StdRng,
    ) -> Result<Resolution> {
        let Some(target) = store.get_settlement(target_id).await? else {
            return Ok(failed(mission, seed, "target settlement no longer exists"));
        };
        let stockpile = store.get_stockpile(target_id).await?;
        let garrison = store.get_garrison(target_id).await?;

        let outcome = resolve_spy_mission(spies, objective, &stockpile, &garrison, rng);
        let result = &outcome.result;

        let effects = vec![return_home(mission, &result.attacker.survived)];
        let mut events = vec![resolved_event(mission, result)];
        if let Some(owner) = target.owner_id.as_ref().filter(|_| outcome.detected) {
            events.push(NewOutboxEvent::to(
                owner,
                events::SPY_DETECTED,
                json!({
                    "mission_id": mission.id,
                    "spy_owner_id": mission.actor_id,
                    "settlement_id": target_id,
                    "spies_caught": total_units(&result.attacker.lost),
                }),
            ));
        }

        let document = json!({
            "combat": result,
            "objective": objective,
            "success_rate": outcome.success_rate,
            "detected": outcome.detected,
            "intel": outcome.intel,
        });
        Ok(resolved(mission, seed, result, document, effects, events))
    }

    async fn resolve_colonization<S: MissionStore + ?Sized>(
        &self,
        store: &S,
        mission: &MissionRecord,
        colonists: u64,
        target_id: &str,
        seed: u64,
    ) -> Result<Resolution> {
        let Some(target) = store.get_settlement(target_id).await? else {
            return Ok(failed(mission, seed, "target slot no longer exists"));
        };
        let sent = mission.payload.reserved_units();

        let (outcome, effects) = if target.owner_id.is_none() {
            (
                CombatOutcome::Victory,
                vec![
                    WorldEffect::ClaimSettlement {
                        settlement_id: target_id.to_string(),
                        owner_id: mission.actor_id.clone(),
                    },
                    WorldEffect::ReinforceGarrison {
                        settlement_id: target_id.to_string(),
                        units: sent.clone(),
                    },
                ],
            )
        } else {
            (CombatOutcome::Defeat, vec![return_home(mission, &sent)])
        };

        let result = CombatResult {
            outcome,
            attacker: Casualties::unharmed(&sent),
            defender: None,
            loot: Loot::default(),
            log: Vec::new(),
        };
        let events = vec![resolved_event(mission, &result)];
        let document = json!({
            "combat": result,
            "colonists": colonists,
            "settled": outcome == CombatOutcome::Victory,
        });
        Ok(resolved(mission, seed, &result, document, effects, events))
    }

    async fn resolve_convoy<S: MissionStore + ?Sized>(
        &self,
        store: &S,
        mission: &MissionRecord,
        cargo: &BTreeMap<String, u64>,
        target_id: &str,
        seed: u64,
    ) -> Result<Resolution> {
        let target = store.get_settlement(target_id).await?;
        let Some(recipient) = target.and_then(|t| t.owner_id) else {
            return Ok(failed(mission, seed, "destination is no longer settled"));
        };

        let result = CombatResult {
            outcome: CombatOutcome::Victory,
            attacker: Casualties::default(),
            defender: None,
            loot: Loot::default(),
            log: Vec::new(),
        };
        let mut events = vec![resolved_event(mission, &result)];
        if let Some(credit) = credit_to(mission.id, &recipient, target_id, cargo) {
            events.push(credit);
        }
        let document = json!({
            "delivered": cargo,
            "settlement_id": target_id,
            "recipient_id": recipient,
        });
        Ok(Resolution {
            mission_id: mission.id,
            status: MissionStatus::Resolved,
            outcome: Some("delivered".to_string()),
            result: document,
            seed,
            failure_reason: None,
            effects: Vec::new(),
            attempt: None,
            events,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_portal<S: MissionStore + ?Sized>(
        &self,
        store: &S,
        mission: &MissionRecord,
        units: &Force,
        tactic: Tactic,
        portal_id: &str,
        seed: u64,
        rng: &mut StdRng,
    ) -> Result<Resolution> {
        let Some(portal) = store.get_portal(portal_id).await? else {
            return Ok(failed(mission, seed, "portal no longer exists"));
        };
        if !portal.active {
            return Ok(failed(mission, seed, "portal was already cleared"));
        }

        let table = encounter_table(portal.tier);
        let engine = EncounterEngine::new(&self.catalog, self.encounter);
        let result = engine.compute_outcome(
            &EncounterRequest {
                attacker: units,
                defender: &portal.enemy_units,
                tactic,
                loot: Some((&table, difficulty_multiplier(portal.difficulty))),
                defender_losses: false,
            },
            rng,
        )?;

        let mut effects = vec![return_home(mission, &result.attacker.survived)];
        if result.outcome == CombatOutcome::Victory {
            effects.push(WorldEffect::ClearPortal {
                portal_id: portal_id.to_string(),
                cleared_by: mission.actor_id.clone(),
            });
        }
        let mut events = vec![resolved_event(mission, &result)];
        events.extend(credit_event(mission, &mission.origin_id, &result.loot.resources));

        let document = json!({
            "combat": result,
            "portal_id": portal_id,
            "difficulty": portal.difficulty,
        });
        Ok(resolved(mission, seed, &result, document, effects, events))
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_boss<S: MissionStore + ?Sized>(
        &self,
        store: &S,
        mission: &MissionRecord,
        units: &Force,
        encounter_id: &str,
        seed: u64,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> Result<Resolution> {
        let encounter = store
            .get_encounter(encounter_id)
            .await?
            .ok_or_else(|| CoreError::EncounterNotFound {
                encounter_id: encounter_id.to_string(),
            })?;
        if encounter.defeated {
            return Ok(failed(mission, seed, "boss was already defeated"));
        }

        let engine = BossEngine::new(&self.catalog, self.boss.clone());
        let table = boss_table(encounter.tier);
        let fight = engine.fight(
            &encounter.boss_state(),
            units,
            &table,
            Some(&encounter.boss_type),
            rng,
        )?;
        let result = &fight.result;
        let victory = result.outcome == CombatOutcome::Victory;

        let effects = vec![
            return_home(mission, &result.attacker.survived),
            WorldEffect::UpdateBoss(BossUpdate {
                encounter_id: encounter_id.to_string(),
                expected_version: encounter.version,
                current_health: fight.boss.current_health,
                current_phase: phase_for(fight.boss.current_health, fight.boss.max_health),
                defeated: fight.boss.defeated,
                defeated_by: victory.then(|| mission.actor_id.clone()),
            }),
        ];

        let attempt = BossAttemptRecord {
            id: Uuid::new_v4(),
            encounter_id: encounter_id.to_string(),
            mission_id: mission.id,
            actor_id: mission.actor_id.clone(),
            units_sent: result.attacker.sent.clone(),
            units_lost: result.attacker.lost.clone(),
            units_survived: result.attacker.survived.clone(),
            damage_dealt: fight.damage_dealt,
            phase_reached: fight.phase_reached,
            outcome: result.outcome,
            rewards: result.loot.clone(),
            log: result.log.clone(),
            created_at: now,
        };

        let mut events = vec![
            resolved_event(mission, result),
            NewOutboxEvent::to(
                &mission.actor_id,
                events::BOSS_ATTEMPT,
                json!({
                    "attempt_id": attempt.id,
                    "encounter_id": encounter_id,
                    "damage_dealt": fight.damage_dealt,
                    "phase_reached": fight.phase_reached,
                    "boss_health": fight.boss.current_health,
                    "outcome": result.outcome,
                }),
            ),
        ];
        if victory {
            events.push(NewOutboxEvent::broadcast(
                events::BOSS_DEFEATED,
                json!({
                    "encounter_id": encounter_id,
                    "name": encounter.name,
                    "defeated_by": mission.actor_id,
                    "phase_reached": fight.phase_reached,
                }),
            ));
        }
        events.extend(credit_event(mission, &mission.origin_id, &result.loot.resources));

        let document = json!({
            "combat": result,
            "encounter_id": encounter_id,
            "damage_dealt": fight.damage_dealt,
            "phase_reached": fight.phase_reached,
            "rounds": fight.rounds,
            "boss_health": fight.boss.current_health,
            "boss_max_health": fight.boss.max_health,
        });

        let mut resolution = resolved(mission, seed, result, document, effects, events);
        resolution.attempt = Some(attempt);
        Ok(resolution)
    }
}

fn resolved(
    mission: &MissionRecord,
    seed: u64,
    result: &CombatResult,
    document: serde_json::Value,
    effects: Vec<WorldEffect>,
    events: Vec<NewOutboxEvent>,
) -> Resolution {
    Resolution {
        mission_id: mission.id,
        status: MissionStatus::Resolved,
        outcome: Some(result.outcome.as_str().to_string()),
        result: document,
        seed,
        failure_reason: None,
        effects: effects
            .into_iter()
            .filter(|effect| !is_empty_reinforcement(effect))
            .collect(),
        attempt: None,
        events,
    }
}

/// Close a mission whose target is gone, returning everything it carried.
pub fn failed(mission: &MissionRecord, seed: u64, reason: &str) -> Resolution {
    let units = mission.payload.reserved_units();
    let cargo = mission.payload.reserved_resources();

    let mut effects = Vec::new();
    if total_units(&units) > 0 {
        effects.push(return_home(mission, &units));
    }
    let mut events = vec![NewOutboxEvent::to(
        &mission.actor_id,
        events::MISSION_FAILED,
        json!({
            "mission_id": mission.id,
            "kind": mission.kind,
            "target": mission.target,
            "reason": reason,
        }),
    )];
    events.extend(credit_event(mission, &mission.origin_id, &cargo));

    Resolution {
        mission_id: mission.id,
        status: MissionStatus::Failed,
        outcome: None,
        result: json!({ "reason": reason, "returned_units": units, "returned_cargo": cargo }),
        seed,
        failure_reason: Some(reason.to_string()),
        effects,
        attempt: None,
        events,
    }
}

fn return_home(mission: &MissionRecord, units: &Force) -> WorldEffect {
    WorldEffect::ReinforceGarrison {
        settlement_id: mission.origin_id.clone(),
        units: units.clone(),
    }
}

fn is_empty_reinforcement(effect: &WorldEffect) -> bool {
    matches!(effect, WorldEffect::ReinforceGarrison { units, .. } if total_units(units) == 0)
}

fn resolved_event(mission: &MissionRecord, result: &CombatResult) -> NewOutboxEvent {
    NewOutboxEvent::to(
        &mission.actor_id,
        events::MISSION_RESOLVED,
        json!({
            "mission_id": mission.id,
            "kind": mission.kind,
            "target": mission.target,
            "outcome": result.outcome,
            "attacker": result.attacker,
            "defender": result.defender,
            "loot": result.loot,
            "log": result.log,
        }),
    )
}

fn credit_event(
    mission: &MissionRecord,
    settlement_id: &str,
    resources: &BTreeMap<String, u64>,
) -> Option<NewOutboxEvent> {
    credit_to(mission.id, &mission.actor_id, settlement_id, resources)
}

fn credit_to(
    mission_id: Uuid,
    recipient: &str,
    settlement_id: &str,
    resources: &BTreeMap<String, u64>,
) -> Option<NewOutboxEvent> {
    let resources: BTreeMap<&String, &u64> = resources.iter().filter(|(_, amount)| **amount > 0).collect();
    if resources.is_empty() {
        return None;
    }
    Some(NewOutboxEvent::to(
        recipient,
        events::ECONOMY_CREDIT,
        json!({
            "mission_id": mission_id,
            "settlement_id": settlement_id,
            "resources": resources,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mission(payload: MissionPayload, target: Target) -> MissionRecord {
        MissionRecord {
            id: Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0),
            kind: payload.kind(),
            status: MissionStatus::Arrived,
            actor_id: "alice".to_string(),
            origin_id: "home".to_string(),
            target,
            payload,
            departure_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            arrival_at: DateTime::from_timestamp(1_700_000_600, 0).unwrap(),
            finished_at: None,
            failure_reason: None,
        }
    }

    #[test]
    fn test_failed_returns_units_and_cargo() {
        let mut cargo = BTreeMap::new();
        cargo.insert("gold".to_string(), 300);
        let convoy = mission(
            MissionPayload::Convoy { cargo },
            Target::Settlement("gone".to_string()),
        );

        let resolution = failed(&convoy, 7, "destination is no longer settled");
        assert_eq!(resolution.status, MissionStatus::Failed);
        assert_eq!(resolution.failure_reason.as_deref(), Some("destination is no longer settled"));
        assert!(resolution.effects.is_empty());
        assert_eq!(resolution.events.len(), 2);
        assert_eq!(resolution.events[0].event_type, events::MISSION_FAILED);
        assert_eq!(resolution.events[1].event_type, events::ECONOMY_CREDIT);
        assert_eq!(resolution.events[1].payload["resources"]["gold"], 300);

        let attack = mission(
            MissionPayload::Attack {
                units: [("infantry".to_string(), 12)].into_iter().collect(),
                tactic: Tactic::Balanced,
            },
            Target::Settlement("gone".to_string()),
        );
        let resolution = failed(&attack, 7, "target settlement no longer exists");
        assert_eq!(
            resolution.effects,
            vec![WorldEffect::ReinforceGarrison {
                settlement_id: "home".to_string(),
                units: [("infantry".to_string(), 12)].into_iter().collect(),
            }]
        );
        assert_eq!(resolution.events.len(), 1);
    }

    #[test]
    fn test_credit_skips_empty_rewards() {
        let mut resources = BTreeMap::new();
        resources.insert("gold".to_string(), 0);
        assert!(credit_to(Uuid::nil(), "alice", "home", &resources).is_none());

        resources.insert("iron".to_string(), 5);
        let event = credit_to(Uuid::nil(), "alice", "home", &resources).unwrap();
        assert_eq!(event.payload["resources"]["iron"], 5);
        assert!(event.payload["resources"].get("gold").is_none());
    }

    #[test]
    fn test_empty_reinforcements_dropped() {
        let m = mission(
            MissionPayload::Expedition {
                units: [("infantry".to_string(), 1)].into_iter().collect(),
                tactic: Tactic::Balanced,
            },
            Target::Portal("gate".to_string()),
        );
        let result = CombatResult {
            outcome: CombatOutcome::Defeat,
            attacker: Casualties::default(),
            defender: None,
            loot: Loot::default(),
            log: Vec::new(),
        };
        let resolution = resolved(
            &m,
            1,
            &result,
            json!({}),
            vec![return_home(&m, &Force::new())],
            Vec::new(),
        );
        assert!(resolution.effects.is_empty());
        assert_eq!(resolution.outcome.as_deref(), Some("defeat"));
    }
}
