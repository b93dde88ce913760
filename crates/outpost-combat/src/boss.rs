// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-phase boss combat.
//!
//! A boss keeps its health between attempts. Each attempt runs a bounded
//! round loop against the current state:
//!
//! 1. the attacker hits for `max(1, floor(power × 0.1 − defense × 0.05))`, with
//!    `power` fixed from the force sent,
//! 2. the boss dies at zero health,
//! 3. crossing a phase threshold fires that phase's entry ability once,
//! 4. unlocked chance abilities roll independently (phase > 1),
//! 5. the boss counter-attacks for `floor(defense × (1 + phase × 0.2) × 0.05)`
//!    unit losses, spread evenly over the attacker's remaining unit types.
//!
//! The attempt ends in victory at zero boss health, or in defeat when the
//! attacker runs out of units or the round cap is reached.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CombatError, Result};
use crate::loot::{LootTable, boss_type_bonus};
use crate::result::{AbilityEffect, CombatEvent, CombatOutcome, CombatResult};
use crate::units::{Casualties, Force, UnitCatalog, living_types, total_units};

/// Highest phase a boss can be in.
pub const MAX_PHASE: u8 = 4;

/// Phase for a health level: `>75% → 1`, `>50% → 2`, `>25% → 3`, else `4`.
pub fn phase_for(current_health: u64, max_health: u64) -> u8 {
    let current = u128::from(current_health);
    let max = u128::from(max_health);
    if current * 4 > max * 3 {
        1
    } else if current * 2 > max {
        2
    } else if current * 4 > max {
        3
    } else {
        MAX_PHASE
    }
}

/// Special boss abilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BossAbility {
    /// Restores a fraction of max health.
    ShieldRegeneration,
    /// Removes a fraction of every attacker unit type.
    AreaDamage,
    /// Removes a fraction of one random attacker unit type.
    UnitDisable,
}

/// When an ability fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbilityTrigger {
    /// Once, when the boss first enters the unlock phase during an attempt.
    PhaseEntry,
    /// Every round from the unlock phase on, with this probability.
    Chance {
        /// Trigger probability in `[0, 1]`.
        probability: f64,
    },
}

/// One configured ability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilitySpec {
    /// Which ability.
    pub ability: BossAbility,
    /// First phase in which it is available.
    pub unlock_phase: u8,
    /// How it fires.
    pub trigger: AbilityTrigger,
    /// Fraction applied (of max health for heals, of unit counts otherwise).
    pub magnitude: f64,
}

/// Tunables for boss attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossConfig {
    /// Maximum rounds per attempt; reaching it counts as defeat.
    pub round_cap: u32,
    /// Abilities, cumulative by phase.
    pub abilities: Vec<AbilitySpec>,
    /// Extra reward per phase reached beyond the first.
    pub phase_reward_step: f64,
    /// Fraction of the base reward paid on defeat.
    pub consolation_fraction: f64,
}

impl Default for BossConfig {
    fn default() -> Self {
        Self {
            round_cap: 50,
            abilities: vec![
                AbilitySpec {
                    ability: BossAbility::ShieldRegeneration,
                    unlock_phase: 2,
                    trigger: AbilityTrigger::PhaseEntry,
                    magnitude: 0.15,
                },
                AbilitySpec {
                    ability: BossAbility::AreaDamage,
                    unlock_phase: 3,
                    trigger: AbilityTrigger::Chance { probability: 0.3 },
                    magnitude: 0.10,
                },
                AbilitySpec {
                    ability: BossAbility::UnitDisable,
                    unlock_phase: 4,
                    trigger: AbilityTrigger::Chance { probability: 0.3 },
                    magnitude: 0.30,
                },
            ],
            phase_reward_step: 0.25,
            consolation_fraction: 0.25,
        }
    }
}

impl BossConfig {
    /// Same config with every chance ability set to `probability`.
    pub fn with_ability_chance(mut self, probability: f64) -> Self {
        for spec in &mut self.abilities {
            if let AbilityTrigger::Chance { .. } = spec.trigger {
                spec.trigger = AbilityTrigger::Chance { probability };
            }
        }
        self
    }

    /// Same config with a different round cap.
    pub fn with_round_cap(mut self, round_cap: u32) -> Self {
        self.round_cap = round_cap;
        self
    }

    /// Reward multiplier for a victory that reached `phases_reached`.
    pub fn victory_multiplier(&self, phases_reached: u8) -> f64 {
        1.0 + f64::from(phases_reached.max(1) - 1) * self.phase_reward_step
    }
}

/// Persistent boss state as seen by one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossState {
    /// Full health.
    pub max_health: u64,
    /// Health left, in `[0, max_health]`.
    pub current_health: u64,
    /// Defense rating.
    pub defense: u64,
    /// Terminal flag.
    pub defeated: bool,
}

impl BossState {
    /// Current phase derived from health.
    pub fn phase(&self) -> u8 {
        phase_for(self.current_health, self.max_health)
    }

    fn validate(&self) -> Result<()> {
        if self.defeated {
            return Err(CombatError::InvalidBossState("boss is already defeated".to_string()));
        }
        if self.max_health == 0 {
            return Err(CombatError::InvalidBossState("max health is zero".to_string()));
        }
        if self.current_health == 0 || self.current_health > self.max_health {
            return Err(CombatError::InvalidBossState(format!(
                "health {} outside (0, {}]",
                self.current_health, self.max_health
            )));
        }
        Ok(())
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossFight {
    /// Verdict, casualties, loot and replay log.
    pub result: CombatResult,
    /// Boss state after the attempt.
    pub boss: BossState,
    /// Health actually removed by the attacker.
    pub damage_dealt: u64,
    /// Highest phase seen during the attempt.
    pub phase_reached: u8,
    /// Rounds played.
    pub rounds: u32,
}

/// Boss combat engine.
#[derive(Debug, Clone)]
pub struct BossEngine<'a> {
    catalog: &'a UnitCatalog,
    config: BossConfig,
}

impl<'a> BossEngine<'a> {
    /// Create an engine over a unit catalog.
    pub fn new(catalog: &'a UnitCatalog, config: BossConfig) -> Self {
        Self { catalog, config }
    }

    /// Engine configuration.
    pub fn config(&self) -> &BossConfig {
        &self.config
    }

    /// Run one attempt against `state` with `units`.
    ///
    /// `table` is the tier loot table; `boss_type` adds a named-boss drop on
    /// victory. Deterministic for a given RNG state.
    pub fn fight<R: Rng + ?Sized>(
        &self,
        state: &BossState,
        units: &Force,
        table: &LootTable,
        boss_type: Option<&str>,
        rng: &mut R,
    ) -> Result<BossFight> {
        state.validate()?;
        // Power is fixed at the start of the attempt; losses only shrink the force.
        let power = self.catalog.power(units)?;

        let base = table.roll_base(rng);
        let mut remaining = units.clone();
        let mut health = state.current_health;
        let mut phase = state.phase();
        let mut phase_reached = phase;
        let mut damage_dealt = 0u64;
        let mut log = Vec::new();
        let mut rounds = 0u32;
        let mut victory = false;

        for round in 1..=self.config.round_cap {
            if total_units(&remaining) == 0 {
                break;
            }
            rounds = round;

            let damage = attacker_damage(power, state.defense);
            let before = health;
            health = health.saturating_sub(damage);
            damage_dealt += before - health;
            log.push(CombatEvent::Attack {
                round,
                damage,
                boss_health: health,
            });

            if health == 0 {
                victory = true;
                break;
            }

            let observed = phase_for(health, state.max_health);
            while phase < observed {
                phase += 1;
                phase_reached = phase_reached.max(phase);
                log.push(CombatEvent::PhaseTransition { round, phase });
                for spec in self.abilities_for(phase, AbilityTrigger::PhaseEntry) {
                    let effect = apply_ability(spec, state.max_health, &mut health, &mut remaining, rng);
                    log.push(CombatEvent::Ability {
                        round,
                        phase,
                        ability: spec.ability,
                        effect,
                    });
                }
            }

            if phase > 1 {
                for spec in &self.config.abilities {
                    let AbilityTrigger::Chance { probability } = spec.trigger else {
                        continue;
                    };
                    if spec.unlock_phase > phase || !rng.gen_bool(probability.clamp(0.0, 1.0)) {
                        continue;
                    }
                    let effect = apply_ability(spec, state.max_health, &mut health, &mut remaining, rng);
                    log.push(CombatEvent::Ability {
                        round,
                        phase,
                        ability: spec.ability,
                        effect,
                    });
                }
            }

            if total_units(&remaining) == 0 {
                break;
            }

            let counter = boss_damage(state.defense, phase);
            distribute_losses(&mut remaining, counter);
            log.push(CombatEvent::BossAttack {
                round,
                damage: counter,
                units_remaining: total_units(&remaining),
            });
        }

        let (outcome, loot, boss) = if victory {
            let mut loot = base.scaled(self.config.victory_multiplier(phase_reached));
            loot.items = table.roll_bonuses(rng);
            if let Some(item) = boss_type.and_then(boss_type_bonus) {
                loot.items.push(item);
            }
            let boss = BossState {
                current_health: 0,
                defeated: true,
                ..*state
            };
            (CombatOutcome::Victory, loot, boss)
        } else {
            let boss = BossState {
                current_health: health,
                ..*state
            };
            (
                CombatOutcome::Defeat,
                base.consolation(self.config.consolation_fraction),
                boss,
            )
        };

        Ok(BossFight {
            result: CombatResult {
                outcome,
                attacker: Casualties::from_remaining(units, &remaining),
                defender: None,
                loot,
                log,
            },
            boss,
            damage_dealt,
            phase_reached,
            rounds,
        })
    }

    fn abilities_for(&self, phase: u8, trigger: AbilityTrigger) -> impl Iterator<Item = &AbilitySpec> {
        self.config
            .abilities
            .iter()
            .filter(move |spec| spec.unlock_phase == phase && spec.trigger == trigger)
    }
}

/// `max(1, floor(power × 0.1 − defense × 0.05))`, in exact integer form.
pub fn attacker_damage(power: u64, defense: u64) -> u64 {
    let doubled = u128::from(power) * 2;
    let defense = u128::from(defense);
    if doubled <= defense {
        return 1;
    }
    (((doubled - defense) / 20) as u64).max(1)
}

/// `floor(defense × (1 + phase × 0.2) × 0.05)`, in exact integer form.
pub fn boss_damage(defense: u64, phase: u8) -> u64 {
    (u128::from(defense) * (5 + u128::from(phase)) / 100) as u64
}

/// Spread `damage` unit losses evenly over the living unit types.
///
/// Types are visited in name order; the first `damage % n` types take one
/// extra loss. Losses are capped at each type's count.
fn distribute_losses(force: &mut Force, damage: u64) {
    let types = living_types(force);
    if types.is_empty() || damage == 0 {
        return;
    }
    let share = damage / types.len() as u64;
    let extra = damage % types.len() as u64;
    for (index, unit_type) in types.iter().enumerate() {
        let loss = share + u64::from((index as u64) < extra);
        if let Some(count) = force.get_mut(unit_type) {
            *count = count.saturating_sub(loss);
        }
    }
}

fn fraction_of(quantity: u64, magnitude: f64) -> u64 {
    ((quantity as f64 * magnitude).ceil() as u64).clamp(1, quantity)
}

fn apply_ability<R: Rng + ?Sized>(
    spec: &AbilitySpec,
    max_health: u64,
    health: &mut u64,
    force: &mut Force,
    rng: &mut R,
) -> AbilityEffect {
    match spec.ability {
        BossAbility::ShieldRegeneration => {
            let heal = (max_health as f64 * spec.magnitude).floor() as u64;
            let amount = heal.min(max_health - *health);
            *health += amount;
            AbilityEffect::Heal { amount }
        }
        BossAbility::AreaDamage => {
            let mut losses = Force::new();
            for unit_type in living_types(force) {
                if let Some(count) = force.get_mut(&unit_type) {
                    let loss = fraction_of(*count, spec.magnitude);
                    *count -= loss;
                    losses.insert(unit_type, loss);
                }
            }
            if losses.is_empty() {
                AbilityEffect::NoTarget
            } else {
                AbilityEffect::Casualties { losses }
            }
        }
        BossAbility::UnitDisable => {
            let types = living_types(force);
            if types.is_empty() {
                return AbilityEffect::NoTarget;
            }
            let target = types[rng.gen_range(0..types.len())].clone();
            let mut losses = Force::new();
            if let Some(count) = force.get_mut(&target) {
                let loss = fraction_of(*count, spec.magnitude);
                *count -= loss;
                losses.insert(target, loss);
            }
            AbilityEffect::Casualties { losses }
        }
    }
}

/// Pre-fight assessment of a boss attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BossEstimate {
    /// Attacker power.
    pub player_power: u64,
    /// `max_health × defense / 10`.
    pub boss_power: u64,
    /// Power ratio.
    pub ratio: f64,
    /// Human-readable difficulty.
    pub label: &'static str,
    /// Phases the attacker can expect to push through.
    pub recommended_phases: u8,
    /// Boss phase right now.
    pub current_phase: u8,
}

/// Estimate a boss attempt without rolling any dice.
pub fn estimate_boss(catalog: &UnitCatalog, units: &Force, state: &BossState) -> Result<BossEstimate> {
    let player_power = catalog.power(units)?;
    let boss_power = state.max_health.saturating_mul(state.defense) / 10;
    let ratio = if boss_power == 0 {
        f64::INFINITY
    } else {
        player_power as f64 / boss_power as f64
    };
    let (label, recommended_phases) = if ratio >= 2.0 {
        ("Manageable", 4)
    } else if ratio >= 1.5 {
        ("Challenging", 3)
    } else if ratio >= 1.0 {
        ("Difficult", 2)
    } else if ratio >= 0.7 {
        ("Very Difficult", 1)
    } else {
        ("Extremely Difficult", 1)
    };
    Ok(BossEstimate {
        player_power,
        boss_power,
        ratio,
        label,
        recommended_phases,
        current_phase: state.phase(),
    })
}
