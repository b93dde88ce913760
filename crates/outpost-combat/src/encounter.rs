// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Single-encounter combat.
//!
//! The attacker's power is scaled by tactic, perturbed by a symmetric
//! variance, and compared to the defender's power. The ratio is mapped to a
//! fixed table of outcome bands:
//!
//! | ratio   | outcome | attacker survival |
//! |---------|---------|-------------------|
//! | ≥ 1.5   | victory | 95% |
//! | ≥ 1.2   | victory | 85% |
//! | ≥ 1.0   | victory | 70% |
//! | ≥ 0.8   | defeat  | 50% |
//! | ≥ 0.5   | defeat  | 30% |
//! | else    | defeat  | 10% |

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CombatError, Result};
use crate::loot::{Loot, LootTable};
use crate::result::{CombatEvent, CombatOutcome, CombatResult};
use crate::tactic::Tactic;
use crate::units::{Casualties, Force, UnitCatalog, total_units};

/// One row of the outcome table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeBand {
    /// Smallest ratio that falls in this band.
    pub min_ratio: f64,
    /// Verdict for the band.
    pub outcome: CombatOutcome,
    /// Percentage of attacking units that survive.
    pub survival_pct: u32,
}

/// Outcome bands, highest ratio first.
pub const OUTCOME_BANDS: [OutcomeBand; 6] = [
    OutcomeBand {
        min_ratio: 1.5,
        outcome: CombatOutcome::Victory,
        survival_pct: 95,
    },
    OutcomeBand {
        min_ratio: 1.2,
        outcome: CombatOutcome::Victory,
        survival_pct: 85,
    },
    OutcomeBand {
        min_ratio: 1.0,
        outcome: CombatOutcome::Victory,
        survival_pct: 70,
    },
    OutcomeBand {
        min_ratio: 0.8,
        outcome: CombatOutcome::Defeat,
        survival_pct: 50,
    },
    OutcomeBand {
        min_ratio: 0.5,
        outcome: CombatOutcome::Defeat,
        survival_pct: 30,
    },
    OutcomeBand {
        min_ratio: f64::NEG_INFINITY,
        outcome: CombatOutcome::Defeat,
        survival_pct: 10,
    },
];

/// Band for a power ratio.
pub fn band_for_ratio(ratio: f64) -> OutcomeBand {
    OUTCOME_BANDS
        .iter()
        .copied()
        .find(|band| ratio >= band.min_ratio)
        .unwrap_or(OUTCOME_BANDS[OUTCOME_BANDS.len() - 1])
}

/// Tunables for single encounters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncounterConfig {
    /// Half-width of the symmetric random variance on attacker power.
    pub variance: f64,
}

impl Default for EncounterConfig {
    fn default() -> Self {
        Self { variance: 0.15 }
    }
}

/// Inputs for one single-encounter resolution.
#[derive(Debug, Clone)]
pub struct EncounterRequest<'a> {
    /// Units sent by the attacker.
    pub attacker: &'a Force,
    /// Units defending.
    pub defender: &'a Force,
    /// Attacker tactic.
    pub tactic: Tactic,
    /// Loot rolled on victory, with its multiplier.
    pub loot: Option<(&'a LootTable, f64)>,
    /// Whether defender casualties are computed on victory (raids vs garrison).
    pub defender_losses: bool,
}

/// Single-encounter combat engine.
#[derive(Debug, Clone)]
pub struct EncounterEngine<'a> {
    catalog: &'a UnitCatalog,
    config: EncounterConfig,
}

impl<'a> EncounterEngine<'a> {
    /// Create an engine over a unit catalog.
    pub fn new(catalog: &'a UnitCatalog, config: EncounterConfig) -> Self {
        Self { catalog, config }
    }

    /// Compute the outcome of one encounter.
    ///
    /// Deterministic for a given RNG state.
    pub fn compute_outcome<R: Rng + ?Sized>(
        &self,
        request: &EncounterRequest<'_>,
        rng: &mut R,
    ) -> Result<CombatResult> {
        if total_units(request.attacker) == 0 {
            return Err(CombatError::EmptyForce);
        }

        let attacker_power = self.catalog.power(request.attacker)?;
        let defender_power = self.catalog.power(request.defender)?;

        let variance = if self.config.variance > 0.0 {
            rng.gen_range(-self.config.variance..=self.config.variance)
        } else {
            0.0
        };
        let effective = request.tactic.effective_power(attacker_power) * (1.0 + variance);

        if effective <= 0.0 && defender_power == 0 {
            return Ok(CombatResult {
                outcome: CombatOutcome::Draw,
                attacker: Casualties::unharmed(request.attacker),
                defender: request
                    .defender_losses
                    .then(|| Casualties::unharmed(request.defender)),
                loot: Loot::default(),
                log: vec![CombatEvent::Engagement {
                    attacker_power: effective,
                    defender_power,
                    ratio: 1.0,
                }],
            });
        }

        let ratio = if defender_power == 0 {
            f64::INFINITY
        } else {
            effective / defender_power as f64
        };
        let band = band_for_ratio(ratio);

        let attacker = Casualties::from_survival_pct(request.attacker, band.survival_pct);

        let victory = band.outcome == CombatOutcome::Victory;
        let defender = request.defender_losses.then(|| {
            if victory {
                // Defender survival mirrors the band of the inverse ratio.
                let inverse = band_for_ratio(1.0 / ratio);
                Casualties::from_survival_pct(request.defender, inverse.survival_pct)
            } else {
                Casualties::unharmed(request.defender)
            }
        });

        let loot = match (victory, request.loot) {
            (true, Some((table, multiplier))) => table.roll(rng, multiplier),
            _ => Loot::default(),
        };

        Ok(CombatResult {
            outcome: band.outcome,
            attacker,
            defender,
            loot,
            log: vec![CombatEvent::Engagement {
                attacker_power: effective,
                defender_power,
                ratio,
            }],
        })
    }
}

/// Difficulty label shown before committing to a fight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BattleEstimate {
    /// Attacker power (no variance).
    pub attacker_power: u64,
    /// Defender power.
    pub defender_power: u64,
    /// Power ratio.
    pub ratio: f64,
    /// Human-readable difficulty.
    pub label: &'static str,
}

/// Estimate a single encounter without rolling any dice.
pub fn estimate_battle(
    catalog: &UnitCatalog,
    attacker: &Force,
    defender: &Force,
) -> Result<BattleEstimate> {
    let attacker_power = catalog.power(attacker)?;
    let defender_power = catalog.power(defender)?;
    let ratio = if defender_power == 0 {
        f64::INFINITY
    } else {
        attacker_power as f64 / defender_power as f64
    };
    let label = if ratio >= 1.5 {
        "Easy"
    } else if ratio >= 1.2 {
        "Moderate"
    } else if ratio >= 1.0 {
        "Challenging"
    } else if ratio >= 0.8 {
        "Difficult"
    } else {
        "Very Difficult"
    };
    Ok(BattleEstimate {
        attacker_power,
        defender_power,
        ratio,
        label,
    })
}
