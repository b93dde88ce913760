// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spy missions.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::loot::Loot;
use crate::result::{CombatEvent, CombatOutcome, CombatResult};
use crate::units::{Casualties, Force};

/// Unit type used as spies and as counter-intelligence.
pub const SPY_UNIT: &str = "spy";

/// Highest counter-intelligence level.
pub const MAX_COUNTER_INTEL: u64 = 10;

/// What the spies are after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpyObjective {
    /// Stockpile report; easiest.
    #[default]
    Reconnaissance,
    /// Stockpile and garrison report.
    MilitaryIntel,
    /// No report; hardest.
    Sabotage,
}

impl SpyObjective {
    fn modifier(self) -> f64 {
        match self {
            Self::Reconnaissance => 0.20,
            Self::MilitaryIntel => 0.0,
            Self::Sabotage => -0.20,
        }
    }

    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reconnaissance => "reconnaissance",
            Self::MilitaryIntel => "military_intel",
            Self::Sabotage => "sabotage",
        }
    }
}

/// Counter-intelligence level of a target: one level per ten defending spies.
pub fn counter_intel_level(defender_garrison: &Force) -> u64 {
    (defender_garrison.get(SPY_UNIT).copied().unwrap_or(0) / 10).min(MAX_COUNTER_INTEL)
}

/// `clamp(0.60 + min(0.05 × spies, 0.30) − 0.10 × counter_intel + modifier, 0.10, 0.95)`.
pub fn success_rate(spies: u64, counter_intel: u64, objective: SpyObjective) -> f64 {
    let spy_bonus = (spies as f64 * 0.05).min(0.30);
    let penalty = counter_intel as f64 * 0.10;
    (0.60 + spy_bonus - penalty + objective.modifier()).clamp(0.10, 0.95)
}

/// `min(0.15 × counter_intel, 0.60)`.
pub fn detection_chance(counter_intel: u64) -> f64 {
    (counter_intel as f64 * 0.15).min(0.60)
}

/// Spies lost: none unless detected, then `max(1, floor(spies × (1 − rate)))`.
pub fn spies_lost(spies: u64, rate: f64, detected: bool) -> u64 {
    if !detected {
        return 0;
    }
    ((spies as f64 * (1.0 - rate)).floor() as u64).max(1).min(spies)
}

/// What a successful mission brings home.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelReport {
    /// Approximate target stockpile.
    pub resources: BTreeMap<String, u64>,
    /// Approximate target garrison (military intel only).
    pub units: Option<Force>,
}

/// Outcome of a spy mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpyOutcome {
    /// Result in the shared combat shape (spies are the attacker).
    pub result: CombatResult,
    /// Probability the mission was rolled against.
    pub success_rate: f64,
    /// Whether the target noticed.
    pub detected: bool,
    /// Intel gathered, when successful and not sabotage.
    pub intel: Option<IntelReport>,
}

/// Resolve a spy mission against a target.
pub fn resolve_spy_mission<R: Rng + ?Sized>(
    spies: u64,
    objective: SpyObjective,
    target_stockpile: &BTreeMap<String, u64>,
    target_garrison: &Force,
    rng: &mut R,
) -> SpyOutcome {
    let counter_intel = counter_intel_level(target_garrison);
    let detected = rng.gen_bool(detection_chance(counter_intel));
    let rate = success_rate(spies, counter_intel, objective);
    let success = rng.gen_bool(rate);

    let intel = (success && objective != SpyObjective::Sabotage).then(|| IntelReport {
        resources: target_stockpile
            .iter()
            .map(|(resource, amount)| (resource.clone(), (*amount as f64 * 0.9).floor() as u64))
            .collect(),
        units: (objective == SpyObjective::MilitaryIntel).then(|| {
            target_garrison
                .iter()
                .map(|(unit_type, quantity)| (unit_type.clone(), (*quantity as f64 * 0.85).floor() as u64))
                .collect()
        }),
    });

    let sent: Force = [(SPY_UNIT.to_string(), spies)].into_iter().collect();
    let lost = spies_lost(spies, rate, detected);
    let remaining: Force = [(SPY_UNIT.to_string(), spies - lost)].into_iter().collect();

    SpyOutcome {
        result: CombatResult {
            outcome: if success {
                CombatOutcome::Victory
            } else {
                CombatOutcome::Defeat
            },
            attacker: Casualties::from_remaining(&sent, &remaining),
            defender: None,
            loot: Loot::default(),
            log: vec![CombatEvent::Espionage {
                success_rate: rate,
                detected,
            }],
        },
        success_rate: rate,
        detected,
        intel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_success_rate_bounds() {
        // 0.60 + 0.30 + 0.20 capped at 0.95
        assert!((success_rate(20, 0, SpyObjective::Reconnaissance) - 0.95).abs() < 1e-9);
        // 0.60 + 0.05 − 1.0 − 0.20 floored at 0.10
        assert!((success_rate(1, 10, SpyObjective::Sabotage) - 0.10).abs() < 1e-9);
        // 0.60 + 0.10 − 0.20
        assert!((success_rate(2, 2, SpyObjective::MilitaryIntel) - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_detection_chance_caps() {
        assert_eq!(detection_chance(0), 0.0);
        assert!((detection_chance(2) - 0.30).abs() < 1e-9);
        assert!((detection_chance(10) - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_losses_only_when_detected() {
        assert_eq!(spies_lost(10, 0.5, false), 0);
        assert_eq!(spies_lost(10, 0.5, true), 5);
        assert_eq!(spies_lost(1, 0.95, true), 1);
    }

    #[test]
    fn test_counter_intel_from_garrison() {
        let garrison: Force = [("spy".to_string(), 35), ("infantry".to_string(), 100)]
            .into_iter()
            .collect();
        assert_eq!(counter_intel_level(&garrison), 3);
        let garrison: Force = [("spy".to_string(), 500)].into_iter().collect();
        assert_eq!(counter_intel_level(&garrison), MAX_COUNTER_INTEL);
    }

    #[test]
    fn test_undefended_target_is_never_detected() {
        let stockpile: BTreeMap<String, u64> = [("gold".to_string(), 1000)].into_iter().collect();
        let garrison: Force = [("infantry".to_string(), 20)].into_iter().collect();
        for seed in 0..30 {
            let outcome = resolve_spy_mission(
                5,
                SpyObjective::MilitaryIntel,
                &stockpile,
                &garrison,
                &mut StdRng::seed_from_u64(seed),
            );
            assert!(!outcome.detected);
            assert_eq!(outcome.result.attacker.total_lost(), 0);
            if outcome.result.outcome == CombatOutcome::Victory {
                let intel = outcome.intel.unwrap();
                assert_eq!(intel.resources["gold"], 900);
                assert_eq!(intel.units.unwrap()["infantry"], 17);
            } else {
                assert!(outcome.intel.is_none());
            }
        }
    }

    #[test]
    fn test_sabotage_brings_no_intel() {
        let stockpile: BTreeMap<String, u64> = [("gold".to_string(), 1000)].into_iter().collect();
        for seed in 0..30 {
            let outcome = resolve_spy_mission(
                10,
                SpyObjective::Sabotage,
                &stockpile,
                &Force::new(),
                &mut StdRng::seed_from_u64(seed),
            );
            assert!(outcome.intel.is_none());
        }
    }
}
