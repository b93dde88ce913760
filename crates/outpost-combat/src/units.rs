// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Unit catalog and force arithmetic.
//!
//! A [`Force`] is a per-unit-type head count. Its combat power is
//! `Σ (attack + defense) × quantity` over the catalog stats.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CombatError, Result};

/// Units per unit type. Ordered so logs and casualty reports are stable.
pub type Force = BTreeMap<String, u64>;

/// Combat statistics for one unit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStats {
    /// Offensive strength per unit.
    pub attack: u64,
    /// Defensive strength per unit.
    pub defense: u64,
    /// Hit points per unit (informational, used by estimates).
    pub health: u64,
}

impl UnitStats {
    /// Power contributed by a single unit.
    pub fn power(&self) -> u64 {
        self.attack.saturating_add(self.defense)
    }
}

/// Lookup table of unit definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCatalog {
    units: BTreeMap<String, UnitStats>,
}

impl Default for UnitCatalog {
    fn default() -> Self {
        let units = [
            ("infantry", 10, 8, 100),
            ("tanks", 40, 30, 300),
            ("artillery", 60, 15, 150),
            ("scouts", 5, 5, 50),
            ("mechs", 100, 80, 500),
            ("elite_soldiers", 25, 20, 200),
            ("spy", 5, 5, 50),
            ("colonist", 1, 1, 50),
        ]
        .into_iter()
        .map(|(name, attack, defense, health)| {
            (
                name.to_string(),
                UnitStats {
                    attack,
                    defense,
                    health,
                },
            )
        })
        .collect();

        Self { units }
    }
}

impl UnitCatalog {
    /// An empty catalog; populate with [`UnitCatalog::insert`].
    pub fn empty() -> Self {
        Self {
            units: BTreeMap::new(),
        }
    }

    /// Add or replace a unit definition.
    pub fn insert(&mut self, unit_type: impl Into<String>, stats: UnitStats) {
        self.units.insert(unit_type.into(), stats);
    }

    /// Stats for a unit type.
    pub fn get(&self, unit_type: &str) -> Result<&UnitStats> {
        self.units
            .get(unit_type)
            .ok_or_else(|| CombatError::UnknownUnit(unit_type.to_string()))
    }

    /// Whether the catalog knows this unit type.
    pub fn contains(&self, unit_type: &str) -> bool {
        self.units.contains_key(unit_type)
    }

    /// Total power of a force.
    ///
    /// Fails with [`CombatError::PowerOverflow`] when the sum does not fit a `u64`.
    pub fn power(&self, force: &Force) -> Result<u64> {
        force.iter().try_fold(0u64, |total, (unit_type, quantity)| {
            let stats = self.get(unit_type)?;
            stats
                .attack
                .checked_add(stats.defense)
                .and_then(|per_unit| per_unit.checked_mul(*quantity))
                .and_then(|power| total.checked_add(power))
                .ok_or(CombatError::PowerOverflow)
        })
    }
}

/// Total head count of a force.
pub fn total_units(force: &Force) -> u64 {
    force.values().fold(0u64, |total, quantity| total.saturating_add(*quantity))
}

/// Drop zero entries so "remaining unit types" means types with units left.
pub fn living_types(force: &Force) -> Vec<String> {
    force
        .iter()
        .filter(|(_, quantity)| **quantity > 0)
        .map(|(unit_type, _)| unit_type.clone())
        .collect()
}

/// Per-unit-type casualty report for one side.
///
/// Every unit type that was sent appears in all three maps, so
/// `lost + survived = sent` can be checked entry by entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Casualties {
    /// Units committed to the fight.
    pub sent: Force,
    /// Units destroyed.
    pub lost: Force,
    /// Units still standing.
    pub survived: Force,
}

impl Casualties {
    /// Build a report from the force sent and the force remaining.
    ///
    /// Remaining counts are capped at what was sent.
    pub fn from_remaining(sent: &Force, remaining: &Force) -> Self {
        let mut lost = Force::new();
        let mut survived = Force::new();
        for (unit_type, quantity) in sent {
            let left = remaining.get(unit_type).copied().unwrap_or(0).min(*quantity);
            survived.insert(unit_type.clone(), left);
            lost.insert(unit_type.clone(), quantity - left);
        }
        Self {
            sent: sent.clone(),
            lost,
            survived,
        }
    }

    /// Apply the same survival percentage to every unit type.
    ///
    /// `lost = floor(quantity × (100 − pct) / 100)`, survivors are the rest.
    pub fn from_survival_pct(sent: &Force, survival_pct: u32) -> Self {
        let loss_pct = u64::from(100 - survival_pct.min(100));
        let remaining = sent
            .iter()
            .map(|(unit_type, quantity)| (unit_type.clone(), quantity - quantity * loss_pct / 100))
            .collect();
        Self::from_remaining(sent, &remaining)
    }

    /// A side that took no losses.
    pub fn unharmed(sent: &Force) -> Self {
        Self::from_remaining(sent, sent)
    }

    /// True when `lost + survived = sent` holds for every unit type.
    pub fn is_balanced(&self) -> bool {
        self.sent.iter().all(|(unit_type, quantity)| {
            let lost = self.lost.get(unit_type).copied().unwrap_or(0);
            let survived = self.survived.get(unit_type).copied().unwrap_or(0);
            lost + survived == *quantity
        })
    }

    /// Total units lost on this side.
    pub fn total_lost(&self) -> u64 {
        total_units(&self.lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn force(entries: &[(&str, u64)]) -> Force {
        entries
            .iter()
            .map(|(unit_type, quantity)| (unit_type.to_string(), *quantity))
            .collect()
    }

    #[test]
    fn test_power_sums_attack_and_defense() {
        let catalog = UnitCatalog::default();
        let army = force(&[("infantry", 10), ("tanks", 2)]);
        // infantry 18 × 10 + tanks 70 × 2
        assert_eq!(catalog.power(&army).unwrap(), 320);
    }

    #[test]
    fn test_unknown_unit_is_an_error() {
        let catalog = UnitCatalog::default();
        let army = force(&[("dragons", 1)]);
        assert_eq!(
            catalog.power(&army),
            Err(CombatError::UnknownUnit("dragons".to_string()))
        );
    }

    #[test]
    fn test_power_overflow_is_an_error() {
        let catalog = UnitCatalog::default();
        let army = force(&[("infantry", u64::MAX / 2)]);
        assert_eq!(catalog.power(&army), Err(CombatError::PowerOverflow));

        // the mechs alone fit, the tanks push it over
        let army = force(&[("mechs", u64::MAX / 180), ("tanks", 10)]);
        assert_eq!(catalog.power(&army), Err(CombatError::PowerOverflow));
        assert_eq!(total_units(&force(&[("mechs", u64::MAX), ("tanks", 1)])), u64::MAX);
    }

    #[test]
    fn test_survival_pct_floors_losses() {
        let sent = force(&[("infantry", 100), ("tanks", 7)]);
        let casualties = Casualties::from_survival_pct(&sent, 95);
        assert_eq!(casualties.survived["infantry"], 95);
        assert_eq!(casualties.lost["infantry"], 5);
        // 7 × 5 / 100 floors to 0 losses
        assert_eq!(casualties.lost["tanks"], 0);
        assert!(casualties.is_balanced());
    }

    #[test]
    fn test_from_remaining_caps_at_sent() {
        let sent = force(&[("infantry", 10)]);
        let remaining = force(&[("infantry", 50)]);
        let casualties = Casualties::from_remaining(&sent, &remaining);
        assert_eq!(casualties.survived["infantry"], 10);
        assert_eq!(casualties.lost["infantry"], 0);
    }

    #[test]
    fn test_living_types_skips_empty() {
        let army = force(&[("infantry", 0), ("tanks", 3)]);
        assert_eq!(living_types(&army), vec!["tanks".to_string()]);
    }
}
