// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Attacker-chosen tactics.

use serde::{Deserialize, Serialize};

/// How the attacker weighs offense against defense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tactic {
    /// 1.0 attack / 1.0 defense.
    #[default]
    Balanced,
    /// 1.3 attack / 0.7 defense.
    Aggressive,
    /// 0.7 attack / 1.3 defense.
    Defensive,
}

impl Tactic {
    /// `(attack, defense)` multipliers.
    pub fn modifiers(self) -> (f64, f64) {
        match self {
            Self::Balanced => (1.0, 1.0),
            Self::Aggressive => (1.3, 0.7),
            Self::Defensive => (0.7, 1.3),
        }
    }

    /// Effective power: the average of the attack- and defense-scaled components.
    pub fn effective_power(self, power: u64) -> f64 {
        let (attack, defense) = self.modifiers();
        let power = power as f64;
        (power * attack + power * defense) / 2.0
    }

    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
            Self::Defensive => "defensive",
        }
    }
}

impl std::str::FromStr for Tactic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(Self::Balanced),
            "aggressive" => Ok(Self::Aggressive),
            "defensive" => Ok(Self::Defensive),
            other => Err(format!("unknown tactic '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_power_averages_components() {
        assert!((Tactic::Balanced.effective_power(1000) - 1000.0).abs() < 1e-9);
        assert!((Tactic::Aggressive.effective_power(1000) - 1000.0).abs() < 1e-9);
        assert!((Tactic::Defensive.effective_power(1000) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_tactic_parse_round_trip() {
        for tactic in [Tactic::Balanced, Tactic::Aggressive, Tactic::Defensive] {
            assert_eq!(tactic.as_str().parse::<Tactic>(), Ok(tactic));
        }
        assert!("reckless".parse::<Tactic>().is_err());
    }
}
