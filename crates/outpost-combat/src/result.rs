// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Combat results and the replay log.

use serde::{Deserialize, Serialize};

use crate::boss::BossAbility;
use crate::loot::Loot;
use crate::units::{Casualties, Force};

/// Final verdict of a fight, from the attacker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatOutcome {
    /// The attacker won.
    Victory,
    /// The attacker lost.
    Defeat,
    /// Neither side could fight (single encounters only).
    Draw,
}

impl CombatOutcome {
    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Victory => "victory",
            Self::Defeat => "defeat",
            Self::Draw => "draw",
        }
    }
}

/// What a boss ability did when it fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AbilityEffect {
    /// The boss restored health.
    Heal {
        /// Health actually restored after clamping.
        amount: u64,
    },
    /// Attacker units were removed.
    Casualties {
        /// Units removed per type.
        losses: Force,
    },
    /// The ability found nothing to hit.
    NoTarget,
}

/// One discrete event for client replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CombatEvent {
    /// Single-encounter power comparison.
    Engagement {
        /// Attacker power after tactic and variance.
        attacker_power: f64,
        /// Defender power.
        defender_power: u64,
        /// `attacker_power / defender_power`.
        ratio: f64,
    },
    /// The attacker hit the boss.
    Attack {
        /// Round number, starting at 1.
        round: u32,
        /// Damage dealt.
        damage: u64,
        /// Boss health after the hit.
        boss_health: u64,
    },
    /// A boss ability fired.
    Ability {
        /// Round number.
        round: u32,
        /// Phase the boss was in.
        phase: u8,
        /// Which ability.
        ability: BossAbility,
        /// Its effect.
        effect: AbilityEffect,
    },
    /// The boss crossed into a new phase.
    PhaseTransition {
        /// Round number.
        round: u32,
        /// New phase.
        phase: u8,
    },
    /// The boss counter-attacked.
    BossAttack {
        /// Round number.
        round: u32,
        /// Damage (unit losses) dealt.
        damage: u64,
        /// Attacker units left after the hit.
        units_remaining: u64,
    },
    /// Espionage roll.
    Espionage {
        /// Probability the mission succeeded with.
        success_rate: f64,
        /// Whether the spies were noticed.
        detected: bool,
    },
}

/// Immutable output of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatResult {
    /// Verdict.
    pub outcome: CombatOutcome,
    /// Attacker casualties.
    pub attacker: Casualties,
    /// Defender casualties, when the mission type tracks them.
    pub defender: Option<Casualties>,
    /// Reward (empty on defeat).
    pub loot: Loot,
    /// Ordered replay events.
    pub log: Vec<CombatEvent>,
}

impl CombatResult {
    /// `lost + survived = sent` on every side.
    pub fn is_balanced(&self) -> bool {
        self.attacker.is_balanced()
            && self
                .defender
                .as_ref()
                .map(Casualties::is_balanced)
                .unwrap_or(true)
    }
}
