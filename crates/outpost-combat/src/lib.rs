// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outpost Combat - battle resolution
//!
//! Pure computation mapping forces, tactics and (for bosses) persistent boss
//! state to an outcome. Nothing here touches storage or the clock; every
//! random decision is drawn from a caller-supplied RNG, so a resolution
//! seeded from the mission id replays identically on retry.
//!
//! # Engines
//!
//! | Engine | Used by | Description |
//! |--------|---------|-------------|
//! | [`EncounterEngine`] | attack, portal expedition | One power comparison mapped to an outcome band |
//! | [`BossEngine`] | boss expedition | Bounded round loop with phases and abilities |
//! | [`resolve_spy_mission`] | spy | Detection and success rolls, intel report |
//!
//! # Power
//!
//! A force's power is `Σ (attack + defense) × quantity` over the
//! [`UnitCatalog`]. Tactics scale it (see [`Tactic`]); single encounters add
//! a ±15% variance.
//!
//! # Boss Phases
//!
//! ```text
//!   health > 75%      > 50%                > 25%              else
//!  ┌─────────┐   ┌──────────────┐   ┌────────────────┐   ┌──────────────┐
//!  │ PHASE 1 │──▶│   PHASE 2    │──▶│    PHASE 3     │──▶│   PHASE 4    │
//!  │         │   │ regen on     │   │ + area damage  │   │ + disable    │
//!  └─────────┘   │ entry (15%)  │   │   (30%/round)  │   │  (30%/round) │
//!                └──────────────┘   └────────────────┘   └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`units`]: unit catalog, forces and casualty reports
//! - [`tactic`]: attacker tactics
//! - [`encounter`]: single-encounter engine and battle estimates
//! - [`boss`]: multi-phase boss engine and boss estimates
//! - [`espionage`]: spy mission rolls
//! - [`loot`]: tier loot tables
//! - [`result`]: combat results and replay events
//! - [`error`]: error type

#![deny(missing_docs)]

/// Multi-phase boss engine.
pub mod boss;

/// Single-encounter engine.
pub mod encounter;

/// Error types.
pub mod error;

/// Spy mission resolution.
pub mod espionage;

/// Loot tables and rewards.
pub mod loot;

/// Combat results and replay events.
pub mod result;

/// Attacker tactics.
pub mod tactic;

/// Unit catalog and casualty arithmetic.
pub mod units;

pub use boss::{BossConfig, BossEngine, BossEstimate, BossFight, BossState, estimate_boss, phase_for};
pub use encounter::{BattleEstimate, EncounterConfig, EncounterEngine, EncounterRequest, estimate_battle};
pub use error::{CombatError, Result};
pub use espionage::{IntelReport, SpyObjective, SpyOutcome, resolve_spy_mission};
pub use loot::{Loot, LootItem, LootTable, Tier};
pub use result::{CombatEvent, CombatOutcome, CombatResult};
pub use tactic::Tactic;
pub use units::{Casualties, Force, UnitCatalog, UnitStats};

/// Derive a reproducible RNG seed from a 128-bit identifier (XOR of its halves).
pub fn seed_from_id(id: u128) -> u64 {
    (id as u64) ^ ((id >> 64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_from_id_folds_halves() {
        assert_eq!(seed_from_id(0), 0);
        assert_eq!(seed_from_id(1), 1);
        assert_eq!(seed_from_id(1 << 64), 1);
        assert_eq!(seed_from_id((1 << 64) | 1), 0);
    }

    #[test]
    fn test_result_log_serializes_with_event_tags() {
        let event = CombatEvent::PhaseTransition { round: 3, phase: 2 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "phase_transition");
        assert_eq!(json["round"], 3);
        assert_eq!(json["phase"], 2);
    }
}
