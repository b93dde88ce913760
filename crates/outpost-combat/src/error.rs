// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for outpost-combat.

use thiserror::Error;

/// Errors raised while computing a combat outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CombatError {
    /// A force references a unit type missing from the catalog.
    #[error("Unit definition missing: {0}")]
    UnknownUnit(String),

    /// The attacking force has no units at all.
    #[error("Attacking force is empty")]
    EmptyForce,

    /// A force is too large for its power to be represented.
    #[error("Force power exceeds the representable range")]
    PowerOverflow,

    /// The boss state handed to the engine is not fightable.
    #[error("Invalid boss state: {0}")]
    InvalidBossState(String),
}

/// Result type using CombatError.
pub type Result<T> = std::result::Result<T, CombatError>;
