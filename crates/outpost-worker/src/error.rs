// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for outpost-worker.

use outpost_combat::CombatError;
use outpost_core::CoreError;
use thiserror::Error;

/// Worker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Mission store, job queue or outbox operation failed.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Combat engine rejected its inputs.
    #[error("Combat error: {0}")]
    Combat(#[from] CombatError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An event sink could not deliver an event.
    #[error("Delivery error: {0}")]
    Delivery(String),
}

impl Error {
    /// Whether a retry can succeed.
    ///
    /// Store unavailability and boss version conflicts are transient; missing
    /// entities, unknown unit types and corrupt rows are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Core(e) => e.is_transient(),
            Self::Delivery(_) => true,
            _ => false,
        }
    }
}

/// Result type using worker Error.
pub type Result<T> = std::result::Result<T, Error>;
