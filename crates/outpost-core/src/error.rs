// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for outpost-core.
//!
//! Errors fall into three classes:
//!
//! | Class | Variants | Handling |
//! |-------|----------|----------|
//! | Validation | `ValidationError` | Rejected synchronously at mission creation, nothing persisted |
//! | Transient | `DatabaseError`, `VersionConflict` | Resolution job retried with backoff |
//! | Permanent | everything else | Resolution job failed, surfaced to operators |
//!
//! Losing a conditional update is not an error; see [`Transition`](crate::mission::Transition).

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the mission store, scheduler and resolution plumbing.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CoreError {
    /// Input validation failed (resources, target, cooldown, payload).
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Mission was not found.
    MissionNotFound {
        /// The mission ID.
        mission_id: String,
    },

    /// Boss encounter was not found.
    EncounterNotFound {
        /// The encounter ID.
        encounter_id: String,
    },

    /// A settlement or portal referenced by a mission is gone.
    TargetNotFound {
        /// Target kind (settlement, portal).
        kind: String,
        /// Target ID.
        target_id: String,
    },

    /// A unit type has no catalog entry.
    UnitDefinitionMissing {
        /// The unit type.
        unit_type: String,
    },

    /// A status transition outside the mission state machine was requested.
    InvalidTransition {
        /// The mission ID.
        mission_id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Shared state changed between read and commit.
    VersionConflict {
        /// Entity kind (boss_encounter, settlement, portal).
        entity: String,
        /// Entity ID.
        id: String,
    },

    /// A stored record could not be decoded.
    CorruptRecord {
        /// What was being decoded.
        entity: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Shorthand for a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::MissionNotFound { .. } => "MISSION_NOT_FOUND",
            Self::EncounterNotFound { .. } => "ENCOUNTER_NOT_FOUND",
            Self::TargetNotFound { .. } => "TARGET_NOT_FOUND",
            Self::UnitDefinitionMissing { .. } => "UNIT_DEFINITION_MISSING",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::CorruptRecord { .. } => "CORRUPT_RECORD",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError { .. } | Self::VersionConflict { .. }
        )
    }

    /// Whether the failure will repeat on every retry.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::MissionNotFound { mission_id } => {
                write!(f, "Mission '{}' not found", mission_id)
            }
            Self::EncounterNotFound { encounter_id } => {
                write!(f, "Boss encounter '{}' not found", encounter_id)
            }
            Self::TargetNotFound { kind, target_id } => {
                write!(f, "Target {} '{}' not found", kind, target_id)
            }
            Self::UnitDefinitionMissing { unit_type } => {
                write!(f, "Unit definition missing for '{}'", unit_type)
            }
            Self::InvalidTransition {
                mission_id,
                from,
                to,
            } => {
                write!(
                    f,
                    "Mission '{}' cannot move from '{}' to '{}'",
                    mission_id, from, to
                )
            }
            Self::VersionConflict { entity, id } => {
                write!(f, "Concurrent update on {} '{}'", entity, id)
            }
            Self::CorruptRecord { entity, details } => {
                write!(f, "Corrupt {} record: {}", entity, details)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::CorruptRecord {
            entity: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<outpost_combat::CombatError> for CoreError {
    fn from(err: outpost_combat::CombatError) -> Self {
        match err {
            outpost_combat::CombatError::UnknownUnit(unit_type) => {
                CoreError::UnitDefinitionMissing { unit_type }
            }
            other => CoreError::validation("units", other.to_string()),
        }
    }
}
