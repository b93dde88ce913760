// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mission model and lifecycle.
//!
//! ```text
//!  ┌─────────┐     ┌───────────┐ claim ┌─────────┐ commit ┌──────────┐
//!  │ PENDING │────▶│ TRAVELING │──────▶│ ARRIVED │───────▶│ RESOLVED │
//!  └─────────┘     └─────┬─────┘       └────┬────┘        └──────────┘
//!                        │ cancel           │ target gone
//!                        ▼                  ▼
//!                  ┌───────────┐       ┌────────┐
//!                  │ CANCELLED │       │ FAILED │
//!                  └───────────┘       └────────┘
//! ```
//!
//! Every edge is a conditional update on the mission row ("only if the
//! current status is X"), so at most one caller wins each edge.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use outpost_combat::espionage::SPY_UNIT;
use outpost_combat::{Force, SpyObjective, Tactic};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Unit type carried by colonization missions.
pub const COLONIST_UNIT: &str = "colonist";

/// Mission type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionKind {
    /// Raid against another settlement's garrison.
    Attack,
    /// Espionage against a settlement.
    Spy,
    /// Claim a free settlement slot.
    Colonization,
    /// Resource delivery.
    Convoy,
    /// Portal or boss expedition.
    Expedition,
}

impl MissionKind {
    /// Every mission type.
    pub const ALL: [MissionKind; 5] = [
        Self::Attack,
        Self::Spy,
        Self::Colonization,
        Self::Convoy,
        Self::Expedition,
    ];

    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attack => "attack",
            Self::Spy => "spy",
            Self::Colonization => "colonization",
            Self::Convoy => "convoy",
            Self::Expedition => "expedition",
        }
    }

    /// Travel speed in tiles per hour.
    pub fn speed(self) -> f64 {
        match self {
            Self::Attack => 2.0,
            Self::Spy => 4.0,
            Self::Colonization => 2.0,
            Self::Convoy => 1.5,
            Self::Expedition => 2.0,
        }
    }
}

impl fmt::Display for MissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attack" => Ok(Self::Attack),
            "spy" => Ok(Self::Spy),
            "colonization" => Ok(Self::Colonization),
            "convoy" => Ok(Self::Convoy),
            "expedition" => Ok(Self::Expedition),
            other => Err(CoreError::validation("kind", format!("unknown mission type '{}'", other))),
        }
    }
}

/// Mission status. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    /// Created, not yet departed.
    Pending,
    /// On the way.
    Traveling,
    /// Claimed for resolution.
    Arrived,
    /// Outcome committed.
    Resolved,
    /// Called back before arrival.
    Cancelled,
    /// Could not be resolved (target gone).
    Failed,
}

impl MissionStatus {
    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Traveling => "traveling",
            Self::Arrived => "arrived",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled | Self::Failed)
    }

    /// Legal edges: pending→traveling, traveling→{arrived, cancelled},
    /// arrived→{resolved, failed}.
    pub fn can_transition_to(self, next: MissionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Traveling)
                | (Self::Traveling, Self::Arrived)
                | (Self::Traveling, Self::Cancelled)
                | (Self::Arrived, Self::Resolved)
                | (Self::Arrived, Self::Failed)
        )
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "traveling" => Ok(Self::Traveling),
            "arrived" => Ok(Self::Arrived),
            "resolved" => Ok(Self::Resolved),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::CorruptRecord {
                entity: "mission".to_string(),
                details: format!("unknown status '{}'", other),
            }),
        }
    }
}

/// Result of a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// This caller changed the row.
    Applied,
    /// The row was no longer in the expected state; someone else advanced it.
    Lost,
}

impl Transition {
    /// Map a `rows_affected() > 0` check.
    pub fn from_applied(applied: bool) -> Self {
        if applied { Self::Applied } else { Self::Lost }
    }

    /// True for [`Transition::Applied`].
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

/// What a mission travels to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Target {
    /// A settlement (owned or a free slot).
    Settlement(String),
    /// A portal.
    Portal(String),
    /// A boss encounter.
    Boss(String),
}

impl Target {
    /// Storage discriminator.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Settlement(_) => "settlement",
            Self::Portal(_) => "portal",
            Self::Boss(_) => "boss",
        }
    }

    /// Target ID.
    pub fn id(&self) -> &str {
        match self {
            Self::Settlement(id) | Self::Portal(id) | Self::Boss(id) => id,
        }
    }

    /// Rebuild from the stored discriminator and ID.
    pub fn from_parts(kind: &str, id: String) -> Result<Self, CoreError> {
        match kind {
            "settlement" => Ok(Self::Settlement(id)),
            "portal" => Ok(Self::Portal(id)),
            "boss" => Ok(Self::Boss(id)),
            other => Err(CoreError::CorruptRecord {
                entity: "mission".to_string(),
                details: format!("unknown target kind '{}'", other),
            }),
        }
    }
}

/// Per-type mission data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionPayload {
    /// Raid with a force.
    Attack {
        /// Units sent.
        units: Force,
        /// Tactic.
        #[serde(default)]
        tactic: Tactic,
    },
    /// Espionage.
    Spy {
        /// Spies sent.
        spies: u64,
        /// Objective.
        #[serde(default)]
        objective: SpyObjective,
    },
    /// Settle a free slot.
    Colonization {
        /// Colonists sent.
        colonists: u64,
    },
    /// Deliver resources.
    Convoy {
        /// Resources carried.
        cargo: BTreeMap<String, u64>,
    },
    /// Portal or boss expedition.
    Expedition {
        /// Units sent.
        units: Force,
        /// Tactic (single encounters only).
        #[serde(default)]
        tactic: Tactic,
    },
}

impl MissionPayload {
    /// Mission type this payload belongs to.
    pub fn kind(&self) -> MissionKind {
        match self {
            Self::Attack { .. } => MissionKind::Attack,
            Self::Spy { .. } => MissionKind::Spy,
            Self::Colonization { .. } => MissionKind::Colonization,
            Self::Convoy { .. } => MissionKind::Convoy,
            Self::Expedition { .. } => MissionKind::Expedition,
        }
    }

    /// Units taken out of the origin garrison at departure.
    pub fn reserved_units(&self) -> Force {
        match self {
            Self::Attack { units, .. } | Self::Expedition { units, .. } => units.clone(),
            Self::Spy { spies, .. } => single(SPY_UNIT, *spies),
            Self::Colonization { colonists } => single(COLONIST_UNIT, *colonists),
            Self::Convoy { .. } => Force::new(),
        }
    }

    /// Resources taken out of the origin stockpile at departure.
    pub fn reserved_resources(&self) -> BTreeMap<String, u64> {
        match self {
            Self::Convoy { cargo } => cargo.clone(),
            _ => BTreeMap::new(),
        }
    }
}

fn single(unit_type: &str, quantity: u64) -> Force {
    let mut force = Force::new();
    force.insert(unit_type.to_string(), quantity);
    force
}

/// `floor(amount × percent / 100)` for every entry.
pub fn portion(amounts: &BTreeMap<String, u64>, percent: u64) -> BTreeMap<String, u64> {
    amounts
        .iter()
        .map(|(name, amount)| (name.clone(), amount * percent / 100))
        .filter(|(_, amount)| *amount > 0)
        .collect()
}

/// Grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    /// Column.
    pub x: i64,
    /// Row.
    pub y: i64,
}

impl Coordinates {
    /// Construct from a pair.
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Manhattan distance in tiles, saturating at `u64::MAX`.
    pub fn distance(&self, other: &Coordinates) -> u64 {
        self.x.abs_diff(other.x).saturating_add(self.y.abs_diff(other.y))
    }
}

/// `min_travel + ceil(distance × 3600 / speed)` seconds.
///
/// Strictly increasing in distance, and never shorter than `min_travel`.
/// Returns `None` when the result does not fit a [`Duration`].
pub fn travel_time(kind: MissionKind, distance: u64, min_travel: Duration) -> Option<Duration> {
    let floor = if min_travel > Duration::zero() {
        min_travel
    } else {
        Duration::seconds(1)
    };
    let seconds = (distance as f64 * 3600.0 / kind.speed()).ceil();
    if !seconds.is_finite() || seconds >= i64::MAX as f64 {
        return None;
    }
    floor.checked_add(&Duration::try_seconds(seconds as i64)?)
}

/// A mission row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    /// Mission ID.
    pub id: Uuid,
    /// Mission type.
    pub kind: MissionKind,
    /// Current status.
    pub status: MissionStatus,
    /// Acting player.
    pub actor_id: String,
    /// Origin settlement.
    pub origin_id: String,
    /// Destination.
    pub target: Target,
    /// Per-type data.
    pub payload: MissionPayload,
    /// Departure time.
    pub departure_at: DateTime<Utc>,
    /// Arrival time, never before departure.
    pub arrival_at: DateTime<Utc>,
    /// When the mission reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Why a mission failed.
    pub failure_reason: Option<String>,
}

impl MissionRecord {
    /// Arrival time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.arrival_at <= now
    }
}

/// A mission about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMission {
    /// Mission ID.
    pub id: Uuid,
    /// Acting player.
    pub actor_id: String,
    /// Origin settlement.
    pub origin_id: String,
    /// Destination.
    pub target: Target,
    /// Per-type data; also determines the mission type.
    pub payload: MissionPayload,
    /// Departure time.
    pub departure_at: DateTime<Utc>,
    /// Arrival time.
    pub arrival_at: DateTime<Utc>,
}

impl NewMission {
    /// Mission type.
    pub fn kind(&self) -> MissionKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use MissionStatus::*;
        assert!(Pending.can_transition_to(Traveling));
        assert!(Traveling.can_transition_to(Arrived));
        assert!(Traveling.can_transition_to(Cancelled));
        assert!(Arrived.can_transition_to(Resolved));
        assert!(Arrived.can_transition_to(Failed));

        assert!(!Arrived.can_transition_to(Cancelled));
        assert!(!Resolved.can_transition_to(Arrived));
        assert!(!Cancelled.can_transition_to(Resolved));
        assert!(!Traveling.can_transition_to(Resolved));
        assert!(!Pending.can_transition_to(Arrived));
    }

    #[test]
    fn test_terminal_states() {
        assert!(MissionStatus::Resolved.is_terminal());
        assert!(MissionStatus::Cancelled.is_terminal());
        assert!(MissionStatus::Failed.is_terminal());
        assert!(!MissionStatus::Arrived.is_terminal());
    }

    #[test]
    fn test_zero_distance_still_travels() {
        let time = travel_time(MissionKind::Attack, 0, Duration::seconds(60)).unwrap();
        assert_eq!(time, Duration::seconds(60));
        let time = travel_time(MissionKind::Attack, 0, Duration::zero()).unwrap();
        assert!(time > Duration::zero());
    }

    #[test]
    fn test_travel_time_increases_with_distance() {
        for kind in MissionKind::ALL {
            let mut previous = travel_time(kind, 0, Duration::seconds(60)).unwrap();
            for distance in 1..50 {
                let next = travel_time(kind, distance, Duration::seconds(60)).unwrap();
                assert!(next > previous, "{} not increasing at {}", kind, distance);
                previous = next;
            }
        }
        // 3 tiles at 1.5 tiles/hour = 2 hours
        assert_eq!(
            travel_time(MissionKind::Convoy, 3, Duration::seconds(60)),
            Some(Duration::seconds(60 + 7200))
        );
    }

    #[test]
    fn test_travel_time_out_of_range() {
        let far = Coordinates::new(i64::MIN, i64::MIN).distance(&Coordinates::new(i64::MAX, i64::MAX));
        assert_eq!(far, u64::MAX);
        assert!(travel_time(MissionKind::Attack, far, Duration::seconds(60)).is_none());
        assert!(travel_time(MissionKind::Convoy, u64::MAX / 2, Duration::seconds(60)).is_none());
    }

    #[test]
    fn test_manhattan_distance() {
        let a = Coordinates::new(-2, 5);
        let b = Coordinates::new(3, 1);
        assert_eq!(a.distance(&b), 9);
        assert_eq!(b.distance(&a), 9);
        assert_eq!(a.distance(&a), 0);
        assert_eq!(
            Coordinates::new(i64::MIN, 0).distance(&Coordinates::new(i64::MAX, 0)),
            u64::MAX
        );
    }

    #[test]
    fn test_payload_reservations() {
        let payload = MissionPayload::Spy {
            spies: 4,
            objective: SpyObjective::Sabotage,
        };
        assert_eq!(payload.reserved_units()["spy"], 4);
        assert!(payload.reserved_resources().is_empty());

        let mut cargo = BTreeMap::new();
        cargo.insert("gold".to_string(), 101);
        let payload = MissionPayload::Convoy { cargo };
        assert!(payload.reserved_units().is_empty());
        assert_eq!(portion(&payload.reserved_resources(), 50)["gold"], 50);
    }

    #[test]
    fn test_payload_json_shape() {
        let payload: MissionPayload =
            serde_json::from_str(r#"{"type":"attack","units":{"infantry":10}}"#).unwrap();
        assert_eq!(payload.kind(), MissionKind::Attack);
        match payload {
            MissionPayload::Attack { units, tactic } => {
                assert_eq!(units["infantry"], 10);
                assert_eq!(tactic, Tactic::Balanced);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            MissionStatus::Pending,
            MissionStatus::Traveling,
            MissionStatus::Arrived,
            MissionStatus::Resolved,
            MissionStatus::Cancelled,
            MissionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MissionStatus>().unwrap(), status);
        }
        assert!("teleported".parse::<MissionStatus>().is_err());
    }
}
