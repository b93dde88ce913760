// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tier-indexed loot tables.
//!
//! A table has guaranteed resource ranges (each rolled uniformly within
//! `[min, max]`) and independent bonus entries, each with its own drop
//! chance and amount range. Two catalogs exist: one for single encounters
//! (portal expeditions, raids) and one for boss encounters.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Portal / settlement tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Lowest tier.
    #[default]
    Grey,
    /// Second tier.
    Green,
    /// Third tier.
    Blue,
    /// Fourth tier.
    Purple,
    /// Fifth tier.
    Red,
    /// Top tier.
    Golden,
}

impl Tier {
    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grey => "grey",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Purple => "purple",
            Self::Red => "red",
            Self::Golden => "golden",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grey" => Ok(Self::Grey),
            "green" => Ok(Self::Green),
            "blue" => Ok(Self::Blue),
            "purple" => Ok(Self::Purple),
            "red" => Ok(Self::Red),
            "golden" => Ok(Self::Golden),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// A guaranteed resource and its uniform range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRange {
    /// Resource name (gold, wood, experience, ...).
    pub resource: String,
    /// Inclusive lower bound.
    pub min: u64,
    /// Inclusive upper bound.
    pub max: u64,
}

/// An optional drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusEntry {
    /// Item kind (unit_blueprint, artifact_fragment, ...).
    pub kind: String,
    /// Rarity label.
    pub rarity: String,
    /// Independent drop probability in `[0, 1]`.
    pub chance: f64,
    /// Inclusive lower bound of the dropped quantity.
    pub min: u64,
    /// Inclusive upper bound of the dropped quantity.
    pub max: u64,
}

/// A dropped item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootItem {
    /// Item kind.
    pub kind: String,
    /// Rarity label.
    pub rarity: String,
    /// How many were dropped.
    pub quantity: u64,
}

/// Structured reward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loot {
    /// Guaranteed resource amounts.
    pub resources: BTreeMap<String, u64>,
    /// Probabilistic bonus drops.
    pub items: Vec<LootItem>,
}

impl Loot {
    /// True when nothing was awarded.
    pub fn is_empty(&self) -> bool {
        self.resources.values().all(|amount| *amount == 0) && self.items.is_empty()
    }

    /// Scale resource amounts (floored); items are left untouched.
    pub fn scaled(&self, multiplier: f64) -> Self {
        Self {
            resources: self
                .resources
                .iter()
                .map(|(resource, amount)| (resource.clone(), (*amount as f64 * multiplier).floor() as u64))
                .collect(),
            items: self.items.clone(),
        }
    }

    /// Resources only, scaled; used for consolation rewards.
    pub fn consolation(&self, fraction: f64) -> Self {
        Self {
            resources: self.scaled(fraction).resources,
            items: Vec::new(),
        }
    }
}

/// Guaranteed ranges plus bonus entries for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootTable {
    /// Always-awarded resources.
    pub guaranteed: Vec<ResourceRange>,
    /// Independent bonus rolls.
    pub bonuses: Vec<BonusEntry>,
}

impl LootTable {
    /// Roll only the guaranteed resources.
    pub fn roll_base<R: Rng + ?Sized>(&self, rng: &mut R) -> Loot {
        let resources = self
            .guaranteed
            .iter()
            .map(|range| {
                let (low, high) = (range.min.min(range.max), range.max.max(range.min));
                (range.resource.clone(), rng.gen_range(low..=high))
            })
            .collect();
        Loot {
            resources,
            items: Vec::new(),
        }
    }

    /// Roll each bonus entry independently.
    pub fn roll_bonuses<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<LootItem> {
        let mut items = Vec::new();
        for entry in &self.bonuses {
            if rng.gen_bool(entry.chance.clamp(0.0, 1.0)) {
                let (low, high) = (entry.min.min(entry.max), entry.max.max(entry.min));
                items.push(LootItem {
                    kind: entry.kind.clone(),
                    rarity: entry.rarity.clone(),
                    quantity: rng.gen_range(low..=high),
                });
            }
        }
        items
    }

    /// Full roll with the guaranteed part multiplied by `multiplier`.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R, multiplier: f64) -> Loot {
        let mut loot = self.roll_base(rng).scaled(multiplier);
        loot.items = self.roll_bonuses(rng);
        loot
    }
}

fn range(resource: &str, min: u64, max: u64) -> ResourceRange {
    ResourceRange {
        resource: resource.to_string(),
        min,
        max,
    }
}

fn bonus(kind: &str, rarity: &str, chance: f64, min: u64, max: u64) -> BonusEntry {
    BonusEntry {
        kind: kind.to_string(),
        rarity: rarity.to_string(),
        chance,
        min,
        max,
    }
}

/// Loot for single encounters (portal expeditions and raids).
pub fn encounter_table(tier: Tier) -> LootTable {
    // (resources, gold, xp, blueprint chance, blueprint rarity)
    let (res, gold, xp, chance, rarity) = match tier {
        Tier::Grey => ((100, 500), (50, 150), (100, 250), 0.05, "common"),
        Tier::Green => ((500, 1500), (150, 400), (300, 600), 0.10, "uncommon"),
        Tier::Blue => ((1000, 3000), (400, 800), (700, 1200), 0.15, "rare"),
        Tier::Purple => ((2000, 5000), (1000, 2000), (1500, 2500), 0.20, "epic"),
        Tier::Red => ((5000, 10000), (2500, 5000), (3000, 5000), 0.25, "legendary"),
        Tier::Golden => ((10000, 20000), (5000, 10000), (6000, 10000), 0.30, "mythic"),
    };

    let mut guaranteed: Vec<ResourceRange> = ["wood", "stone", "iron", "food"]
        .into_iter()
        .map(|resource| range(resource, res.0, res.1))
        .collect();
    guaranteed.push(range("gold", gold.0, gold.1));
    guaranteed.push(range("experience", xp.0, xp.1));

    LootTable {
        guaranteed,
        bonuses: vec![bonus("unit_blueprint", rarity, chance, 1, 1)],
    }
}

/// Loot for boss encounters.
pub fn boss_table(tier: Tier) -> LootTable {
    let (gold, xp, bonuses) = match tier {
        Tier::Grey => (
            (800, 1200),
            (80, 120),
            vec![
                bonus("resource_pack", "common", 0.5, 1, 2),
                bonus("unit_blueprint", "common", 0.3, 1, 1),
            ],
        ),
        Tier::Green => (
            (2000, 3000),
            (200, 300),
            vec![
                bonus("resource_pack", "uncommon", 0.6, 1, 2),
                bonus("unit_blueprint", "uncommon", 0.4, 1, 1),
                bonus("building_upgrade", "common", 0.35, 1, 1),
            ],
        ),
        Tier::Blue => (
            (4500, 5500),
            (450, 550),
            vec![
                bonus("resource_pack", "rare", 0.7, 1, 3),
                bonus("unit_blueprint", "rare", 0.5, 1, 1),
                bonus("building_upgrade", "uncommon", 0.45, 1, 1),
                bonus("artifact_fragment", "rare", 0.25, 1, 1),
            ],
        ),
        Tier::Purple => (
            (9000, 11000),
            (900, 1100),
            vec![
                bonus("resource_pack", "epic", 0.8, 2, 4),
                bonus("unit_blueprint", "epic", 0.6, 1, 1),
                bonus("building_upgrade", "rare", 0.55, 1, 1),
                bonus("artifact_fragment", "epic", 0.4, 1, 2),
                bonus("boss_token", "epic", 0.3, 1, 1),
            ],
        ),
        Tier::Red => (
            (22000, 28000),
            (2200, 2800),
            vec![
                bonus("resource_pack", "legendary", 0.85, 2, 6),
                bonus("unit_blueprint", "legendary", 0.7, 1, 1),
                bonus("building_upgrade", "epic", 0.65, 1, 1),
                bonus("artifact_fragment", "legendary", 0.5, 1, 2),
                bonus("boss_token", "legendary", 0.45, 1, 1),
                bonus("exclusive_skin", "legendary", 0.15, 1, 1),
            ],
        ),
        Tier::Golden => (
            (90000, 110000),
            (9000, 11000),
            vec![
                bonus("resource_pack", "mythic", 1.0, 4, 8),
                bonus("unit_blueprint", "mythic", 0.85, 1, 1),
                bonus("building_upgrade", "legendary", 0.75, 1, 1),
                bonus("artifact", "mythic", 0.6, 1, 1),
                bonus("boss_token", "mythic", 0.55, 1, 2),
                bonus("exclusive_skin", "mythic", 0.3, 1, 1),
                bonus("title", "mythic", 0.2, 1, 1),
            ],
        ),
    };

    LootTable {
        guaranteed: vec![range("gold", gold.0, gold.1), range("experience", xp.0, xp.1)],
        bonuses,
    }
}

/// Guaranteed extra drop for named boss types.
pub fn boss_type_bonus(boss_type: &str) -> Option<LootItem> {
    let (kind, rarity) = match boss_type {
        "elite_guardian" => ("defense_rune", "rare"),
        "ancient_titan" => ("strength_rune", "rare"),
        "void_reaver" => ("speed_rune", "rare"),
        "cosmic_emperor" => ("cosmic_essence", "epic"),
        _ => return None,
    };
    Some(LootItem {
        kind: kind.to_string(),
        rarity: rarity.to_string(),
        quantity: 1,
    })
}

/// Multiplier for portal difficulty (1 = no bonus, +10% per level above 1).
pub fn difficulty_multiplier(difficulty: u32) -> f64 {
    1.0 + f64::from(difficulty.max(1) - 1) * 0.1
}
