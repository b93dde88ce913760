// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for outpost-worker integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use outpost_combat::{Force, Tier, UnitCatalog};
use outpost_core::{
    Coordinates, EncounterRecord, MissionKind, MissionScheduler, MissionStore, PortalRecord,
    RetryPolicy, SchedulerConfig, SettlementRecord, SqliteStore, Store, StrategyRouter,
};
use outpost_worker::{
    ArrivalScanner, ArrivalScannerConfig, ResolutionWorker, ResolutionWorkerConfig, Resolver,
};
use sqlx::sqlite::SqlitePoolOptions;

/// In-memory store with a small world:
///
/// | ID | Owner | Position | Contents |
/// |----|-------|----------|----------|
/// | home | alice | (0,0) | 100 infantry, 20 spies, 10 colonists, 1000 gold |
/// | outpost | alice | (2,0) | empty |
/// | enemy | bob | (3,4) | 50 infantry |
/// | free | - | (1,1) | free slot |
/// | gate | portal | (0,0) | 10 infantry, green |
/// | titan | boss | (10,0) | 5000 health, 80 defense |
pub async fn test_store() -> Arc<SqliteStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    outpost_core::migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");
    let store = SqliteStore::new(pool);
    seed_world(&store).await;
    Arc::new(store)
}

/// File-backed store at `path` with the same world as [`test_store`].
pub async fn file_store(path: &Path) -> Arc<SqliteStore> {
    let store = SqliteStore::from_path(path)
        .await
        .expect("Failed to open SQLite file");
    seed_world(&store).await;
    Arc::new(store)
}

async fn seed_world(store: &SqliteStore) {
    for (id, owner, x, y) in [
        ("home", Some("alice"), 0, 0),
        ("outpost", Some("alice"), 2, 0),
        ("enemy", Some("bob"), 3, 4),
        ("free", None, 1, 1),
    ] {
        store
            .upsert_settlement(&SettlementRecord {
                id: id.to_string(),
                owner_id: owner.map(str::to_string),
                coordinates: Coordinates::new(x, y),
                tier: Tier::Grey,
            })
            .await
            .unwrap();
    }
    store.set_garrison("home", "infantry", 100).await.unwrap();
    store.set_garrison("home", "spy", 20).await.unwrap();
    store.set_garrison("home", "colonist", 10).await.unwrap();
    store.set_garrison("enemy", "infantry", 50).await.unwrap();
    store.set_stockpile("home", "gold", 1000).await.unwrap();

    store
        .upsert_portal(&PortalRecord {
            id: "gate".to_string(),
            tier: Tier::Green,
            difficulty: 1,
            coordinates: Coordinates::new(0, 0),
            enemy_units: force(&[("infantry", 10)]),
            active: true,
            cleared_by: None,
        })
        .await
        .unwrap();
    store
        .upsert_encounter(&EncounterRecord::new(
            "titan",
            "Ancient Titan",
            "ancient_titan",
            Tier::Red,
            Coordinates::new(10, 0),
            5000,
            80,
        ))
        .await
        .unwrap();
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
}

pub fn force(entries: &[(&str, u64)]) -> Force {
    entries
        .iter()
        .map(|(unit_type, quantity)| (unit_type.to_string(), *quantity))
        .collect()
}

pub fn dyn_store(store: &Arc<SqliteStore>) -> Arc<dyn Store> {
    store.clone()
}

/// Mission scheduler routing `direct` kinds to direct dispatch.
pub fn scheduler(store: &Arc<SqliteStore>, direct: &[MissionKind]) -> MissionScheduler<SqliteStore> {
    let router = Arc::new(StrategyRouter::new(
        store.clone(),
        direct.iter().copied(),
        RetryPolicy::default(),
    ));
    MissionScheduler::new(
        store.clone(),
        UnitCatalog::default(),
        router,
        SchedulerConfig::default(),
    )
}

pub fn scanner(store: &Arc<SqliteStore>) -> ArrivalScanner {
    ArrivalScanner::new(dyn_store(store), ArrivalScannerConfig::default())
}

pub fn worker(store: &Arc<SqliteStore>, kind: MissionKind) -> ResolutionWorker {
    worker_with(store, kind, Resolver::default())
}

pub fn worker_with(store: &Arc<SqliteStore>, kind: MissionKind, resolver: Resolver) -> ResolutionWorker {
    ResolutionWorker::new(
        dyn_store(store),
        Arc::new(resolver),
        kind,
        ResolutionWorkerConfig::default(),
    )
}

pub async fn garrison(store: &SqliteStore, settlement_id: &str, unit_type: &str) -> u64 {
    store
        .get_garrison(settlement_id)
        .await
        .unwrap()
        .get(unit_type)
        .copied()
        .unwrap_or(0)
}

pub async fn stockpile(store: &SqliteStore, settlement_id: &str, resource: &str) -> u64 {
    store
        .get_stockpile(settlement_id)
        .await
        .unwrap()
        .get(resource)
        .copied()
        .unwrap_or(0)
}
