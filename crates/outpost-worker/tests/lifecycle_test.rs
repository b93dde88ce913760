// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end mission lifecycle tests: create, scan, resolve, relay.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use common::{at, dyn_store, force, garrison, scanner, scheduler, stockpile, test_store, worker};
use outpost_combat::{SpyObjective, Tactic};
use outpost_core::{
    JobQueue, JobStatus, MissionKind, MissionPayload, MissionRequest, MissionStatus, MissionStore,
    Outbox, SettlementRecord, Target,
};
use outpost_worker::resolver::events;
use outpost_worker::{
    FanoutSink, JobOutcome, LedgerSink, MailboxSink, OutboxRelay, OutboxRelayConfig,
};

fn request(target: Target, payload: MissionPayload) -> MissionRequest {
    MissionRequest {
        actor_id: "alice".to_string(),
        origin_id: "home".to_string(),
        target,
        payload,
    }
}

#[tokio::test]
async fn test_attack_lifecycle() {
    let store = test_store().await;
    let missions = scheduler(&store, &[]);

    let mission = missions
        .create_mission(
            request(
                Target::Settlement("enemy".to_string()),
                MissionPayload::Attack {
                    units: force(&[("infantry", 100)]),
                    tactic: Tactic::Balanced,
                },
            ),
            at(0),
        )
        .await
        .unwrap();
    assert_eq!(mission.arrival_at, at(60 + 12_600));
    assert_eq!(garrison(&store, "home", "infantry").await, 0);

    // Nothing is due yet
    let report = scanner(&store).scan(at(600)).await.unwrap();
    assert_eq!(report.due, 0);
    assert!(worker(&store, MissionKind::Attack).process_next(at(600)).await.unwrap().is_none());

    let report = scanner(&store).scan(mission.arrival_at).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.claimed, 1);
    assert_eq!(report.enqueued, 1);

    let attack_worker = worker(&store, MissionKind::Attack);
    let outcome = attack_worker.process_next(mission.arrival_at).await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Resolved(MissionStatus::Resolved)));

    let record = store.get_mission(mission.id).await.unwrap().unwrap();
    assert_eq!(record.status, MissionStatus::Resolved);
    assert_eq!(record.finished_at, Some(mission.arrival_at));

    // 100 vs 50 infantry stays above the 1.5 band under any variance roll
    let stored = store.get_result(mission.id).await.unwrap().unwrap();
    assert_eq!(stored.outcome.as_deref(), Some("victory"));
    assert_eq!(stored.result["combat"]["attacker"]["survived"]["infantry"], 95);
    assert_eq!(garrison(&store, "home", "infantry").await, 95);

    let defenders_lost = stored.result["combat"]["defender"]["lost"]["infantry"]
        .as_u64()
        .unwrap();
    assert!(defenders_lost > 0);
    assert_eq!(garrison(&store, "enemy", "infantry").await, 50 - defenders_lost);

    let job = store.get_job(&mission.id.to_string()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(attack_worker.process_next(mission.arrival_at).await.unwrap().is_none());

    let pending = store.pending_events(10, 5).await.unwrap();
    let types: Vec<&str> = pending.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![events::MISSION_RESOLVED, events::SETTLEMENT_ATTACKED, events::ECONOMY_CREDIT]
    );
    assert_eq!(pending[1].recipient_id.as_deref(), Some("bob"));
    let loot_gold = stored.result["combat"]["loot"]["resources"]["gold"].as_u64().unwrap();

    // Relay credits the loot and fills both mailboxes
    let mailbox = Arc::new(MailboxSink::new());
    let sink = FanoutSink::new()
        .with(mailbox.clone())
        .with(Arc::new(LedgerSink::new(store.clone())));
    let relay = OutboxRelay::new(dyn_store(&store), Arc::new(sink), OutboxRelayConfig::default());
    let report = relay.relay_once(mission.arrival_at).await.unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 0);
    assert!(store.pending_events(10, 5).await.unwrap().is_empty());

    assert_eq!(stockpile(&store, "home", "gold").await, 1000 + loot_gold);
    assert_eq!(mailbox.inbox("alice").await.len(), 1);
    assert!(mailbox.inbox("alice").await[0].summary.contains("ended in victory"));
    assert_eq!(mailbox.inbox("bob").await.len(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_resolves_once() {
    let store = test_store().await;
    let missions = scheduler(&store, &[]);
    let mission = missions
        .create_mission(
            request(
                Target::Settlement("enemy".to_string()),
                MissionPayload::Attack {
                    units: force(&[("infantry", 40)]),
                    tactic: Tactic::Defensive,
                },
            ),
            at(0),
        )
        .await
        .unwrap();
    let arrival = mission.arrival_at;

    // Two scanners racing on the same tick
    let (scanner_a, scanner_b) = (scanner(&store), scanner(&store));
    let (a, b) = tokio::join!(scanner_a.scan(arrival), scanner_b.scan(arrival));
    assert_eq!(a.unwrap().claimed + b.unwrap().claimed, 1);

    let resolver = outpost_worker::Resolver::default();
    let arrived = store.get_mission(mission.id).await.unwrap().unwrap();
    assert_eq!(arrived.status, MissionStatus::Arrived);

    // A first delivery commits, the queued job then finds nothing to do
    let resolution = resolver.resolve(store.as_ref(), &arrived, arrival).await.unwrap();
    assert!(store.commit_resolution(&resolution, arrival).await.unwrap().is_applied());
    let outcome = worker(&store, MissionKind::Attack).process_next(arrival).await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::AlreadyFinished));

    // Replaying the commit is a lost race, not a second resolution
    let again = resolver.resolve(store.as_ref(), &arrived, arrival).await.unwrap();
    assert_eq!(again.seed, resolution.seed);
    assert!(!store.commit_resolution(&again, arrival).await.unwrap().is_applied());

    let pending = store.pending_events(10, 5).await.unwrap();
    let resolved = pending
        .iter()
        .filter(|e| e.event_type == events::MISSION_RESOLVED)
        .count();
    assert_eq!(resolved, 1);
}

#[tokio::test]
async fn test_direct_dispatch_expedition_clears_portal() {
    let store = test_store().await;
    let missions = scheduler(&store, &[MissionKind::Expedition]);

    let mission = missions
        .create_mission(
            request(
                Target::Portal("gate".to_string()),
                MissionPayload::Expedition {
                    units: force(&[("infantry", 20)]),
                    tactic: Tactic::Balanced,
                },
            ),
            at(0),
        )
        .await
        .unwrap();
    assert_eq!(mission.arrival_at, at(60));

    let expedition = worker(&store, MissionKind::Expedition);
    assert!(expedition.process_next(at(30)).await.unwrap().is_none());

    // The worker claims arrival itself; no scan needed
    let outcome = expedition.process_next(at(60)).await.unwrap();
    assert_eq!(outcome, Some(JobOutcome::Resolved(MissionStatus::Resolved)));

    let portal = store.get_portal("gate").await.unwrap().unwrap();
    assert!(!portal.active);
    assert_eq!(portal.cleared_by.as_deref(), Some("alice"));
    assert_eq!(garrison(&store, "home", "infantry").await, 80 + 19);

    // A scan afterwards has nothing left to claim
    let report = scanner(&store).scan(at(61)).await.unwrap();
    assert_eq!(report.due, 0);
    assert_eq!(report.stranded, 0);
}

#[tokio::test]
async fn test_scan_before_direct_job_reports_duplicate() {
    let store = test_store().await;
    let missions = scheduler(&store, &[MissionKind::Expedition]);
    let mission = missions
        .create_mission(
            request(
                Target::Portal("gate".to_string()),
                MissionPayload::Expedition {
                    units: force(&[("infantry", 20)]),
                    tactic: Tactic::Aggressive,
                },
            ),
            at(0),
        )
        .await
        .unwrap();

    let report = scanner(&store).scan(mission.arrival_at).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.duplicates, 1);

    let outcome = worker(&store, MissionKind::Expedition)
        .process_next(mission.arrival_at)
        .await
        .unwrap();
    assert_eq!(outcome, Some(JobOutcome::Resolved(MissionStatus::Resolved)));
}

#[tokio::test]
async fn test_early_job_is_rescheduled_to_arrival() {
    let store = test_store().await;
    let missions = scheduler(&store, &[]);
    let mission = missions
        .create_mission(
            request(
                Target::Settlement("enemy".to_string()),
                MissionPayload::Spy {
                    spies: 10,
                    objective: SpyObjective::Reconnaissance,
                },
            ),
            at(0),
        )
        .await
        .unwrap();
    assert_eq!(mission.arrival_at, at(60 + 6_300));

    store
        .enqueue(mission.id, at(0), &Default::default(), at(0))
        .await
        .unwrap();

    let spy = worker(&store, MissionKind::Spy);
    assert_eq!(
        spy.process_next(at(10)).await.unwrap(),
        Some(JobOutcome::Rescheduled)
    );

    let job = store.get_job(&mission.id.to_string()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.run_at, mission.arrival_at);
    assert_eq!(job.attempts, 0);

    assert!(spy.process_next(at(20)).await.unwrap().is_none());
    assert_eq!(
        spy.process_next(mission.arrival_at).await.unwrap(),
        Some(JobOutcome::Resolved(MissionStatus::Resolved))
    );

    let stored = store.get_result(mission.id).await.unwrap().unwrap();
    let survived = stored.result["combat"]["attacker"]["survived"]["spy"]
        .as_u64()
        .unwrap_or(0);
    assert_eq!(garrison(&store, "home", "spy").await, 10 + survived);

    let detected = stored.result["detected"].as_bool().unwrap();
    let warned = store
        .pending_events(10, 5)
        .await
        .unwrap()
        .into_iter()
        .any(|e| e.event_type == events::SPY_DETECTED && e.recipient_id.as_deref() == Some("bob"));
    assert_eq!(detected, warned);
}

#[tokio::test]
async fn test_colonization_settles_free_slot() {
    let store = test_store().await;
    let missions = scheduler(&store, &[]);
    let mission = missions
        .create_mission(
            request(
                Target::Settlement("free".to_string()),
                MissionPayload::Colonization { colonists: 5 },
            ),
            at(0),
        )
        .await
        .unwrap();

    scanner(&store).scan(mission.arrival_at).await.unwrap();
    let outcome = worker(&store, MissionKind::Colonization)
        .process_next(mission.arrival_at)
        .await
        .unwrap();
    assert_eq!(outcome, Some(JobOutcome::Resolved(MissionStatus::Resolved)));

    let slot = store.get_settlement("free").await.unwrap().unwrap();
    assert_eq!(slot.owner_id.as_deref(), Some("alice"));
    assert_eq!(garrison(&store, "free", "colonist").await, 5);
    assert_eq!(garrison(&store, "home", "colonist").await, 5);
}

#[tokio::test]
async fn test_colonization_of_taken_slot_returns_colonists() {
    let store = test_store().await;
    let missions = scheduler(&store, &[]);
    let mission = missions
        .create_mission(
            request(
                Target::Settlement("free".to_string()),
                MissionPayload::Colonization { colonists: 4 },
            ),
            at(0),
        )
        .await
        .unwrap();

    let mut slot = store.get_settlement("free").await.unwrap().unwrap();
    slot.owner_id = Some("bob".to_string());
    store.upsert_settlement(&slot).await.unwrap();

    scanner(&store).scan(mission.arrival_at).await.unwrap();
    worker(&store, MissionKind::Colonization)
        .process_next(mission.arrival_at)
        .await
        .unwrap();

    let stored = store.get_result(mission.id).await.unwrap().unwrap();
    assert_eq!(stored.outcome.as_deref(), Some("defeat"));
    assert_eq!(garrison(&store, "home", "colonist").await, 10);
    let slot = store.get_settlement("free").await.unwrap().unwrap();
    assert_eq!(slot.owner_id.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_convoy_to_abandoned_settlement_fails_and_refunds() {
    let store = test_store().await;
    let missions = scheduler(&store, &[]);
    let mut cargo = BTreeMap::new();
    cargo.insert("gold".to_string(), 300);
    let mission = missions
        .create_mission(
            request(
                Target::Settlement("outpost".to_string()),
                MissionPayload::Convoy { cargo },
            ),
            at(0),
        )
        .await
        .unwrap();
    assert_eq!(stockpile(&store, "home", "gold").await, 700);

    store
        .upsert_settlement(&SettlementRecord {
            owner_id: None,
            ..store.get_settlement("outpost").await.unwrap().unwrap()
        })
        .await
        .unwrap();

    scanner(&store).scan(mission.arrival_at).await.unwrap();
    let outcome = worker(&store, MissionKind::Convoy)
        .process_next(mission.arrival_at)
        .await
        .unwrap();
    assert_eq!(outcome, Some(JobOutcome::Resolved(MissionStatus::Failed)));

    let record = store.get_mission(mission.id).await.unwrap().unwrap();
    assert_eq!(record.status, MissionStatus::Failed);
    assert_eq!(
        record.failure_reason.as_deref(),
        Some("destination is no longer settled")
    );

    let relay = OutboxRelay::new(
        dyn_store(&store),
        Arc::new(LedgerSink::new(store.clone())),
        OutboxRelayConfig::default(),
    );
    relay.relay_once(mission.arrival_at).await.unwrap();
    assert_eq!(stockpile(&store, "home", "gold").await, 1000);
}

#[tokio::test]
async fn test_convoy_delivers_cargo() {
    let store = test_store().await;
    let missions = scheduler(&store, &[]);
    let mut cargo = BTreeMap::new();
    cargo.insert("gold".to_string(), 250);
    let mission = missions
        .create_mission(
            request(
                Target::Settlement("outpost".to_string()),
                MissionPayload::Convoy { cargo },
            ),
            at(0),
        )
        .await
        .unwrap();

    scanner(&store).scan(mission.arrival_at).await.unwrap();
    worker(&store, MissionKind::Convoy)
        .process_next(mission.arrival_at)
        .await
        .unwrap();

    let stored = store.get_result(mission.id).await.unwrap().unwrap();
    assert_eq!(stored.outcome.as_deref(), Some("delivered"));

    let relay = OutboxRelay::new(
        dyn_store(&store),
        Arc::new(LedgerSink::new(store.clone())),
        OutboxRelayConfig::default(),
    );
    relay.relay_once(mission.arrival_at).await.unwrap();
    assert_eq!(stockpile(&store, "outpost", "gold").await, 250);
    assert_eq!(stockpile(&store, "home", "gold").await, 750);
}

#[tokio::test]
async fn test_cancelled_mission_is_not_resolved() {
    let store = test_store().await;
    let missions = scheduler(&store, &[MissionKind::Expedition]);
    let mission = missions
        .create_mission(
            request(
                Target::Portal("gate".to_string()),
                MissionPayload::Expedition {
                    units: force(&[("infantry", 20)]),
                    tactic: Tactic::Balanced,
                },
            ),
            at(0),
        )
        .await
        .unwrap();

    assert!(missions.cancel_mission(mission.id, "alice", at(30)).await.unwrap().is_applied());

    // The queued job was removed with the cancellation
    assert!(store.get_job(&mission.id.to_string()).await.unwrap().is_none());
    assert!(
        worker(&store, MissionKind::Expedition)
            .process_next(at(60) + Duration::seconds(1))
            .await
            .unwrap()
            .is_none()
    );
    let record = store.get_mission(mission.id).await.unwrap().unwrap();
    assert_eq!(record.status, MissionStatus::Cancelled);
    assert!(store.get_result(mission.id).await.unwrap().is_none());
}
