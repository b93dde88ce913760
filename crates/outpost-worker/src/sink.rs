// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery targets for outbox events.
//!
//! | Sink | Consumes | Effect |
//! |------|----------|--------|
//! | [`PushSink`] | every event | structured log line keyed by player |
//! | [`MailboxSink`] | player-facing mission events | human-readable summary per player |
//! | [`LedgerSink`] | `economy.credit` | stockpile credit, applied once per event |
//! | [`FanoutSink`] | every event | forwards to each inner sink |
//!
//! Delivery is at least once: the relay redelivers an event until every sink
//! accepted it, so sinks must tolerate duplicates.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use outpost_core::{MissionStore, OutboxEvent};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resolver::events;

/// A collaborator that accepts outbox events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. An error leaves the event pending for the next poll.
    async fn deliver(&self, event: &OutboxEvent) -> Result<()>;
}

/// Real-time push channel.
///
/// Emits each event as a structured `info!` line carrying the recipient and
/// payload; a transport subscriber picks them up from there.
#[derive(Debug, Default, Clone, Copy)]
pub struct PushSink;

#[async_trait]
impl EventSink for PushSink {
    async fn deliver(&self, event: &OutboxEvent) -> Result<()> {
        info!(
            target: "outpost::push",
            event_id = event.id,
            recipient_id = event.recipient_id.as_deref().unwrap_or("*"),
            event_type = %event.event_type,
            payload = %event.payload,
            "Push event"
        );
        Ok(())
    }
}

/// One mailbox entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    /// Outbox event this entry came from.
    pub event_id: i64,
    /// Event type.
    pub event_type: String,
    /// Human-readable summary.
    pub summary: String,
}

/// Mailbox for offline players.
///
/// Keeps summaries in memory, one inbox per player. Redelivered events are
/// recognized by ID and stored once.
#[derive(Debug, Default)]
pub struct MailboxSink {
    inboxes: Mutex<HashMap<String, Vec<MailboxEntry>>>,
}

impl MailboxSink {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries for `player_id`, oldest first.
    pub async fn inbox(&self, player_id: &str) -> Vec<MailboxEntry> {
        self.inboxes
            .lock()
            .await
            .get(player_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MailboxSink {
    async fn deliver(&self, event: &OutboxEvent) -> Result<()> {
        let Some(recipient) = &event.recipient_id else {
            return Ok(());
        };
        let Some(summary) = summarize(event) else {
            return Ok(());
        };

        let mut inboxes = self.inboxes.lock().await;
        let inbox = inboxes.entry(recipient.clone()).or_default();
        if inbox.iter().any(|entry| entry.event_id == event.id) {
            return Ok(());
        }
        inbox.push(MailboxEntry {
            event_id: event.id,
            event_type: event.event_type.clone(),
            summary,
        });
        Ok(())
    }
}

/// Human-readable summary of a player-facing event.
///
/// Returns `None` for events that do not go to the mailbox.
pub fn summarize(event: &OutboxEvent) -> Option<String> {
    let p = &event.payload;
    let text = |key: &str| p.get(key).and_then(|v| v.as_str()).unwrap_or("?").to_string();
    let target = || {
        let t = p.get("target");
        let id = t.and_then(|t| t.get("id")).and_then(|v| v.as_str());
        let kind = t.and_then(|t| t.get("type")).and_then(|v| v.as_str());
        match (kind, id) {
            (Some(kind), Some(id)) => format!("{} {}", kind, id),
            _ => "its target".to_string(),
        }
    };

    let summary = match event.event_type.as_str() {
        events::MISSION_RESOLVED => {
            let lost = count_units(p.pointer("/attacker/lost"));
            let survived = count_units(p.pointer("/attacker/survived"));
            let mut line = format!(
                "Your {} mission against {} ended in {}. {} units returned, {} lost.",
                text("kind"),
                target(),
                text("outcome"),
                survived,
                lost,
            );
            let loot = resource_list(p.pointer("/loot/resources"));
            if !loot.is_empty() {
                line.push_str(&format!(" Loot: {}.", loot));
            }
            line
        }
        events::MISSION_FAILED => format!(
            "Your {} mission against {} failed: {}. Everything it carried was sent home.",
            text("kind"),
            target(),
            text("reason"),
        ),
        events::MISSION_CANCELLED => format!(
            "Your {} mission from {} was cancelled. Half of what it carried was refunded.",
            text("kind"),
            text("origin_id"),
        ),
        events::SETTLEMENT_ATTACKED => format!(
            "{} raided {} and the attack ended in {} for them. {} defenders fell.",
            text("attacker_id"),
            text("settlement_id"),
            text("outcome"),
            count_units(p.pointer("/defender/lost")),
        ),
        events::SPY_DETECTED => format!(
            "Spies from {} were caught at {}. {} were captured.",
            text("spy_owner_id"),
            text("settlement_id"),
            p.get("spies_caught").and_then(|v| v.as_u64()).unwrap_or(0),
        ),
        events::BOSS_ATTEMPT => format!(
            "Your attack on {} dealt {} damage and reached phase {}. Outcome: {}.",
            text("encounter_id"),
            p.get("damage_dealt").and_then(|v| v.as_u64()).unwrap_or(0),
            p.get("phase_reached").and_then(|v| v.as_u64()).unwrap_or(1),
            text("outcome"),
        ),
        _ => return None,
    };
    Some(summary)
}

fn count_units(force: Option<&serde_json::Value>) -> u64 {
    force
        .and_then(|f| f.as_object())
        .map(|units| units.values().filter_map(|v| v.as_u64()).sum())
        .unwrap_or(0)
}

fn resource_list(resources: Option<&serde_json::Value>) -> String {
    resources
        .and_then(|r| r.as_object())
        .map(|r| {
            r.iter()
                .filter_map(|(name, amount)| amount.as_u64().map(|a| format!("{} {}", a, name)))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct CreditPayload {
    settlement_id: String,
    resources: BTreeMap<String, u64>,
}

/// Economy collaborator backed by the store's stockpiles.
pub struct LedgerSink<S: MissionStore + ?Sized> {
    store: Arc<S>,
}

impl<S: MissionStore + ?Sized> LedgerSink<S> {
    /// Create a ledger over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: MissionStore + ?Sized> EventSink for LedgerSink<S> {
    async fn deliver(&self, event: &OutboxEvent) -> Result<()> {
        if event.event_type != events::ECONOMY_CREDIT {
            return Ok(());
        }
        let credit: CreditPayload = serde_json::from_value(event.payload.clone())?;

        let applied = self
            .store
            .credit_stockpile(event.id, &credit.settlement_id, &credit.resources)
            .await?;
        if applied {
            info!(
                event_id = event.id,
                settlement_id = %credit.settlement_id,
                resources = ?credit.resources,
                "Stockpile credited"
            );
        } else {
            debug!(event_id = event.id, "Credit already applied");
        }
        Ok(())
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn deliver(&self, event: &OutboxEvent) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(event).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Delivery(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: i64, event_type: &str, payload: serde_json::Value) -> OutboxEvent {
        OutboxEvent {
            id,
            recipient_id: Some("alice".to_string()),
            event_type: event_type.to_string(),
            payload,
            created_at: Utc::now(),
            attempts: 0,
        }
    }

    #[test]
    fn test_summarize_resolved_mission() {
        let e = event(
            1,
            events::MISSION_RESOLVED,
            json!({
                "kind": "attack",
                "target": { "type": "settlement", "id": "enemy" },
                "outcome": "victory",
                "attacker": {
                    "sent": { "infantry": 100 },
                    "lost": { "infantry": 5 },
                    "survived": { "infantry": 95 },
                },
                "loot": { "resources": { "gold": 120, "wood": 40 }, "items": [] },
            }),
        );
        assert_eq!(
            summarize(&e).unwrap(),
            "Your attack mission against settlement enemy ended in victory. \
             95 units returned, 5 lost. Loot: 120 gold, 40 wood."
        );
    }

    #[test]
    fn test_summarize_skips_internal_events() {
        let e = event(2, events::ECONOMY_CREDIT, json!({ "settlement_id": "home" }));
        assert!(summarize(&e).is_none());
    }

    #[tokio::test]
    async fn test_mailbox_dedupes_redelivery() {
        let mailbox = MailboxSink::new();
        let e = event(
            7,
            events::SPY_DETECTED,
            json!({ "spy_owner_id": "bob", "settlement_id": "home", "spies_caught": 3 }),
        );
        mailbox.deliver(&e).await.unwrap();
        mailbox.deliver(&e).await.unwrap();

        let inbox = mailbox.inbox("alice").await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].summary, "Spies from bob were caught at home. 3 were captured.");
        assert!(mailbox.inbox("bob").await.is_empty());
    }

    struct Broken;

    #[async_trait]
    impl EventSink for Broken {
        async fn deliver(&self, _event: &OutboxEvent) -> Result<()> {
            Err(Error::Delivery("socket closed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_all_and_reports_failures() {
        let mailbox = Arc::new(MailboxSink::new());
        let fanout = FanoutSink::new()
            .with(Arc::new(Broken))
            .with(mailbox.clone());

        let e = event(
            3,
            events::MISSION_FAILED,
            json!({ "kind": "convoy", "reason": "destination is no longer settled" }),
        );
        let err = fanout.deliver(&e).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("socket closed"));
        assert_eq!(mailbox.inbox("alice").await.len(), 1);
    }
}
