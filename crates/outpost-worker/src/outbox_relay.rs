// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that delivers outbox events to collaborators.
//!
//! Events are written in the same transaction as the state change they
//! describe. The relay reads undelivered events oldest first, hands each one
//! to the sink and marks it delivered. A failed delivery is counted and the
//! event stays pending; after `max_attempts` failures it is no longer picked
//! up and stays in the table for inspection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use outpost_core::{Outbox, Store};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::sink::EventSink;

/// Configuration for the outbox relay.
#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    /// How often to poll for pending events.
    pub poll_interval: Duration,
    /// Maximum events delivered per poll.
    pub batch_size: u32,
    /// Delivery failures after which an event is abandoned.
    pub max_attempts: u32,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            max_attempts: 10,
        }
    }
}

/// Counters from one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Events delivered and marked.
    pub delivered: usize,
    /// Events whose delivery failed this pass.
    pub failed: usize,
}

/// Background worker that drains the outbox.
pub struct OutboxRelay {
    store: Arc<dyn Store>,
    sink: Arc<dyn EventSink>,
    config: OutboxRelayConfig,
    shutdown: Arc<Notify>,
}

impl OutboxRelay {
    /// Create a relay delivering to `sink`.
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn EventSink>, config: OutboxRelayConfig) -> Self {
        Self {
            store,
            sink,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the relay loop until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Outbox relay started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Outbox relay received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.relay_once(Utc::now()).await {
                        error!(error = %e, "Failed to relay outbox events");
                    }
                }
            }
        }

        // Flush what the last resolutions wrote.
        if let Err(e) = self.relay_once(Utc::now()).await {
            error!(error = %e, "Failed to flush outbox on shutdown");
        }

        info!("Outbox relay stopped");
    }

    /// Deliver one batch of pending events.
    pub async fn relay_once(&self, now: DateTime<Utc>) -> Result<RelayReport> {
        let events = self
            .store
            .pending_events(self.config.batch_size, self.config.max_attempts)
            .await?;
        let mut report = RelayReport::default();

        for event in &events {
            match self.sink.deliver(event).await {
                Ok(()) => {
                    self.store.mark_delivered(event.id, now).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    let message = e.to_string();
                    self.store.record_delivery_failure(event.id, &message).await?;
                    if event.attempts + 1 >= self.config.max_attempts {
                        error!(
                            event_id = event.id,
                            event_type = %event.event_type,
                            attempts = event.attempts + 1,
                            error = %message,
                            "Giving up on outbox event"
                        );
                    } else {
                        warn!(
                            event_id = event.id,
                            event_type = %event.event_type,
                            error = %message,
                            "Outbox delivery failed, will retry"
                        );
                    }
                }
            }
        }

        if !events.is_empty() {
            debug!(
                delivered = report.delivered,
                failed = report.failed,
                "Outbox relay pass complete"
            );
        }
        Ok(report)
    }
}
