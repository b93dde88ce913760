// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outpost Worker - standalone process
//!
//! Runs the arrival scanner, the resolution worker pools and the outbox relay
//! against one SQLite database until interrupted.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use outpost_core::SqliteStore;
use outpost_worker::config::Config;
use outpost_worker::runtime::WorkerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outpost_worker=info,outpost_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        database_url = %config.database_url,
        scan_interval_secs = config.scan_interval.as_secs(),
        worker_concurrency = config.worker_concurrency,
        direct_dispatch = ?config.direct_dispatch,
        "Starting Outpost Worker"
    );

    if let Some(parent) = database_dir(&config.database_url) {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Connects and runs migrations
    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    info!("Connected to database");

    let runtime = WorkerRuntime::builder()
        .config(&config)
        .store(store)
        .build()?
        .start()
        .await?;

    info!("Outpost Worker ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Outpost Worker shut down");

    Ok(())
}

/// Directory holding a file-backed SQLite database, if any.
fn database_dir(url: &str) -> Option<&Path> {
    let path = url.strip_prefix("sqlite:")?.split('?').next()?;
    let path = path.strip_prefix("//").unwrap_or(path);
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
}
