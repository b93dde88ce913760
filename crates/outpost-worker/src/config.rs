// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for outpost-worker.

use std::str::FromStr;
use std::time::Duration;

use outpost_core::{MissionGuards, MissionKind, RetryPolicy};

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL
    pub database_url: String,
    /// Arrival scan period
    pub scan_interval: Duration,
    /// Maximum due missions claimed per scan
    pub scan_batch_size: u32,
    /// Resolution workers per mission type
    pub worker_concurrency: usize,
    /// How long an idle worker waits before polling the queue again
    pub worker_poll_interval: Duration,
    /// Retry policy for resolution jobs
    pub retry_policy: RetryPolicy,
    /// Lease held by a worker on a running job
    pub job_lease: chrono::Duration,
    /// Mission types scheduled by direct dispatch instead of polling
    pub direct_dispatch: Vec<MissionKind>,
    /// Travel time floor
    pub min_travel: chrono::Duration,
    /// Cooldown and concurrency rules for mission creation
    pub guards: MissionGuards,
    /// Boss round cap
    pub boss_round_cap: u32,
    /// Trigger chance of per-round boss abilities
    pub boss_ability_chance: f64,
    /// Outbox relay poll period
    pub outbox_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:.data/outpost.db?mode=rwc".to_string(),
            scan_interval: Duration::from_secs(30),
            scan_batch_size: 100,
            worker_concurrency: 2,
            worker_poll_interval: Duration::from_millis(1000),
            retry_policy: RetryPolicy::default(),
            job_lease: chrono::Duration::seconds(120),
            direct_dispatch: vec![MissionKind::Expedition],
            min_travel: chrono::Duration::seconds(60),
            guards: MissionGuards::default(),
            boss_round_cap: 50,
            boss_ability_chance: 0.3,
            outbox_poll_interval: Duration::from_millis(1000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`; unset variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup("OUTPOST_DATABASE_URL").unwrap_or(defaults.database_url);

        let scan_interval = Duration::from_secs(parse(&lookup, "OUTPOST_SCAN_INTERVAL_SECS", 30u64)?);
        let scan_batch_size = parse(&lookup, "OUTPOST_SCAN_BATCH_SIZE", defaults.scan_batch_size)?;
        let worker_concurrency =
            parse(&lookup, "OUTPOST_WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        let worker_poll_interval =
            Duration::from_millis(parse(&lookup, "OUTPOST_WORKER_POLL_MS", 1000u64)?);

        let retry_policy = RetryPolicy {
            max_attempts: parse(&lookup, "OUTPOST_JOB_MAX_ATTEMPTS", 3u32)?,
            backoff: chrono::Duration::milliseconds(parse(&lookup, "OUTPOST_JOB_BACKOFF_MS", 5000i64)?),
        };
        if retry_policy.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                var: "OUTPOST_JOB_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let job_lease = chrono::Duration::seconds(parse(&lookup, "OUTPOST_JOB_LEASE_SECS", 120i64)?);

        let direct_dispatch = match lookup("OUTPOST_DIRECT_DISPATCH") {
            Some(list) => parse_kinds(&list)?,
            None => defaults.direct_dispatch,
        };

        let min_travel = chrono::Duration::seconds(parse(&lookup, "OUTPOST_MIN_TRAVEL_SECS", 60i64)?);
        let guards = MissionGuards {
            attack_cooldown: chrono::Duration::seconds(parse(
                &lookup,
                "OUTPOST_ATTACK_COOLDOWN_SECS",
                3600i64,
            )?),
            ..defaults.guards
        };

        let boss_round_cap = parse(&lookup, "OUTPOST_BOSS_ROUND_CAP", defaults.boss_round_cap)?;
        let boss_ability_chance =
            parse(&lookup, "OUTPOST_BOSS_ABILITY_CHANCE", defaults.boss_ability_chance)?;
        if !(0.0..=1.0).contains(&boss_ability_chance) {
            return Err(ConfigError::InvalidValue {
                var: "OUTPOST_BOSS_ABILITY_CHANCE",
                value: boss_ability_chance.to_string(),
            });
        }

        let outbox_poll_interval =
            Duration::from_millis(parse(&lookup, "OUTPOST_OUTBOX_POLL_MS", 1000u64)?);

        Ok(Self {
            database_url,
            scan_interval,
            scan_batch_size,
            worker_concurrency,
            worker_poll_interval,
            retry_policy,
            job_lease,
            direct_dispatch,
            min_travel,
            guards,
            boss_round_cap,
            boss_ability_chance,
            outbox_poll_interval,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

fn parse_kinds(list: &str) -> Result<Vec<MissionKind>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<MissionKind>()
                .map_err(|_| ConfigError::UnknownMissionKind(name.to_string()))
        })
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// A mission type name is not recognized.
    #[error("Unknown mission type: {0}")]
    UnknownMissionKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, "sqlite:.data/outpost.db?mode=rwc");
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.scan_batch_size, 100);
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.retry_policy.max_attempts, 3);
        assert_eq!(config.retry_policy.backoff, chrono::Duration::seconds(5));
        assert_eq!(config.direct_dispatch, vec![MissionKind::Expedition]);
        assert_eq!(config.boss_round_cap, 50);
        assert_eq!(config.guards.attack_cooldown, chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("OUTPOST_DATABASE_URL", "sqlite:/tmp/test.db"),
            ("OUTPOST_SCAN_INTERVAL_SECS", "5"),
            ("OUTPOST_WORKER_CONCURRENCY", "4"),
            ("OUTPOST_JOB_BACKOFF_MS", "250"),
            ("OUTPOST_DIRECT_DISPATCH", "attack, spy"),
            ("OUTPOST_BOSS_ABILITY_CHANCE", "0.5"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite:/tmp/test.db");
        assert_eq!(config.scan_interval, Duration::from_secs(5));
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.retry_policy.backoff, chrono::Duration::milliseconds(250));
        assert_eq!(config.direct_dispatch, vec![MissionKind::Attack, MissionKind::Spy]);
        assert_eq!(config.boss_ability_chance, 0.5);
    }

    #[test]
    fn test_empty_direct_dispatch_means_poll_only() {
        let config = Config::from_lookup(lookup(&[("OUTPOST_DIRECT_DISPATCH", "")])).unwrap();
        assert!(config.direct_dispatch.is_empty());
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[("OUTPOST_SCAN_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "OUTPOST_SCAN_BATCH_SIZE", .. }));

        let err = Config::from_lookup(lookup(&[("OUTPOST_DIRECT_DISPATCH", "teleport")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMissionKind(_)));

        let err = Config::from_lookup(lookup(&[("OUTPOST_BOSS_ABILITY_CHANCE", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = Config::from_lookup(lookup(&[("OUTPOST_JOB_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
