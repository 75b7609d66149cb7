use std::time::Duration;

use crate::jobs::{BackoffConfig, DEFAULT_MAX_ATTEMPTS};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

// Runtime configuration, read once from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub worker_id: String,
    pub worker_concurrency: usize,
    pub lease_seconds: u64,
    pub reap_interval_ms: u64,
    pub reap_batch_size: i64,
    pub poll_interval_ms: u64,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub default_max_attempts: i32,
    pub backoff: BackoffConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match env_or_fallback("LEASEFLOW_STORE", "STORE")
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            None | Some("postgres") | Some("pg") => StoreBackend::Postgres,
            Some("memory") | Some("mem") => StoreBackend::Memory,
            Some(other) => anyhow::bail!("unknown store backend: {other}"),
        };

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());
        if backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is missing");
        }

        let worker_id = env_or_fallback("LEASEFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let worker_concurrency = env_parse("LEASEFLOW_WORKER_CONCURRENCY", "WORKER_CONCURRENCY")
            .unwrap_or(1usize)
            .clamp(1, 256);

        let lease_seconds = env_parse("LEASEFLOW_LEASE_SECONDS", "LEASE_SECONDS").unwrap_or(300);

        let reap_interval_ms =
            env_parse("LEASEFLOW_REAP_INTERVAL_MS", "REAP_INTERVAL_MS").unwrap_or(5_000);

        let reap_batch_size = env_parse("LEASEFLOW_REAP_BATCH_SIZE", "REAP_BATCH_SIZE")
            .unwrap_or(500i64)
            .clamp(1, 10_000);

        let poll_interval_ms =
            env_parse("LEASEFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS").unwrap_or(250);

        let admin_addr = env_or_fallback("LEASEFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("LEASEFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let default_max_attempts =
            env_parse("LEASEFLOW_DEFAULT_MAX_ATTEMPTS", "DEFAULT_MAX_ATTEMPTS")
                .unwrap_or(DEFAULT_MAX_ATTEMPTS)
                .max(1);

        let defaults = BackoffConfig::default();
        let backoff = BackoffConfig {
            base_seconds: env_parse("LEASEFLOW_BACKOFF_BASE_SECONDS", "BACKOFF_BASE_SECONDS")
                .unwrap_or(defaults.base_seconds),
            max_seconds: env_parse("LEASEFLOW_BACKOFF_MAX_SECONDS", "BACKOFF_MAX_SECONDS")
                .unwrap_or(defaults.max_seconds),
            jitter_pct: env_parse("LEASEFLOW_BACKOFF_JITTER_PCT", "BACKOFF_JITTER_PCT")
                .unwrap_or(defaults.jitter_pct),
        };
        backoff.validate()?;

        Ok(Self {
            backend,
            database_url,
            worker_id,
            worker_concurrency,
            lease_seconds,
            reap_interval_ms,
            reap_batch_size,
            poll_interval_ms,
            admin_addr,
            migrate_on_startup,
            default_max_attempts,
            backoff,
        })
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(primary: &str, fallback: &str) -> Option<T> {
    env_or_fallback(primary, fallback).and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_admin_addr_spellings_normalize_to_none() {
        assert_eq!(normalize_optional_addr("  "), None);
        assert_eq!(normalize_optional_addr("off"), None);
        assert_eq!(normalize_optional_addr("NONE"), None);
        assert_eq!(
            normalize_optional_addr(" 0.0.0.0:8080 "),
            Some("0.0.0.0:8080".to_string())
        );
    }
}
