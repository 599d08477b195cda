//! Process configuration from the environment.
//!
//! `from_env` loads `.env` (when present) and reads the process environment;
//! `from_lookup` takes any key lookup so parsing can be tested without
//! touching the environment.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use tracker_bus::MalformedPolicy;
use tracker_scheduler::StaleSamples;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Redis Streams broker and Redis sample store.
    Redis,
    /// In-process broker and store; state is lost on exit.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend {other:?} (expected redis or memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: Backend,
    pub broker_url: String,
    pub queue: String,
    pub group: String,
    pub consumer: String,
    pub dead_letter_queue: String,
    pub reconnect_interval: Duration,
    pub malformed: MalformedPolicy,
    pub stale_samples: StaleSamples,
    pub store_url: String,
    pub result_ttl: Duration,
    pub max_workers: usize,
    pub use_http: bool,
    pub http_host: String,
    pub http_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err).context("failed to load .env");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let queue = var("TRACKER_QUEUE").unwrap_or_else(|| "smartbrain".to_string());
        let dead_letter_queue =
            var("TRACKER_DEAD_LETTER_QUEUE").unwrap_or_else(|| format!("{queue}:dlq"));

        let max_workers: usize = parse(&var, "TRACKER_MAX_WORKERS", 2)?;
        if max_workers == 0 {
            bail!("TRACKER_MAX_WORKERS must be greater than zero");
        }

        let reconnect_ms: u64 = parse(&var, "TRACKER_RECONNECT_INTERVAL_MS", 5_000)?;
        let result_ttl_secs: u64 = parse(&var, "TRACKER_RESULT_TTL_SECS", 3_600)?;

        Ok(Self {
            backend: parse(&var, "TRACKER_BACKEND", Backend::Redis)?,
            broker_url: var("BROKER_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            group: var("TRACKER_GROUP").unwrap_or_else(|| "tracker".to_string()),
            consumer: var("TRACKER_CONSUMER").unwrap_or_else(|| "tracker-1".to_string()),
            queue,
            dead_letter_queue,
            reconnect_interval: Duration::from_millis(reconnect_ms),
            malformed: parse(&var, "TRACKER_MALFORMED_POLICY", MalformedPolicy::Leave)?,
            stale_samples: parse(&var, "TRACKER_STALE_SAMPLES", StaleSamples::Keep)?,
            store_url: var("STORE_URL").unwrap_or_else(|| "redis://127.0.0.1:6379/0".to_string()),
            result_ttl: Duration::from_secs(result_ttl_secs),
            max_workers,
            use_http: parse(&var, "USE_HTTP", false)?,
            http_host: var("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port: parse(&var, "HTTP_PORT", 8080)?,
        })
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|err: T::Err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("invalid {key}={raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = config(&[]).unwrap();
        assert_eq!(config.backend, Backend::Redis);
        assert_eq!(config.queue, "smartbrain");
        assert_eq!(config.dead_letter_queue, "smartbrain:dlq");
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.result_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.malformed, MalformedPolicy::Leave);
        assert_eq!(config.stale_samples, StaleSamples::Keep);
        assert!(!config.use_http);
        assert_eq!(config.http_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("TRACKER_BACKEND", "memory"),
            ("TRACKER_QUEUE", "jobs"),
            ("TRACKER_MALFORMED_POLICY", "dead-letter"),
            ("TRACKER_STALE_SAMPLES", "discard"),
            ("TRACKER_MAX_WORKERS", "8"),
            ("USE_HTTP", "true"),
            ("HTTP_PORT", "9000"),
        ])
        .unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.dead_letter_queue, "jobs:dlq");
        assert_eq!(config.malformed, MalformedPolicy::DeadLetter);
        assert_eq!(config.stale_samples, StaleSamples::Discard);
        assert_eq!(config.max_workers, 8);
        assert!(config.use_http);
        assert_eq!(config.http_port, 9000);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config(&[("TRACKER_QUEUE", "  "), ("HTTP_PORT", "")]).unwrap();
        assert_eq!(config.queue, "smartbrain");
        assert_eq!(config.http_port, 8080);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(config(&[("TRACKER_MAX_WORKERS", "0")]).is_err());
        assert!(config(&[("TRACKER_MAX_WORKERS", "many")]).is_err());
        assert!(config(&[("HTTP_PORT", "70000")]).is_err());
        assert!(config(&[("TRACKER_BACKEND", "rabbit")]).is_err());

        let err = config(&[("USE_HTTP", "yes")]).unwrap_err();
        assert!(format!("{err:#}").contains("USE_HTTP"));
    }
}
