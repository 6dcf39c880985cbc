//! Engine configuration.
//!
//! Defaults are deliberately small: stage handlers are continuation-style
//! and return as soon as they have issued their outbound action, so a
//! handful of workers drains a deep queue.

use crate::error::{EngineError, Result};
use std::collections::HashMap;

/// Sizing for one bounded worker pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum number of jobs executing concurrently.
    pub workers: usize,
    /// Maximum number of queued jobs waiting for a worker.
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 1024,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pool executing stage dispatches.
    pub stage_pool: PoolConfig,
    /// Pool executing fire-and-forget side-effect jobs (remote
    /// notifications, upcall audit records).
    pub aux_pool: PoolConfig,
    /// Additional named pools; task types can be routed onto one of these
    /// via `pool_overrides` to isolate noisy workloads.
    pub dedicated_pools: HashMap<String, PoolConfig>,
    /// Task name to dedicated pool name.
    pub pool_overrides: HashMap<String, String>,
    /// Remote notification retries after the first attempt.
    pub notify_retries: u32,
    /// Per-attempt remote notification timeout in milliseconds.
    pub notify_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stage_pool: PoolConfig::default(),
            aux_pool: PoolConfig::default(),
            dedicated_pools: HashMap::new(),
            pool_overrides: HashMap::new(),
            notify_retries: 5,
            notify_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("STAGEHAND_STAGE_WORKERS") {
            config.stage_pool.workers = parse_env("STAGEHAND_STAGE_WORKERS", &v)?;
        }
        if let Ok(v) = std::env::var("STAGEHAND_STAGE_QUEUE_DEPTH") {
            config.stage_pool.queue_depth = parse_env("STAGEHAND_STAGE_QUEUE_DEPTH", &v)?;
        }
        if let Ok(v) = std::env::var("STAGEHAND_AUX_WORKERS") {
            config.aux_pool.workers = parse_env("STAGEHAND_AUX_WORKERS", &v)?;
        }
        if let Ok(v) = std::env::var("STAGEHAND_AUX_QUEUE_DEPTH") {
            config.aux_pool.queue_depth = parse_env("STAGEHAND_AUX_QUEUE_DEPTH", &v)?;
        }
        if let Ok(v) = std::env::var("STAGEHAND_NOTIFY_RETRIES") {
            config.notify_retries = parse_env("STAGEHAND_NOTIFY_RETRIES", &v)?;
        }
        if let Ok(v) = std::env::var("STAGEHAND_NOTIFY_TIMEOUT_MS") {
            config.notify_timeout_ms = parse_env("STAGEHAND_NOTIFY_TIMEOUT_MS", &v)?;
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| EngineError::Configuration(format!("invalid {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.stage_pool.workers, 4);
        assert_eq!(config.stage_pool.queue_depth, 1024);
        assert_eq!(config.notify_retries, 5);
    }

    // One test owns the process environment; splitting these up would
    // race with the parallel test runner.
    #[test]
    fn env_overrides_and_rejects_garbage() {
        std::env::set_var("STAGEHAND_STAGE_WORKERS", "8");
        std::env::set_var("STAGEHAND_NOTIFY_RETRIES", "2");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.stage_pool.workers, 8);
        assert_eq!(config.notify_retries, 2);

        std::env::set_var("STAGEHAND_AUX_WORKERS", "not-a-number");
        assert!(EngineConfig::from_env().is_err());

        std::env::remove_var("STAGEHAND_STAGE_WORKERS");
        std::env::remove_var("STAGEHAND_NOTIFY_RETRIES");
        std::env::remove_var("STAGEHAND_AUX_WORKERS");
    }
}
