//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Task scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once.
    pub max_concurrent_tasks: usize,
    /// How long the dispatch loop sleeps when nothing wakes it.
    pub poll_interval: Duration,
    /// Capacity of the task event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            poll_interval: Duration::from_millis(100),
            event_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    /// Build from `AGENT_CORE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent_tasks: usize = std::env::var("AGENT_CORE_MAX_CONCURRENT_TASKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_concurrent_tasks);

        let poll_interval = std::env::var("AGENT_CORE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        Self {
            max_concurrent_tasks,
            poll_interval,
            ..defaults
        }
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_tasks".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "event_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Memory store configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Default capacity of each owner's store.
    pub max_entries: usize,
    /// Fraction of `max_entries` at which `store` sweeps expired entries.
    pub cleanup_threshold: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            cleanup_threshold: 0.8, // sweep when 80% full
        }
    }
}

impl MemoryConfig {
    /// Build from `AGENT_CORE_MEMORY_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_entries: usize = std::env::var("AGENT_CORE_MEMORY_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_entries);

        let cleanup_threshold: f64 = std::env::var("AGENT_CORE_MEMORY_CLEANUP_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cleanup_threshold);

        Self {
            max_entries,
            cleanup_threshold,
        }
    }

    /// Reject capacities and thresholds the store cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_entries".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(self.cleanup_threshold > 0.0 && self.cleanup_threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "cleanup_threshold".to_string(),
                message: format!("must be in (0, 1], got {}", self.cleanup_threshold),
            });
        }
        Ok(())
    }

    /// Number of held entries at which `store` sweeps expired entries.
    pub fn cleanup_trigger(&self) -> usize {
        (self.max_entries as f64 * self.cleanup_threshold).ceil() as usize
    }
}
