//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::Priority;

/// Rejected scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max-concurrent must be at least 1")]
    ZeroConcurrency,

    #[error("max-requests-per-window must be at least 1")]
    ZeroRequestsPerWindow,

    #[error("rate-window-ms must be at least 1")]
    ZeroRateWindow,
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max tasks running at once
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// Max admissions per rate window
    #[serde(rename = "max-requests-per-window")]
    pub max_requests_per_window: usize,

    /// Rate limit window width in milliseconds
    #[serde(rename = "rate-window-ms")]
    pub rate_window_ms: u64,

    /// Priority used by `Scheduler::submit`
    #[serde(rename = "default-priority")]
    pub default_priority: Priority,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_requests_per_window: 100,
            rate_window_ms: 60_000,
            default_priority: Priority::Normal,
        }
    }
}

impl SchedulerConfig {
    /// Get the rate window as a Duration
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    /// Reject limits that would stall every submission
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_requests_per_window == 0 {
            return Err(ConfigError::ZeroRequestsPerWindow);
        }
        if self.rate_window_ms == 0 {
            return Err(ConfigError::ZeroRateWindow);
        }
        Ok(())
    }
}
