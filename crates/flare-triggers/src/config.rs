//! Engine configuration.

use crate::cron::MIN_INTERVAL_SECS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trigger engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of idempotency records for event-driven firings.
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,
    /// Lifetime of idempotency records for cron ticks.
    #[serde(default = "default_idempotency_ttl")]
    pub scheduled_idempotency_ttl_secs: u64,
    /// Deadline for one call to the deployment executor.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_ms: u64,
    /// Triggers processed concurrently for one event.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_dispatches: usize,
    /// Base URL used in trigger links sent with notifications.
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    #[serde(default = "default_min_cron_interval")]
    pub min_cron_interval_secs: u64,
    /// Fire times inspected when validating a cron expression.
    #[serde(default = "default_cron_lookahead")]
    pub cron_lookahead: usize,
}

fn default_idempotency_ttl() -> u64 {
    3600
}

fn default_dispatch_timeout() -> u64 {
    60_000
}

fn default_max_concurrent() -> usize {
    16
}

fn default_portal_url() -> String {
    "https://app.flare.dev".to_string()
}

fn default_min_cron_interval() -> u64 {
    MIN_INTERVAL_SECS
}

fn default_cron_lookahead() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_secs: default_idempotency_ttl(),
            scheduled_idempotency_ttl_secs: default_idempotency_ttl(),
            dispatch_timeout_ms: default_dispatch_timeout(),
            max_concurrent_dispatches: default_max_concurrent(),
            portal_url: default_portal_url(),
            min_cron_interval_secs: default_min_cron_interval(),
            cron_lookahead: default_cron_lookahead(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.max_concurrent_dispatches = max;
        self
    }

    pub fn with_portal_url(mut self, url: impl Into<String>) -> Self {
        self.portal_url = url.into();
        self
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn scheduled_idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.scheduled_idempotency_ttl_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}
