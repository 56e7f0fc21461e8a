//! Coordinator configuration

use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted wait phase: one day
pub const MAX_WAIT_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// When the coordinator commits with PREPARE TRANSACTION / COMMIT PREPARED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoPhaseCommitMode {
    /// Only when requested, or when more than one connection wrote
    #[default]
    Auto,
    /// For every transaction that wrote anything
    Always,
}

/// Configuration for the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Node group of this coordinator, embedded in prepared transaction names
    pub local_group_id: u32,

    /// Process id embedded in prepared transaction names
    pub process_id: u32,

    /// Upper bound on one wait phase, in milliseconds
    pub wait_timeout_ms: u64,

    pub two_phase_commit: TwoPhaseCommitMode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            local_group_id: 0,
            process_id: std::process::id(),
            wait_timeout_ms: 30_000,
            two_phase_commit: TwoPhaseCommitMode::Auto,
        }
    }
}

impl CoordinatorConfig {
    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.wait_timeout_ms == 0 {
            return Err(CoordinatorError::Config(
                "wait_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.wait_timeout_ms > MAX_WAIT_TIMEOUT_MS {
            return Err(CoordinatorError::Config(format!(
                "wait_timeout_ms must be at most {}",
                MAX_WAIT_TIMEOUT_MS
            )));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn with_group_id(mut self, group_id: u32) -> Self {
        self.local_group_id = group_id;
        self
    }

    /// Set the wait timeout, capped at `MAX_WAIT_TIMEOUT_MS`
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = u64::try_from(timeout.as_millis())
            .unwrap_or(MAX_WAIT_TIMEOUT_MS)
            .min(MAX_WAIT_TIMEOUT_MS);
        self
    }

    pub fn with_two_phase_commit(mut self, mode: TwoPhaseCommitMode) -> Self {
        self.two_phase_commit = mode;
        self
    }
}
