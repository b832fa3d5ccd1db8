//! Configuration management for the Gneiss control plane
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (GNS_* prefix, highest precedence)
//! 2. gneiss.local.toml (gitignored, local overrides)
//! 3. gneiss.toml (git-tracked, project config)
//! 4. Built-in defaults (lowest precedence)

use serde::{Deserialize, Serialize};

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

/// Main Gneiss configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GneissConfig {
    pub broker: BrokerSection,
    pub jobs: JobSection,
    pub extent: ExtentSection,
}

impl GneissConfig {
    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.inbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broker.inbox_capacity must be positive".into(),
            ));
        }
        if self.broker.gc_interval_ticks == 0 {
            return Err(ConfigError::Invalid(
                "broker.gc_interval_ticks must be positive".into(),
            ));
        }
        if self.jobs.min_wait_timeout_secs > self.jobs.max_wait_timeout_secs {
            return Err(ConfigError::Invalid(
                "jobs.min_wait_timeout_secs exceeds jobs.max_wait_timeout_secs".into(),
            ));
        }
        Ok(())
    }
}

/// Notification broker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// Capacity of the notify inbox; overflow drops completions.
    pub inbox_capacity: usize,
    pub sweep_interval_ms: u64,
    /// Age-based reclamation runs every this many sweep ticks.
    pub gc_interval_ticks: u32,
    pub max_pending_age_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
            sweep_interval_ms: 1000,
            gc_interval_ticks: 10,
            max_pending_age_secs: 300,
        }
    }
}

/// Job orchestration policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSection {
    /// Wait bound applied when the caller does not pass one.
    pub default_wait_timeout_secs: u64,
    /// Requested wait bounds are clamped into this range.
    pub min_wait_timeout_secs: u64,
    pub max_wait_timeout_secs: u64,
    /// Whether swap requests must carry the operator confirmation bit.
    pub confirmation_required: bool,
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            default_wait_timeout_secs: 60,
            min_wait_timeout_secs: 10,
            max_wait_timeout_secs: 600,
            confirmation_required: true,
        }
    }
}

/// Extent scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtentSection {
    /// Delay before a passive node without a live peer re-evaluates.
    pub reevaluate_delay_ms: u64,
}

impl Default for ExtentSection {
    fn default() -> Self {
        Self {
            reevaluate_delay_ms: 1000,
        }
    }
}
