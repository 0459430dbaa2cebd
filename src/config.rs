//! Engine configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConclaveError, Result};

/// Per-task retry engine settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per task before it fails terminally
    pub max_attempts: u32,
    /// Exchange rounds granted to a worker per attempt
    pub exchange_rounds: usize,
    /// Exchange rounds for operationally expensive categories
    pub expensive_exchange_rounds: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            exchange_rounds: 8,
            expensive_exchange_rounds: 4,
        }
    }
}

/// Team loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Ceiling on implement/verify iterations per goal
    pub max_iterations: u32,
    /// Produce and persist a design record before decomposing
    pub design_records: bool,
    /// Run verification entries at their declared position in the execution
    /// order instead of after all implementation work
    pub interleave_verification: bool,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            design_records: true,
            interleave_verification: false,
        }
    }
}

/// Monitoring and runbook settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    /// Consecutive unhealthy observations that open an incident
    pub failure_threshold: u32,
    /// Attempts per runbook step
    pub runbook_attempts: u32,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            runbook_attempts: 3,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub team: TeamConfig,
    pub ops: OpsConfig,
}

impl EngineConfig {
    /// Parse from JSON text; missing fields take defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ConclaveError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.exchange_rounds == 0 || self.retry.expensive_exchange_rounds == 0 {
            return Err(ConclaveError::Config("exchange rounds must be at least 1".into()));
        }
        if self.team.max_iterations == 0 {
            return Err(ConclaveError::Config("team.max_iterations must be at least 1".into()));
        }
        if self.ops.failure_threshold == 0 || self.ops.runbook_attempts == 0 {
            return Err(ConclaveError::Config("ops thresholds must be at least 1".into()));
        }
        Ok(())
    }
}
