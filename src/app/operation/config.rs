//! Operation system configuration
//!
//! Controls the per-frame time slice and the synchronous wait budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::operation;
use crate::errors::ConfigError;

/// Configuration for the operation system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationSystemConfig {
    /// Maximum time spent updating operations per frame (None = unbounded)
    #[serde(default, with = "humantime_serde")]
    pub max_time_slice: Option<Duration>,
    /// Frames a synchronous wait may spend before failing the operation
    pub wait_frame_budget: u32,
    /// Sleep between synchronous wait frames
    #[serde(with = "humantime_serde")]
    pub wait_poll_interval: Duration,
}

impl Default for OperationSystemConfig {
    fn default() -> Self {
        Self {
            max_time_slice: None,
            wait_frame_budget: operation::WAIT_FRAME_BUDGET,
            wait_poll_interval: operation::WAIT_POLL_INTERVAL,
        }
    }
}

impl OperationSystemConfig {
    /// Limit each frame to a time slice, never below the minimum slice
    pub fn with_max_time_slice(mut self, slice: Duration) -> Self {
        self.max_time_slice = Some(slice.max(operation::MIN_TIME_SLICE));
        self
    }

    /// Set the synchronous wait frame budget
    pub fn with_wait_frame_budget(mut self, budget: u32) -> Self {
        self.wait_frame_budget = budget;
        self
    }

    /// Set the sleep between synchronous wait frames
    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_frame_budget == 0 {
            return Err(ConfigError::InvalidValue {
                field: "wait_frame_budget".to_string(),
                value: "0".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
        if let Some(slice) = self.max_time_slice {
            if slice < operation::MIN_TIME_SLICE {
                return Err(ConfigError::InvalidValue {
                    field: "max_time_slice".to_string(),
                    value: format!("{:?}", slice),
                    reason: format!("Must be at least {:?}", operation::MIN_TIME_SLICE),
                });
            }
        }
        Ok(())
    }
}
