//! Resource manager configuration

use serde::{Deserialize, Serialize};

use crate::constants::resource::{DEFAULT_BUNDLE_LOADING_MAX_CONCURRENCY, DEFAULT_UNLOAD_LOOP_COUNT};
use crate::errors::ConfigError;

/// Configuration for the resource manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Bundles allowed in the load step at once
    pub bundle_loading_max_concurrency: usize,
    /// Collection iterations run by one unload request
    pub unload_loop_count: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            bundle_loading_max_concurrency: DEFAULT_BUNDLE_LOADING_MAX_CONCURRENCY,
            unload_loop_count: DEFAULT_UNLOAD_LOOP_COUNT,
        }
    }
}

impl ResourceConfig {
    pub fn with_bundle_loading_max_concurrency(mut self, max: usize) -> Self {
        self.bundle_loading_max_concurrency = max;
        self
    }

    pub fn with_unload_loop_count(mut self, loop_count: u32) -> Self {
        self.unload_loop_count = loop_count;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bundle_loading_max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bundle_loading_max_concurrency".to_string(),
                value: "0".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
        if self.unload_loop_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "unload_loop_count".to_string(),
                value: "0".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
