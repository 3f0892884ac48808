//! Configuration management for Bundle Fetcher
//!
//! This module provides the TOML configuration used by the host binary:
//! file discovery in standard locations, first-run generation of a
//! commented default file, and conversion into the runtime config structs
//! of the engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::cache::verification::FileVerifyLevel;
use crate::app::{CacheFileSystemConfig, HttpBackendConfig, OperationSystemConfig, ResourceConfig};
use crate::constants::{cache, download, operation, resource};
use crate::errors::{AppError, ConfigError, Result};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Disk cache and remote settings
    pub cache: CacheConfigToml,
    /// HTTP transport settings
    pub http: HttpConfigToml,
    /// Operation system settings
    pub operation: OperationConfigToml,
    /// Resource manager settings
    pub resource: ResourceConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigToml {
    /// Cache directory path (system cache directory if unset)
    pub cache_root: Option<PathBuf>,
    /// Package whose bundles are cached
    pub package_name: String,
    /// Base URL bundles are downloaded from
    pub remote_main_url: String,
    /// Base URL used on alternate attempts
    pub remote_fallback_url: String,
    /// Verification applied at initialization: none, low, middle or high
    pub verify_level: FileVerifyLevel,
    /// Keep the bundle extension on cached data files
    pub append_file_extension: bool,
    /// Maximum transfers running at once
    pub download_max_concurrency: usize,
    /// Maximum transfers started per frame
    pub download_max_request_per_frame: usize,
    /// Abort a transfer after this long without new bytes
    #[serde(with = "humantime_serde")]
    pub download_watchdog: Option<Duration>,
    /// Bundles at least this large resume from a partial download
    pub resume_download_minimum_size: u64,
    /// HTTP codes after which a partial download is discarded
    pub resume_download_response_codes: Vec<u16>,
    /// Extra attempts after a failed download
    pub failed_try_again: u32,
}

impl Default for CacheConfigToml {
    fn default() -> Self {
        Self {
            cache_root: None,
            package_name: "DefaultPackage".to_string(),
            remote_main_url: String::new(),
            remote_fallback_url: String::new(),
            verify_level: FileVerifyLevel::Middle,
            append_file_extension: false,
            download_max_concurrency: 8,
            download_max_request_per_frame: 4,
            download_watchdog: Some(Duration::from_secs(30)),
            resume_download_minimum_size: 1_048_576, // 1MB
            resume_download_response_codes: vec![416],
            failed_try_again: download::DEFAULT_FAILED_TRY_AGAIN,
        }
    }
}

/// TOML-friendly HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfigToml {
    /// User agent sent with every request
    pub user_agent: String,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Timeout for version and manifest requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpConfigToml {
    fn default() -> Self {
        Self {
            user_agent: download::USER_AGENT.to_string(),
            connect_timeout: download::CONNECT_TIMEOUT,
            rate_limit_rps: download::DEFAULT_RATE_LIMIT_RPS,
            pool_max_per_host: 16,
            request_timeout: download::DEFAULT_DATA_TIMEOUT,
        }
    }
}

/// TOML-friendly operation system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfigToml {
    /// Host frame interval
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    /// Time slice per frame (unbounded if unset)
    #[serde(with = "humantime_serde")]
    pub max_time_slice: Option<Duration>,
    /// Frames a synchronous wait may spend
    pub wait_frame_budget: u32,
    /// Sleep between synchronous wait frames
    #[serde(with = "humantime_serde")]
    pub wait_poll_interval: Duration,
}

impl Default for OperationConfigToml {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            max_time_slice: None,
            wait_frame_budget: operation::WAIT_FRAME_BUDGET,
            wait_poll_interval: operation::WAIT_POLL_INTERVAL,
        }
    }
}

/// TOML-friendly resource manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfigToml {
    /// Bundles allowed in the load step at once
    pub bundle_loading_max_concurrency: usize,
    /// Collection iterations per unload request
    pub unload_loop_count: u32,
}

impl Default for ResourceConfigToml {
    fn default() -> Self {
        Self {
            bundle_loading_max_concurrency: 32,
            unload_loop_count: resource::DEFAULT_UNLOAD_LOOP_COUNT,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            colored_output: true,
        }
    }
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(
        &self,
    ) -> (
        CacheFileSystemConfig,
        HttpBackendConfig,
        OperationSystemConfig,
        ResourceConfig,
    ) {
        (
            self.cache.to_runtime_config(),
            self.http.to_runtime_config(),
            self.operation.to_runtime_config(),
            self.resource.to_runtime_config(),
        )
    }

    /// Validate every runtime configuration derived from this file
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let (cache, _, operation, resource) = self.to_runtime_config();
        cache.validate()?;
        operation.validate()?;
        resource.validate()?;
        if !["error", "warn", "info", "debug", "trace"].contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: self.logging.level.clone(),
                reason: "Must be one of error, warn, info, debug, trace".to_string(),
            });
        }
        Ok(())
    }

    /// Load configuration with precedence:
    /// 1. Default values
    /// 2. Config file (explicit path, or the first found in standard locations)
    pub fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match &config_file_override {
            Some(path) => Some(path.clone()),
            None => Self::find_config_file()?,
        };

        let config = match config_path {
            Some(path) if path.exists() => {
                debug!("Loading config from: {}", path.display());
                Self::load_from_file(&path)?
            }
            Some(path) if config_file_override.is_some() => {
                return Err(ConfigError::NotFound { path }.into());
            }
            _ => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Initialize configuration on first run
    ///
    /// Creates a default config file if none exists and notifies the user
    pub fn initialize_first_run() -> Result<Option<PathBuf>> {
        let config_path = Self::get_default_config_path()?;
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        info!("Creating default configuration file...");
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::generic(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&config_path, Self::generate_default_config_content()).map_err(|e| {
            AppError::generic(format!(
                "Failed to write config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        println!("📁 Created default configuration file:");
        println!("   {}", config_path.display());
        println!("   You can customize settings by editing this file.");
        println!();

        Ok(Some(config_path))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Result<Option<PathBuf>> {
        let search_paths = vec![
            PathBuf::from("./bundle-fetcher.toml"),
            Self::get_default_config_path()?,
            #[cfg(unix)]
            PathBuf::from("/etc/bundle-fetcher/config.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Ok(Some(path));
            }
        }

        debug!("No config file found in standard locations");
        Ok(None)
    }

    /// Get the default config file path for the current user
    fn get_default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;
        Ok(config_dir.join(cache::APP_DIR_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::generic(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::InvalidFormat)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    fn generate_default_config_content() -> String {
        let default_cache_path = dirs::cache_dir()
            .map(|dir| dir.join(cache::APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("./cache"));

        format!(
            r#"# Bundle Fetcher Configuration
# This file was automatically generated on first run.
# You can customize any of these settings to suit your needs.

[cache]
# Cache directory (leave unset to use {})
# cache_root = "/path/to/custom/cache"
package_name = "DefaultPackage"

# Remote base URLs; attempts alternate between them
remote_main_url = ""
remote_fallback_url = ""

# Verification at startup: none, low, middle, high
verify_level = "middle"
append_file_extension = false

# Transfer limits
download_max_concurrency = 8
download_max_request_per_frame = 4
download_watchdog = "30s"

# Resume partial downloads of bundles of at least 1MB
resume_download_minimum_size = 1048576
resume_download_response_codes = [416]
failed_try_again = {}

[http]
user_agent = "{}"
connect_timeout = "30s"
rate_limit_rps = {}
pool_max_per_host = 16
request_timeout = "60s"

[operation]
frame_interval = "16ms"
# max_time_slice = "8ms"  # Uncomment to bound work per frame
wait_frame_budget = {}
wait_poll_interval = "1ms"

[resource]
bundle_loading_max_concurrency = 32
unload_loop_count = {}

[logging]
level = "info"  # error, warn, info, debug, trace
colored_output = true
"#,
            default_cache_path.display(),
            download::DEFAULT_FAILED_TRY_AGAIN,
            download::USER_AGENT,
            download::DEFAULT_RATE_LIMIT_RPS,
            operation::WAIT_FRAME_BUDGET,
            resource::DEFAULT_UNLOAD_LOOP_COUNT,
        )
    }
}

impl CacheConfigToml {
    /// Convert to runtime CacheFileSystemConfig
    pub fn to_runtime_config(&self) -> CacheFileSystemConfig {
        CacheFileSystemConfig {
            cache_root: self.cache_root.clone(),
            package_name: self.package_name.clone(),
            remote_main_url: self.remote_main_url.clone(),
            remote_fallback_url: self.remote_fallback_url.clone(),
            verify_level: self.verify_level,
            append_file_extension: self.append_file_extension,
            download_max_concurrency: self.download_max_concurrency,
            download_max_request_per_frame: self.download_max_request_per_frame,
            download_watchdog: self.download_watchdog,
            resume_download_minimum_size: self.resume_download_minimum_size,
            resume_download_response_codes: self.resume_download_response_codes.clone(),
            failed_try_again: self.failed_try_again,
        }
    }
}

impl HttpConfigToml {
    /// Convert to runtime HttpBackendConfig
    pub fn to_runtime_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            user_agent: self.user_agent.clone(),
            connect_timeout: self.connect_timeout,
            rate_limit_rps: self.rate_limit_rps,
            pool_max_per_host: self.pool_max_per_host,
        }
    }
}

impl OperationConfigToml {
    /// Convert to runtime OperationSystemConfig
    pub fn to_runtime_config(&self) -> OperationSystemConfig {
        let config = OperationSystemConfig::default()
            .with_wait_frame_budget(self.wait_frame_budget)
            .with_wait_poll_interval(self.wait_poll_interval);
        match self.max_time_slice {
            Some(slice) => config.with_max_time_slice(slice),
            None => config,
        }
    }
}

impl ResourceConfigToml {
    /// Convert to runtime ResourceConfig
    pub fn to_runtime_config(&self) -> ResourceConfig {
        ResourceConfig::default()
            .with_bundle_loading_max_concurrency(self.bundle_loading_max_concurrency)
            .with_unload_loop_count(self.unload_loop_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_creation() {
        let config = AppConfig::default();
        assert_eq!(config.cache.package_name, "DefaultPackage");
        assert_eq!(config.http.rate_limit_rps, download::DEFAULT_RATE_LIMIT_RPS);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_generation() {
        let content = AppConfig::generate_default_config_content();
        let parsed: AppConfig = toml::from_str(&content).unwrap();

        assert_eq!(parsed.operation.wait_frame_budget, operation::WAIT_FRAME_BUDGET);
        assert_eq!(parsed.cache.download_watchdog, Some(Duration::from_secs(30)));
        assert_eq!(parsed.operation.frame_interval, Duration::from_millis(16));
        assert!(content.contains("# Bundle Fetcher Configuration"));
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_config_loading_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let result = AppConfig::load(Some(config_path));
        assert!(matches!(result, Err(AppError::Config(ConfigError::NotFound { .. }))));
    }

    #[test]
    fn test_config_loading_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");
        std::fs::write(
            &config_path,
            r#"
[cache]
package_name = "Main"
remote_main_url = "https://cdn.example.com/main"
remote_fallback_url = "https://cdn.example.com/backup"
verify_level = "high"

[operation]
max_time_slice = "20ms"

[resource]
bundle_loading_max_concurrency = 2

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(config_path)).unwrap();
        assert_eq!(config.cache.package_name, "Main");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.http.rate_limit_rps, download::DEFAULT_RATE_LIMIT_RPS);

        let (cache, _, operation, resource) = config.to_runtime_config();
        assert_eq!(cache.verify_level, FileVerifyLevel::High);
        assert_eq!(operation.max_time_slice, Some(Duration::from_millis(20)));
        assert_eq!(resource.bundle_loading_max_concurrency, 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.toml");
        std::fs::write(&config_path, "[resource]\nunload_loop_count = 0\n").unwrap();
        assert!(AppConfig::load(Some(config_path.clone())).is_err());

        std::fs::write(&config_path, "[logging]\nlevel = \"loud\"\n").unwrap();
        assert!(AppConfig::load(Some(config_path)).is_err());
    }
}
