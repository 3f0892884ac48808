//! Cache file system configuration types and defaults
//!
//! This module contains the configuration for the disk cache file system:
//! where records live, where bundles are downloaded from, how many
//! transfers may run at once and when partial downloads are resumed.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::verification::FileVerifyLevel;
use crate::app::download::SchedulerLimits;
use crate::constants::{cache, download};
use crate::errors::ConfigError;

/// Configuration for the cache file system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheFileSystemConfig {
    /// Root directory for cache storage (OS-specific if None)
    pub cache_root: Option<PathBuf>,
    /// Package whose files are cached
    pub package_name: String,
    /// Base URL bundles are downloaded from
    pub remote_main_url: String,
    /// Base URL tried on even-numbered attempts
    pub remote_fallback_url: String,
    /// Verification applied to records found at initialization
    pub verify_level: FileVerifyLevel,
    /// Append the bundle file extension to cached data files
    pub append_file_extension: bool,
    /// Maximum transfers running at once
    pub download_max_concurrency: usize,
    /// Maximum transfers started per frame
    pub download_max_request_per_frame: usize,
    /// Abort a transfer after this long without new bytes
    #[serde(with = "humantime_serde")]
    pub download_watchdog: Option<Duration>,
    /// Bundles at least this large resume from their temp file
    pub resume_download_minimum_size: u64,
    /// HTTP codes after which a partial temp file is discarded
    pub resume_download_response_codes: Vec<u16>,
    /// Extra attempts after a failed download
    pub failed_try_again: u32,
}

impl Default for CacheFileSystemConfig {
    fn default() -> Self {
        Self {
            cache_root: None, // Will use OS-specific cache directory
            package_name: String::new(),
            remote_main_url: String::new(),
            remote_fallback_url: String::new(),
            verify_level: FileVerifyLevel::Middle,
            append_file_extension: false,
            download_max_concurrency: download::DEFAULT_MAX_CONCURRENCY,
            download_max_request_per_frame: download::DEFAULT_MAX_REQUEST_PER_FRAME,
            download_watchdog: None,
            resume_download_minimum_size: u64::MAX,
            resume_download_response_codes: Vec::new(),
            failed_try_again: download::DEFAULT_FAILED_TRY_AGAIN,
        }
    }
}

impl CacheFileSystemConfig {
    /// Create a configuration for `package_name` under `cache_root`
    pub fn new(package_name: impl Into<String>, cache_root: PathBuf) -> Self {
        Self {
            cache_root: Some(cache_root),
            package_name: package_name.into(),
            ..Default::default()
        }
    }

    /// Set the remote base URLs
    pub fn with_remote(mut self, main_url: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        self.remote_main_url = main_url.into();
        self.remote_fallback_url = fallback_url.into();
        self
    }

    pub fn with_verify_level(mut self, level: FileVerifyLevel) -> Self {
        self.verify_level = level;
        self
    }

    /// Set transfer concurrency limits, clamped to at least one
    pub fn with_download_limits(mut self, max_concurrency: usize, max_request_per_frame: usize) -> Self {
        self.download_max_concurrency = max_concurrency.max(1);
        self.download_max_request_per_frame = max_request_per_frame.max(1);
        self
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.download_watchdog = Some(watchdog);
        self
    }

    /// Enable resume for bundles of at least `minimum_size` bytes
    pub fn with_resume(mut self, minimum_size: u64, response_codes: Vec<u16>) -> Self {
        self.resume_download_minimum_size = minimum_size;
        self.resume_download_response_codes = response_codes;
        self
    }

    pub fn with_append_file_extension(mut self, enabled: bool) -> Self {
        self.append_file_extension = enabled;
        self
    }

    pub fn with_failed_try_again(mut self, failed_try_again: u32) -> Self {
        self.failed_try_again = failed_try_again;
        self
    }

    /// Root for cached files, falling back to the OS cache directory
    ///
    /// - macOS: ~/Library/Caches/bundle-fetcher
    /// - Linux: ~/.cache/bundle-fetcher
    /// - Windows: %LOCALAPPDATA%/bundle-fetcher
    pub fn resolved_root(&self) -> Option<PathBuf> {
        match &self.cache_root {
            Some(root) => Some(root.clone()),
            None => dirs::cache_dir().map(|dir| dir.join(cache::APP_DIR_NAME)),
        }
    }

    /// Scheduler limits derived from this configuration
    pub fn scheduler_limits(&self) -> SchedulerLimits {
        SchedulerLimits {
            max_concurrency: self.download_max_concurrency.max(1),
            max_request_per_frame: self.download_max_request_per_frame.max(1),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.package_name.trim().is_empty() {
            errors.push("package_name must not be empty".to_string());
        }
        if self.download_max_concurrency == 0 {
            errors.push("download_max_concurrency must be greater than 0".to_string());
        }
        if self.download_max_request_per_frame == 0 {
            errors.push("download_max_request_per_frame must be greater than 0".to_string());
        }
        if self.remote_main_url.is_empty() != self.remote_fallback_url.is_empty() {
            errors.push("remote_main_url and remote_fallback_url must be set together".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheFileSystemConfig::default();
        assert_eq!(config.cache_root, None);
        assert_eq!(config.verify_level, FileVerifyLevel::Middle);
        assert_eq!(config.resume_download_minimum_size, u64::MAX);
        assert!(config.resume_download_response_codes.is_empty());
        assert_eq!(config.failed_try_again, download::DEFAULT_FAILED_TRY_AGAIN);
    }

    #[test]
    fn test_config_builder() {
        let root = PathBuf::from("/tmp/test");
        let config = CacheFileSystemConfig::new("Demo", root.clone())
            .with_remote("http://a", "http://b")
            .with_verify_level(FileVerifyLevel::High)
            .with_download_limits(0, 2)
            .with_watchdog(Duration::from_secs(5))
            .with_resume(1024, vec![416]);

        assert_eq!(config.resolved_root(), Some(root));
        assert_eq!(config.download_max_concurrency, 1);
        assert_eq!(config.scheduler_limits().max_request_per_frame, 2);
        assert_eq!(config.download_watchdog, Some(Duration::from_secs(5)));
        assert_eq!(config.resume_download_response_codes, vec![416]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = CacheFileSystemConfig::default();
        config.remote_main_url = "http://a".into();
        config.download_max_concurrency = 0;

        match config.validate() {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_toml_uses_humantime() {
        let config: CacheFileSystemConfig = toml::from_str(
            r#"
            package_name = "Demo"
            download_watchdog = "30s"
            verify_level = "high"
            "#,
        )
        .unwrap();
        assert_eq!(config.download_watchdog, Some(Duration::from_secs(30)));
        assert_eq!(config.verify_level, FileVerifyLevel::High);
    }
}
