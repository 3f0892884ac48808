//! Download request arguments and retry options
//!
//! Plain argument structs passed at call sites when creating requests, and
//! the per-bundle retry options with main/fallback URL selection.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::download;

/// Arguments for head, bytes and text requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRequestArgs {
    pub url: String,
    /// Overall request timeout (None = no limit)
    pub timeout: Option<Duration>,
    /// Abort when no bytes arrive for this long (None = disabled)
    pub watchdog: Option<Duration>,
    pub headers: HashMap<String, String>,
}

impl DataRequestArgs {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_watchdog(mut self, watchdog: Option<Duration>) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Arguments for file requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequestArgs {
    pub url: String,
    pub save_path: PathBuf,
    pub timeout: Option<Duration>,
    pub watchdog: Option<Duration>,
    /// Append to an existing file instead of truncating it
    pub append_to_file: bool,
    /// Delete the partial file when the request is aborted
    pub remove_file_on_abort: bool,
    /// Resume offset sent as a `Range` header when positive
    pub resume_from_bytes: u64,
    pub headers: HashMap<String, String>,
}

impl FileRequestArgs {
    pub fn new(url: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            save_path: save_path.into(),
            timeout: None,
            watchdog: None,
            append_to_file: false,
            remove_file_on_abort: true,
            resume_from_bytes: 0,
            headers: HashMap::new(),
        }
    }

    pub fn with_watchdog(mut self, watchdog: Option<Duration>) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resume into an existing partial file
    pub fn with_resume(mut self, resume_from_bytes: u64) -> Self {
        self.append_to_file = true;
        self.remove_file_on_abort = false;
        self.resume_from_bytes = resume_from_bytes;
        self
    }
}

/// Arguments for bundle requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleRequestArgs {
    pub url: String,
    pub timeout: Option<Duration>,
    pub watchdog: Option<Duration>,
    /// Expected CRC32 of the payload, verified on completion when set
    pub file_crc: Option<u32>,
}

impl BundleRequestArgs {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_crc(mut self, crc: u32) -> Self {
        self.file_crc = Some(crc);
        self
    }
}

/// Arguments for simulated requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulateRequestArgs {
    pub url: String,
    /// Size of the simulated payload in bytes
    pub file_size: u64,
    /// Simulated throughput in bytes per second
    pub speed: u64,
}

impl SimulateRequestArgs {
    pub fn new(url: impl Into<String>, file_size: u64, speed: u64) -> Self {
        Self {
            url: url.into(),
            file_size,
            speed,
        }
    }
}

/// Retry options for a bundle download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFileOptions {
    /// Attempts allowed after the first failure
    pub failed_try_again: u32,
    /// Primary URL, used on odd-numbered attempts
    pub main_url: String,
    /// Fallback URL, used on even-numbered attempts
    pub fallback_url: String,
    /// Local file imported instead of downloading, when set
    pub import_file_path: Option<PathBuf>,
}

impl DownloadFileOptions {
    pub fn new(main_url: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        Self {
            failed_try_again: download::DEFAULT_FAILED_TRY_AGAIN,
            main_url: main_url.into(),
            fallback_url: fallback_url.into(),
            import_file_path: None,
        }
    }

    pub fn with_failed_try_again(mut self, failed_try_again: u32) -> Self {
        self.failed_try_again = failed_try_again;
        self
    }

    pub fn with_import_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_file_path = Some(path.into());
        self
    }

    /// Both URLs must be present
    pub fn is_valid(&self) -> bool {
        !self.main_url.is_empty() && !self.fallback_url.is_empty()
    }

    /// URL for the given 1-based attempt: odd attempts use the main URL
    pub fn url_for_attempt(&self, attempt: u32) -> &str {
        if attempt % 2 == 0 {
            &self.fallback_url
        } else {
            &self.main_url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validity() {
        assert!(DownloadFileOptions::new("u1", "u2").is_valid());
        assert!(!DownloadFileOptions::new("", "u2").is_valid());
        assert!(!DownloadFileOptions::new("u1", "").is_valid());
    }

    #[test]
    fn test_url_alternation() {
        let options = DownloadFileOptions::new("u1", "u2");
        let urls: Vec<&str> = (1..=4).map(|n| options.url_for_attempt(n)).collect();
        assert_eq!(urls, vec!["u1", "u2", "u1", "u2"]);
    }

    #[test]
    fn test_file_args_resume() {
        let args = FileRequestArgs::new("https://a/b", "/tmp/b").with_resume(512);
        assert!(args.append_to_file);
        assert!(!args.remove_file_on_abort);
        assert_eq!(args.resume_from_bytes, 512);

        let args = FileRequestArgs::new("https://a/b", "/tmp/b");
        assert!(!args.append_to_file);
        assert!(args.remove_file_on_abort);
    }
}
