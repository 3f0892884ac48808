//! Engine constants for Bundle Fetcher
//!
//! This module centralizes the constants used throughout the engine,
//! organized by functional domain.

use std::time::Duration;

/// Operation scheduling constants
pub mod operation {
    use super::Duration;

    /// Frames a synchronous wait may spend before the operation is failed
    pub const WAIT_FRAME_BUDGET: u32 = 1000;

    /// Sleep between synchronous wait frames so background transfers can progress
    pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Smallest accepted per-frame time slice
    pub const MIN_TIME_SLICE: Duration = Duration::from_millis(10);

    /// Default operation priority
    pub const DEFAULT_PRIORITY: u32 = 0;
}

/// Download system constants
pub mod download {
    use super::Duration;

    /// Fixed wait between a failed attempt and the next one
    pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

    /// Default retry budget for bundle downloads
    pub const DEFAULT_FAILED_TRY_AGAIN: u32 = 3;

    /// Default download concurrency (effectively unbounded)
    pub const DEFAULT_MAX_CONCURRENCY: usize = u32::MAX as usize;

    /// Default number of downloads started per frame (effectively unbounded)
    pub const DEFAULT_MAX_REQUEST_PER_FRAME: usize = u32::MAX as usize;

    /// Default timeout for version and manifest requests
    pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(60);

    /// Default virtual download speed in bytes per second
    pub const DEFAULT_VIRTUAL_SPEED: u64 = 1024;

    /// HTTP code reported by successful simulated requests
    pub const SIMULATED_HTTP_CODE: u16 = 200;

    /// Default user agent for HTTP requests
    pub const USER_AGENT: &str = "Bundle-Fetcher/0.1.0";

    /// Default connection timeout for the HTTP backend
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default request rate limit for the HTTP backend (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 32;
}

/// Cache layout constants
pub mod cache {
    /// Folder holding cached bundle records
    pub const BUNDLE_FILES_FOLDER: &str = "BundleFiles";

    /// Folder holding cached manifests
    pub const MANIFEST_FILES_FOLDER: &str = "ManifestFiles";

    /// Folder holding in-progress downloads
    pub const TEMP_FILES_FOLDER: &str = "TempFiles";

    /// Data file name inside a record folder
    pub const DATA_FILE_NAME: &str = "__data";

    /// Info file name inside a record folder
    pub const INFO_FILE_NAME: &str = "__info";

    /// Info file length: u32 CRC followed by i64 size
    pub const INFO_FILE_LEN: usize = 12;

    /// Read buffer size used when hashing files
    pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

    /// Application directory name under the OS cache directory
    pub const APP_DIR_NAME: &str = "bundle-fetcher";
}

/// Manifest naming constants
pub mod manifest {
    /// Extension of the version file served next to the manifest
    pub const VERSION_FILE_EXTENSION: &str = "version";

    /// Extension of manifest files
    pub const MANIFEST_FILE_EXTENSION: &str = "json";

    /// Extension of catalog files
    pub const CATALOG_FILE_SUFFIX: &str = "catalog.json";

    /// Manifest format version written by the builder
    pub const FILE_VERSION: &str = "1.0.0";

    /// Version file name for a package
    pub fn version_file_name(package: &str) -> String {
        format!("{}.{}", package, VERSION_FILE_EXTENSION)
    }

    /// Manifest file name for a package version
    pub fn manifest_file_name(package: &str, version: &str) -> String {
        format!("{}_{}.{}", package, version, MANIFEST_FILE_EXTENSION)
    }

    /// Catalog file name for a package
    pub fn catalog_file_name(package: &str) -> String {
        format!("{}.{}", package, CATALOG_FILE_SUFFIX)
    }
}

/// Resource manager constants
pub mod resource {
    /// Default number of bundles allowed to load at once (effectively unbounded)
    pub const DEFAULT_BUNDLE_LOADING_MAX_CONCURRENCY: usize = u32::MAX as usize;

    /// Default loop budget for unused asset collection
    pub const DEFAULT_UNLOAD_LOOP_COUNT: u32 = 10;
}

// Re-export commonly used constants at the top level for convenience
pub use download::{RETRY_INTERVAL, USER_AGENT};
pub use operation::WAIT_FRAME_BUDGET;
