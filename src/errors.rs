//! Error types for Bundle Fetcher
//!
//! This module defines the error types for every component of the engine.
//! Operations never let these escape their public boundary: an operation
//! converts them into a terminal `Failed` status plus the `Display` string,
//! so the messages below are part of the observable behaviour.

use std::path::PathBuf;
use thiserror::Error;

/// Operation lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Synchronous wait ran out of frames before the operation finished
    #[error("Operation {name} failed to wait for async complete !")]
    WaitBudgetExhausted { name: String },

    /// The caller aborted an unfinished operation
    #[error("user abort")]
    UserAbort,

    /// A synchronous wait was requested while the same operation was being driven
    #[error("Operation {name} is already being driven and cannot be waited on reentrantly")]
    ReentrantWait { name: String },

    /// An operation driven to completion by the host ended in `Failed`
    #[error("{name} failed: {error}")]
    Failed { name: String, error: String },
}

/// Download transport errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error while writing the transfer target
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid URL provided
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Request exceeded its overall timeout
    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// No bytes arrived within the watchdog window
    #[error("Watchdog timeout: no data received for {seconds} seconds")]
    Watchdog { seconds: u64 },

    /// Server returned error status
    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Main or fallback URL missing from the download options
    #[error("Download file options is invalid !")]
    InvalidOptions,

    /// The request was aborted before finishing
    #[error("Request aborted")]
    Aborted,

    /// Transport failure attributed to a request kind and URL
    #[error("[{kind}] URL: {url} - error: {reason}")]
    Request {
        kind: String,
        url: String,
        reason: String,
    },
}

/// Cache file system errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// File I/O error
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data file CRC does not match the recorded CRC
    #[error("File CRC mismatch. Expected: {expected:08x}, got: {actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Data file size does not match the recorded size
    #[error("File size mismatch. Expected: {expected} bytes, got: {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Verified file is missing
    #[error("Cache file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// No record exists for the bundle
    #[error("Cache record not found: {guid}")]
    RecordNotFound { guid: String },

    /// Info file is truncated or malformed
    #[error("Invalid cache info file: {path}")]
    InvalidInfoFile { path: PathBuf },

    /// Writing the cached bundle failed
    #[error("{file_system} failed to write file !")]
    WriteFailed { file_system: String },

    /// Unknown clear mode name
    #[error("Invalid clear mode : {mode}")]
    InvalidClearMode { mode: String },

    /// Clear mode needs an active manifest
    #[error("Clear mode {mode} requires an active manifest")]
    ManifestRequired { mode: String },
}

/// Catalog loading errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Catalog belongs to another package
    #[error("Catalog file package name {catalog} cannot match the file system package name {file_system}")]
    PackageMismatch {
        catalog: String,
        file_system: String,
    },

    /// Catalog text could not be parsed
    #[error("Failed to load catalog file : {0}")]
    Parse(#[from] serde_json::Error),
}

/// Manifest errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Invalid hash format
    #[error("Invalid hash format: {hash}. Expected MD5 hex string")]
    InvalidHash { hash: String },

    /// JSON parsing error
    #[error("JSON parsing error in manifest: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// I/O error reading manifest or source files
    #[error("I/O error reading manifest: {0}")]
    Io(#[from] std::io::Error),

    /// Version string missing
    #[error("Package version is null or empty.")]
    EmptyVersion,

    /// Manifest belongs to another package
    #[error("Manifest package name {found} does not match {expected}")]
    PackageMismatch { expected: String, found: String },

    /// Asset path not present in the manifest
    #[error("Asset not found in manifest: {path}")]
    AssetNotFound { path: String },

    /// Bundle id or name not present in the manifest
    #[error("Bundle not found in manifest: {bundle}")]
    BundleNotFound { bundle: String },

    /// Restore service rejected the manifest bytes
    #[error("Manifest restore failed: {reason}")]
    RestoreFailed { reason: String },
}

/// Resource manager errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Loads are locked by the host
    #[error("The load operation locked !")]
    LoadLocked,

    /// Handle kind has no registered constructor
    #[error("Unsupported handle kind: {kind}")]
    UnsupportedHandleKind { kind: String },

    /// Handle conversion asked for a different kind
    #[error("Handle kind mismatch. Expected: {expected}, got: {actual}")]
    HandleKindMismatch { expected: String, actual: String },

    /// Loader destroyed while still loading
    #[error("Bundle loader {bundle} is still loading")]
    LoaderStillLoading { bundle: String },

    /// Loader destroyed while referenced
    #[error("Bundle loader {bundle} is still referenced ({ref_count})")]
    LoaderReferenced { bundle: String, ref_count: i32 },

    /// Loader refuses new providers once unloading
    #[error("Bundle loader {bundle} is unloading")]
    LoaderUnloading { bundle: String },

    /// Unfinished loader was destroyed
    #[error("Bundle loader destroyed !")]
    LoaderDestroyed,

    /// Loader aborted before it started loading
    #[error("Abort bundle loader !")]
    LoaderAborted,

    /// Load succeeded without producing a bundle
    #[error("The bundle loader result is null ! {bundle}")]
    EmptyLoaderResult { bundle: String },

    /// Unfinished provider was destroyed
    #[error("User abort !")]
    ProviderAborted,

    /// Handle was already released
    #[error("Handle already released")]
    HandleReleased,

    /// Asset could not be resolved
    #[error("Asset not found: {path}")]
    AssetNotFound { path: String },

    /// No manifest is active yet
    #[error("No active manifest for package {package}")]
    NoActiveManifest { package: String },

    /// Decoder could not produce the requested object
    #[error("Failed to decode {path}: {reason}")]
    DecodeFailed { path: String, reason: String },
}

/// LRU cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LruError {
    /// Capacity must be positive
    #[error("Capacity must be greater than zero.")]
    InvalidCapacity,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Operation error
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Catalog error
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Manifest error
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Resource error
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// LRU error
    #[error(transparent)]
    Lru(#[from] LruError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The user interrupted the host with Ctrl-C
    #[error("Interrupted by user")]
    Interrupted,

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Wrap the error string of a failed operation
    pub fn operation_failed(name: &str, error: impl Into<String>) -> Self {
        Self::Operation(OperationError::Failed {
            name: name.to_string(),
            error: error.into(),
        })
    }

    /// Check if the error is recoverable (transient)
    ///
    /// Transport failures are retried by download operations; verification,
    /// argument and capacity failures terminate immediately.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Download(DownloadError::Http(_))
            | AppError::Download(DownloadError::Timeout { .. })
            | AppError::Download(DownloadError::Watchdog { .. })
            | AppError::Download(DownloadError::ServerError { .. })
            | AppError::Download(DownloadError::Request { .. }) => true,

            AppError::Download(DownloadError::InvalidOptions)
            | AppError::Download(DownloadError::InvalidUrl { .. })
            | AppError::Cache(CacheError::CrcMismatch { .. })
            | AppError::Cache(CacheError::SizeMismatch { .. })
            | AppError::Catalog(_)
            | AppError::Lru(_)
            | AppError::Config(_) => false,

            _ => false,
        }
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Operation(_) => "operation",
            AppError::Download(_) => "download",
            AppError::Cache(_) => "cache",
            AppError::Catalog(_) => "catalog",
            AppError::Manifest(_) => "manifest",
            AppError::Resource(_) => "resource",
            AppError::Lru(_) => "lru",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Interrupted => "interrupted",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Download-specific result type
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Cache-specific result type
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Manifest-specific result type
pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Resource-specific result type
pub type ResourceResult<T> = std::result::Result<T, ResourceError>;

/// Configuration-specific result type
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
