//! Disk cache for package bundles
//!
//! Each cached bundle lives in its own record folder holding a data file
//! and an info file with the data file's CRC32 and size. A record only
//! counts as a cache hit once both verify, so a failed or interrupted
//! download never leaves a valid-looking entry behind.
//!
//! # Layout
//!
//! ```text
//! {root}/{package}/BundleFiles/{hash[0..2]}/{guid}/__data[.ext]
//! {root}/{package}/BundleFiles/{hash[0..2]}/{guid}/__info
//! {root}/{package}/TempFiles/{guid}
//! {root}/{package}/ManifestFiles/{package}_{version}.json
//! ```
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`path`] - Record folder and temp file layout
//! - [`record`] - Info/data file pairs and their verification
//! - [`verification`] - Verify levels, results and reports
//! - [`downloader`] - Download-and-cache transfer with resume
//! - [`initialize`] - Rebuilding the record table from disk
//! - [`clear`] - Clear modes and the clear operation
//! - [`stats`] - Cache statistics and disk usage
//! - [`manager`] - Record table and the [`CacheFileSystem`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use std::time::Duration;
//! use bundle_fetcher::app::cache::{CacheFileSystem, CacheFileSystemConfig};
//! use bundle_fetcher::app::download::MemoryBackend;
//! use bundle_fetcher::app::filesystem::FileSystem;
//! use bundle_fetcher::app::operation::{Operation, OperationSystem};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let operations = Rc::new(OperationSystem::default());
//! let config = CacheFileSystemConfig::new("DefaultPackage", "/tmp/bundle-cache".into())
//!     .with_remote("https://cdn.example.com/main", "https://cdn.example.com/fallback");
//! let file_system = Rc::new(CacheFileSystem::new(
//!     config,
//!     Rc::new(MemoryBackend::new()),
//!     operations.clone(),
//! )?);
//!
//! let initialize = file_system.clone().initialize();
//! operations.start_operation(initialize.clone());
//! while !initialize.borrow().is_done() {
//!     operations.update(Duration::from_millis(16));
//! }
//! println!("{} cached bundles", file_system.file_count());
//! # Ok(())
//! # }
//! ```

pub mod clear;
pub mod config;
pub mod downloader;
pub mod initialize;
pub mod manager;
pub mod path;
pub mod record;
pub mod stats;
pub mod verification;

#[cfg(test)]
mod tests;

// Re-export main public API
pub use clear::{ClearCacheFilesOperation, ClearMode};
pub use config::CacheFileSystemConfig;
pub use downloader::{CacheTransfer, TransferSettings};
pub use initialize::InitializeCacheOperation;
pub use manager::{CacheFileSystem, CacheStore};
pub use path::CachePaths;
pub use record::RecordFileElement;
pub use stats::{format_bytes, CacheStats};
pub use verification::{FileVerifyLevel, FileVerifyResult, VerificationFailure, VerificationReport};
