//! Prelude module for Bundle Fetcher Library
//!
//! This module re-exports the most commonly used items from the library,
//! providing a convenient way to import everything needed for typical usage
//! with a single `use bundle_fetcher::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bundle_fetcher::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let operations = Rc::new(OperationSystem::default());
//!     let file_system = Rc::new(CacheFileSystem::new(
//!         CacheFileSystemConfig::new("DefaultPackage", PathBuf::from("./cache"))
//!             .with_remote("https://cdn.example.com/a", "https://cdn.example.com/b"),
//!         Rc::new(MemoryBackend::new()),
//!         operations.clone(),
//!     )?);
//!     let package = ResourcePackage::new(file_system, operations.clone(), ResourceConfig::default())?;
//!
//!     // Drive the operation system once per frame from here on
//!     let init = package.initialize();
//!     while !init.borrow().is_done() {
//!         operations.update(Duration::from_millis(16));
//!     }
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Essential app components that are used in most integrations
pub use crate::app::{
    // Transport
    DownloadBackend,
    DownloadFileOptions,
    HttpBackend,
    HttpBackendConfig,
    MemoryBackend,

    // File systems
    CacheFileSystem,
    CacheFileSystemConfig,
    CacheStats,
    ClearMode,
    EditorFileSystem,
    EditorFileSystemConfig,
    FileSystem,
    WebServerFileSystem,

    // Manifest
    ManifestBuilder,
    PackageAsset,
    PackageBundle,
    PackageManifest,

    // Scheduling
    Operation,
    OperationStatus,
    OperationSystem,
    OperationSystemConfig,

    // Loading
    HandleKind,
    ResourceConfig,
    ResourceManager,
    ResourcePackage,

    // Caches
    LruCache,
    MediaKind,
    MediaLruCache,
};

// Commonly used constants
pub use crate::constants::{RETRY_INTERVAL, USER_AGENT, WAIT_FRAME_BUDGET};

// Standard library re-exports that are commonly needed
pub use std::cell::RefCell;
pub use std::path::{Path, PathBuf};
pub use std::rc::Rc;
pub use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        // Verify that all essential configs are available through prelude
        let _operation_config = OperationSystemConfig::default();
        let _http_config = HttpBackendConfig::default();
        let _resource_config = ResourceConfig::default();
        let _options = DownloadFileOptions::new("u1", "u2");

        assert_eq!(WAIT_FRAME_BUDGET, 1000);
        assert!(USER_AGENT.contains("Bundle-Fetcher"));
    }

    #[test]
    fn test_prelude_integration_pattern() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let operations = Rc::new(OperationSystem::default());
        let config = CacheFileSystemConfig::new("DefaultPackage", temp_dir.path().to_path_buf())
            .with_remote("http://a", "http://b");
        let file_system = Rc::new(
            CacheFileSystem::new(config, Rc::new(MemoryBackend::new()), operations.clone()).unwrap(),
        );
        let package =
            ResourcePackage::new(file_system, operations.clone(), ResourceConfig::default()).unwrap();

        let init = package.initialize();
        for _ in 0..10 {
            if init.borrow().is_done() {
                break;
            }
            operations.update(Duration::from_millis(16));
        }
        assert_eq!(init.borrow().status(), OperationStatus::Succeed);
        assert_eq!(package.file_system().file_count(), 0);
    }
}
