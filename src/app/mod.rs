//! Core engine of Bundle Fetcher
//!
//! This module contains the cooperative operation scheduler, the download
//! transport and retry policy, the file systems that decide where bundles
//! come from, the manifest model, the resource manager and the LRU caches.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use std::time::Duration;
//! use bundle_fetcher::app::{
//!     EditorFileSystem, EditorFileSystemConfig, MemoryBackend, Operation, OperationSystem,
//!     ResourceConfig, ResourcePackage,
//! };
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let operations = Rc::new(OperationSystem::default());
//! let file_system = Rc::new(EditorFileSystem::new(
//!     "DefaultPackage",
//!     EditorFileSystemConfig::new("./assets"),
//!     Rc::new(MemoryBackend::new()),
//!     operations.clone(),
//! ));
//! let package = ResourcePackage::new(file_system, operations.clone(), ResourceConfig::default())?;
//!
//! let init = package.initialize();
//! let update = package.update_package_manifest("Simulate", None);
//! while !init.borrow().is_done() || !update.borrow().is_done() {
//!     operations.update(Duration::from_millis(16));
//! }
//!
//! let handle = package.resources().load_asset("ui/menu.prefab", 0)?;
//! while !handle.is_done() {
//!     operations.update(Duration::from_millis(16));
//! }
//! println!("{} bytes", handle.asset()?.bytes.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod download;
pub mod filesystem;
pub mod hash;
pub mod lru;
pub mod manifest;
pub mod operation;
pub mod package;
pub mod resource;

// Re-export main public API
pub use cache::{CacheFileSystem, CacheFileSystemConfig, CacheStats, ClearMode};
pub use download::{
    BundleDownloadOperation, DownloadBackend, DownloadFileOptions, DownloadRequest,
    DownloadScheduler, HttpBackend, HttpBackendConfig, MemoryBackend, RequestStatus,
};
pub use filesystem::{EditorFileSystem, EditorFileSystemConfig, FileSystem, WebServerFileSystem};
pub use hash::Md5Hash;
pub use lru::{LruCache, MediaKind, MediaLruCache};
pub use manifest::{ManifestBuilder, PackageAsset, PackageBundle, PackageManifest};
pub use operation::{Operation, OperationStatus, OperationSystem, OperationSystemConfig};
pub use package::ResourcePackage;
pub use resource::{HandleKind, ResourceConfig, ResourceManager};
