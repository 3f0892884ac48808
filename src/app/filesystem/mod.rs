//! File system abstraction
//!
//! A file system answers where a package's files live: which bundles are
//! present, how missing ones are fetched, and how the manifest and its
//! version are obtained. Three implementations ship with the crate:
//!
//! - [`crate::app::cache::CacheFileSystem`] - disk cache verified by CRC and size
//! - [`web::WebServerFileSystem`] - built-in files on a web server, described by a catalog
//! - [`editor::EditorFileSystem`] - local directory with simulated downloads
//!
//! Methods that create operations take `self: Rc<Self>` so the operation
//! can keep the file system alive while it runs.

pub mod catalog;
pub mod editor;
pub mod load;
pub mod remote;
pub mod web;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::app::download::{BundleDownloadOperation, DownloadFileOptions};
use crate::app::manifest::{PackageBundle, PackageManifest};
use crate::app::operation::{Operation, SharedOperation};

pub use catalog::{Catalog, CatalogWrapper, LoadCatalogOperation};
pub use editor::{EditorFileSystem, EditorFileSystemConfig};
pub use load::{BundleStore, LoadBundleOperation};
pub use remote::{InstantOperation, RemoteManifestOperation, RemoteVersionOperation};
pub use web::WebServerFileSystem;

/// Content of a loaded bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleData {
    /// Bundle file on disk
    File(PathBuf),
    /// Bundle payload held in memory
    Bytes(Vec<u8>),
    /// Simulated bundle with no payload
    Virtual,
}

/// Result of a successful bundle load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedBundle {
    pub bundle: PackageBundle,
    pub data: BundleData,
}

impl LoadedBundle {
    /// Read the whole payload
    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.data {
            BundleData::File(path) => std::fs::read(path),
            BundleData::Bytes(bytes) => Ok(bytes.clone()),
            BundleData::Virtual => Ok(Vec::new()),
        }
    }
}

/// Operation producing a package version string
pub trait VersionOperation: Operation {
    fn package_version(&self) -> &str;
}

/// Operation producing a parsed manifest
pub trait ManifestOperation: Operation {
    fn take_manifest(&mut self) -> Option<PackageManifest>;
}

/// Operation producing a loaded bundle
pub trait BundleFileOperation: Operation {
    fn take_bundle(&mut self) -> Option<LoadedBundle>;

    fn downloaded_bytes(&self) -> u64;

    fn download_progress(&self) -> f32;
}

pub type SharedVersionOperation = Rc<RefCell<dyn VersionOperation>>;
pub type SharedManifestOperation = Rc<RefCell<dyn ManifestOperation>>;
pub type SharedBundleFileOperation = Rc<RefCell<dyn BundleFileOperation>>;

/// Source of one package's files
pub trait FileSystem {
    /// Name used in messages
    fn name(&self) -> &'static str;

    fn package_name(&self) -> &str;

    /// Number of bundles currently available without download
    fn file_count(&self) -> usize;

    /// Authoritative presence check
    fn exists(&self, bundle: &PackageBundle) -> bool;

    /// Check if loading `bundle` would go to the network
    fn need_download(&self, bundle: &PackageBundle) -> bool {
        !self.exists(bundle)
    }

    /// Register a bundle written outside the download path
    fn record_download_file(&self, bundle: &PackageBundle) -> bool;

    /// Prepare the file system; must finish before other use
    fn initialize(self: Rc<Self>) -> SharedOperation;

    fn request_package_version(
        self: Rc<Self>,
        append_time_ticks: bool,
        timeout: Option<Duration>,
    ) -> SharedVersionOperation;

    fn load_package_manifest(
        self: Rc<Self>,
        package_version: &str,
        timeout: Option<Duration>,
    ) -> SharedManifestOperation;

    /// Load a bundle, downloading it first when needed
    fn load_bundle_file(self: Rc<Self>, bundle: &PackageBundle) -> SharedBundleFileOperation;

    /// Download a bundle without loading it
    fn download_file(
        self: Rc<Self>,
        bundle: &PackageBundle,
        options: DownloadFileOptions,
    ) -> Rc<RefCell<BundleDownloadOperation>>;

    /// Clear cached files by mode name
    fn clear_cache_files(
        self: Rc<Self>,
        manifest: Option<Rc<PackageManifest>>,
        clear_mode: &str,
        tags: Vec<String>,
    ) -> SharedOperation;

    /// Release resources; called once by the owning package
    fn dispose(&self) {}
}
