//! Disk cache file system
//!
//! [`CacheStore`] owns the record table and the on-disk layout.
//! [`CacheFileSystem`] puts it behind the [`FileSystem`] contract: missing
//! bundles are fetched from the configured remote through a shared
//! [`DownloadScheduler`], verified and recorded.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::clear::{ClearCacheFilesOperation, ClearMode};
use super::config::CacheFileSystemConfig;
use super::downloader::{CacheTransfer, TransferSettings};
use super::initialize::InitializeCacheOperation;
use super::path::CachePaths;
use super::record::{write_info_file, RecordFileElement};
use super::stats::CacheStats;
use super::verification::{FileVerifyLevel, FileVerifyResult, VerificationReport};
use crate::app::download::{
    BundleDownloadOperation, DownloadBackend, DownloadFileOptions, DownloadScheduler,
    SchedulerRegistration, SharedTransfer, TransferSource,
};
use crate::app::filesystem::{
    BundleData, BundleStore, FileSystem, InstantOperation, LoadBundleOperation,
    RemoteManifestOperation, RemoteVersionOperation, SharedBundleFileOperation,
    SharedManifestOperation, SharedVersionOperation,
};
use crate::app::filesystem::remote::with_time_ticks;
use crate::app::manifest::{
    file_url, join_url, CopyFileServices, DefaultCopyFileServices, ManifestServices, PackageBundle,
    PackageManifest, PlainManifestServices,
};
use crate::app::operation::{OperationSystem, SharedOperation};
use crate::constants::manifest::{manifest_file_name, version_file_name};
use crate::errors::{CacheError, CacheResult};

/// Record table and layout of one package's cache
#[derive(Debug)]
pub struct CacheStore {
    name: &'static str,
    paths: CachePaths,
    records: RefCell<HashMap<String, RecordFileElement>>,
}

impl CacheStore {
    pub fn new(name: &'static str, paths: CachePaths) -> Self {
        Self {
            name,
            paths,
            records: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    pub fn exists(&self, guid: &str) -> bool {
        self.records.borrow().contains_key(guid)
    }

    pub fn file_count(&self) -> usize {
        self.records.borrow().len()
    }

    /// GUIDs of every recorded bundle
    pub fn guids(&self) -> Vec<String> {
        self.records.borrow().keys().cloned().collect()
    }

    pub fn record_of(&self, guid: &str) -> Option<RecordFileElement> {
        self.records.borrow().get(guid).cloned()
    }

    /// Add a record; refuses duplicates
    pub fn record(&self, guid: &str, element: RecordFileElement) -> bool {
        let mut records = self.records.borrow_mut();
        if records.contains_key(guid) {
            error!("{} has element : {}", self.name, guid);
            return false;
        }
        records.insert(guid.to_string(), element);
        true
    }

    /// Copy a verified file into the bundle's record folder and record it
    pub fn write_cache_bundle_file(&self, bundle: &PackageBundle, copy_path: &Path) -> bool {
        let guid = bundle.bundle_guid();
        if self.exists(guid) {
            warn!("{} already recorded {}", self.name, guid);
            return false;
        }

        let info_file_path = self.paths.info_file_path(bundle);
        let data_file_path = self.paths.data_file_path(bundle);
        let size = i64::try_from(bundle.file_size).unwrap_or(i64::MAX);
        let written = write_record_files(&info_file_path, &data_file_path, copy_path, bundle.file_crc, size);
        if let Err(e) = written {
            error!("Failed to write cache file ! {}", e);
            return false;
        }

        let element = RecordFileElement::new(info_file_path, data_file_path, bundle.file_crc, size);
        self.record(guid, element)
    }

    /// Forget a record and delete its folder
    pub fn delete(&self, guid: &str) -> bool {
        let removed = self.records.borrow_mut().remove(guid);
        match removed {
            Some(element) => element.delete_folder(),
            None => false,
        }
    }

    /// Check a recorded bundle at the highest level
    pub fn verify(&self, guid: &str) -> FileVerifyResult {
        match self.record_of(guid) {
            Some(element) => element.verify(FileVerifyLevel::High),
            None => FileVerifyResult::CacheNotFound,
        }
    }

    pub fn delete_all_bundle_files(&self) -> CacheResult<()> {
        self.records.borrow_mut().clear();
        remove_dir_if_exists(self.paths.bundle_files_root())
    }

    pub fn delete_all_manifest_files(&self) -> CacheResult<()> {
        remove_dir_if_exists(self.paths.manifest_files_root())
    }

    /// Recorded bytes across every bundle
    pub fn total_size(&self) -> u64 {
        self.records
            .borrow()
            .values()
            .map(|r| u64::try_from(r.data_file_size).unwrap_or(0))
            .sum()
    }
}

fn write_record_files(
    info_file_path: &Path,
    data_file_path: &Path,
    copy_path: &Path,
    crc: u32,
    size: i64,
) -> std::io::Result<()> {
    for path in [info_file_path, data_file_path] {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }
    if let Some(parent) = data_file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(copy_path, data_file_path)?;
    write_info_file(info_file_path, crc, size)
}

fn remove_dir_if_exists(path: &Path) -> CacheResult<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Disk cache implementation of [`FileSystem`]
pub struct CacheFileSystem {
    config: CacheFileSystemConfig,
    store: Rc<CacheStore>,
    scheduler: Rc<DownloadScheduler>,
    registration: SchedulerRegistration,
    manifest_services: Rc<dyn ManifestServices>,
    copy_services: Rc<dyn CopyFileServices>,
}

impl CacheFileSystem {
    pub const NAME: &'static str = "CacheFileSystem";

    /// Create a cache file system
    ///
    /// # Errors
    ///
    /// Returns `CacheError::DirectoryNotAccessible` when no cache root is
    /// configured and the OS has no cache directory
    pub fn new(
        config: CacheFileSystemConfig,
        backend: Rc<dyn DownloadBackend>,
        operations: Rc<OperationSystem>,
    ) -> CacheResult<Self> {
        let root = config
            .resolved_root()
            .ok_or_else(|| CacheError::DirectoryNotAccessible {
                path: PathBuf::from("system cache directory"),
            })?;
        let paths = CachePaths::new(&root, &config.package_name, config.append_file_extension);
        info!(
            "Initialized cache file system for {} with root: {}",
            config.package_name,
            paths.package_root().display()
        );

        let scheduler = DownloadScheduler::new(backend, config.scheduler_limits());
        Ok(Self {
            store: Rc::new(CacheStore::new(Self::NAME, paths)),
            scheduler,
            registration: SchedulerRegistration::new(operations),
            manifest_services: Rc::new(PlainManifestServices),
            copy_services: Rc::new(DefaultCopyFileServices),
            config,
        })
    }

    pub fn with_manifest_services(mut self, services: Rc<dyn ManifestServices>) -> Self {
        self.manifest_services = services;
        self
    }

    pub fn with_copy_services(mut self, services: Rc<dyn CopyFileServices>) -> Self {
        self.copy_services = services;
        self
    }

    pub fn config(&self) -> &CacheFileSystemConfig {
        &self.config
    }

    pub fn store(&self) -> &Rc<CacheStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Rc<DownloadScheduler> {
        &self.scheduler
    }

    pub fn package_root(&self) -> &Path {
        self.store.paths().package_root()
    }

    /// Register the download scheduler with the operation system once
    pub(crate) fn start_scheduler(&self) {
        if !self.registration.is_started() {
            self.registration.start(&self.scheduler);
            debug!("Download scheduler started for {}", self.config.package_name);
        }
    }

    fn remote_url(&self, file_name: &str) -> (String, String) {
        (
            join_url(&self.config.remote_main_url, file_name),
            join_url(&self.config.remote_fallback_url, file_name),
        )
    }

    /// Verify every record at the highest level
    pub fn verify_all(&self) -> VerificationReport {
        let start = Instant::now();
        let mut report = VerificationReport::new();
        for guid in self.store.guids() {
            let result = self.store.verify(&guid);
            if result.is_succeed() {
                report.add_verified();
            } else {
                warn!("Cached bundle {} failed verification: {}", guid, result);
                report.add_failed(guid, result);
            }
        }
        report.set_verification_time(start.elapsed());
        report
    }

    /// Cache statistics for display
    pub fn stats(&self) -> CacheStats {
        CacheStats::collect(
            &self.store,
            self.scheduler.active_download_count(),
            self.scheduler.pending_download_count(),
        )
    }
}

impl TransferSource for CacheFileSystem {
    fn exists(&self, bundle: &PackageBundle) -> bool {
        self.store.exists(bundle.bundle_guid())
    }

    fn begin_transfer(&self, bundle: &PackageBundle, url: &str) -> SharedTransfer {
        let settings = TransferSettings {
            watchdog: self.config.download_watchdog,
            resume_minimum_size: self.config.resume_download_minimum_size,
            resume_response_codes: self.config.resume_download_response_codes.clone(),
        };
        self.scheduler.download(bundle.bundle_guid(), || {
            Rc::new(RefCell::new(CacheTransfer::new(
                self.store.clone(),
                self.scheduler.backend().clone(),
                self.copy_services.clone(),
                settings,
                bundle.clone(),
                url,
            )))
        })
    }
}

impl BundleStore for CacheFileSystem {
    fn store_name(&self) -> &'static str {
        Self::NAME
    }

    fn download_options(&self, bundle: &PackageBundle) -> DownloadFileOptions {
        let (main_url, fallback_url) = self.remote_url(bundle.file_name());
        DownloadFileOptions::new(main_url, fallback_url)
            .with_failed_try_again(self.config.failed_try_again)
    }

    fn open_bundle(&self, bundle: &PackageBundle) -> Result<BundleData, String> {
        match self.store.record_of(bundle.bundle_guid()) {
            Some(record) if record.data_file_path.exists() => Ok(BundleData::File(record.data_file_path)),
            Some(record) => Err(CacheError::FileNotFound {
                path: record.data_file_path,
            }
            .to_string()),
            None => Err(CacheError::RecordNotFound {
                guid: bundle.bundle_guid().to_string(),
            }
            .to_string()),
        }
    }
}

impl FileSystem for CacheFileSystem {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn package_name(&self) -> &str {
        &self.config.package_name
    }

    fn file_count(&self) -> usize {
        self.store.file_count()
    }

    fn exists(&self, bundle: &PackageBundle) -> bool {
        self.store.exists(bundle.bundle_guid())
    }

    /// Record a data file placed at its cache path by the host
    fn record_download_file(&self, bundle: &PackageBundle) -> bool {
        if self.store.exists(bundle.bundle_guid()) {
            return true;
        }
        let paths = self.store.paths();
        let data_file_path = paths.data_file_path(bundle);
        let info_file_path = paths.info_file_path(bundle);
        let size = i64::try_from(bundle.file_size).unwrap_or(i64::MAX);
        let element = RecordFileElement::new(info_file_path.clone(), data_file_path, bundle.file_crc, size);
        if let Err(e) = write_info_file(&info_file_path, bundle.file_crc, size) {
            error!("Failed to write cache file ! {}", e);
            return false;
        }
        if !element.verify(FileVerifyLevel::High).is_succeed() {
            element.delete_folder();
            return false;
        }
        self.store.record(bundle.bundle_guid(), element)
    }

    fn initialize(self: Rc<Self>) -> SharedOperation {
        Rc::new(RefCell::new(InitializeCacheOperation::new(self)))
    }

    fn request_package_version(
        self: Rc<Self>,
        append_time_ticks: bool,
        timeout: Option<Duration>,
    ) -> SharedVersionOperation {
        let (mut url, _) = self.remote_url(&version_file_name(&self.config.package_name));
        if append_time_ticks {
            url = with_time_ticks(&url);
        }
        Rc::new(RefCell::new(RemoteVersionOperation::new(
            self.scheduler.backend().clone(),
            url,
            timeout,
        )))
    }

    fn load_package_manifest(
        self: Rc<Self>,
        package_version: &str,
        timeout: Option<Duration>,
    ) -> SharedManifestOperation {
        if package_version.is_empty() {
            return Rc::new(RefCell::new(InstantOperation::new(
                "RemoteManifestOperation",
                Err(crate::errors::ManifestError::EmptyVersion.to_string()),
            )));
        }
        let file_name = manifest_file_name(&self.config.package_name, package_version);
        let (url, _) = self.remote_url(&file_name);
        let cache_path = self
            .store
            .paths()
            .manifest_file_path(&self.config.package_name, package_version);
        Rc::new(RefCell::new(
            RemoteManifestOperation::new(
                self.scheduler.backend().clone(),
                self.manifest_services.clone(),
                self.config.package_name.clone(),
                url,
                timeout,
            )
            .with_cache_path(cache_path),
        ))
    }

    fn load_bundle_file(self: Rc<Self>, bundle: &PackageBundle) -> SharedBundleFileOperation {
        Rc::new(RefCell::new(LoadBundleOperation::new(self, bundle.clone())))
    }

    fn download_file(
        self: Rc<Self>,
        bundle: &PackageBundle,
        options: DownloadFileOptions,
    ) -> Rc<RefCell<BundleDownloadOperation>> {
        let mut options = options;
        match options.import_file_path.as_deref().and_then(file_url) {
            Some(url) => {
                options.main_url = url.clone();
                options.fallback_url = url;
            }
            None => {
                let (main_url, fallback_url) = self.remote_url(bundle.file_name());
                options.main_url = main_url;
                options.fallback_url = fallback_url;
            }
        }
        let source: Rc<dyn TransferSource> = self;
        Rc::new(RefCell::new(BundleDownloadOperation::new(source, bundle.clone(), options)))
    }

    fn clear_cache_files(
        self: Rc<Self>,
        manifest: Option<Rc<PackageManifest>>,
        clear_mode: &str,
        tags: Vec<String>,
    ) -> SharedOperation {
        match clear_mode.parse::<ClearMode>() {
            Ok(mode) => Rc::new(RefCell::new(ClearCacheFilesOperation::new(
                self.store.clone(),
                mode,
                manifest,
                tags,
            ))),
            Err(e) => Rc::new(RefCell::new(InstantOperation::<()>::new(
                "ClearCacheFilesOperation",
                Err(e.to_string()),
            ))),
        }
    }

    fn dispose(&self) {
        self.registration.dispose(&self.scheduler);
    }
}
