//! Local directory with simulated downloads
//!
//! Bundles are the files of a source directory and manifests are built
//! from it on request. With virtual download mode on, a bundle must first
//! be "downloaded" through a simulated request running at the configured
//! speed, which exercises download flows without any I/O.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::remote::InstantOperation;
use super::{
    BundleData, BundleStore, FileSystem, LoadBundleOperation, SharedBundleFileOperation,
    SharedManifestOperation, SharedVersionOperation,
};
use crate::app::download::{
    BundleDownloadOperation, DownloadBackend, DownloadFileOptions, DownloadRequest,
    DownloadScheduler, RefCount, RequestStatus, SchedulerLimits, SchedulerRegistration,
    SharedTransfer, SimulateRequestArgs, Transfer, TransferSource,
};
use crate::app::manifest::{ManifestBuilder, PackageBundle, PackageManifest};
use crate::app::operation::{Operation, OperationCore, OperationSystem, SharedOperation, TickContext};
use crate::constants::download::DEFAULT_VIRTUAL_SPEED;
use crate::errors::{CacheError, ConfigError, ManifestError};

/// Version reported when none is configured
pub const EDITOR_PACKAGE_VERSION: &str = "Simulate";

/// Configuration for the editor file system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorFileSystemConfig {
    /// Directory whose files are the package's bundles
    pub package_root: PathBuf,
    pub package_version: String,
    /// Require a simulated download before a bundle counts as present
    pub virtual_download_mode: bool,
    /// Simulated throughput in bytes per second
    pub virtual_download_speed: u64,
}

impl Default for EditorFileSystemConfig {
    fn default() -> Self {
        Self {
            package_root: PathBuf::new(),
            package_version: EDITOR_PACKAGE_VERSION.to_string(),
            virtual_download_mode: false,
            virtual_download_speed: DEFAULT_VIRTUAL_SPEED,
        }
    }
}

impl EditorFileSystemConfig {
    pub fn new(package_root: impl Into<PathBuf>) -> Self {
        Self {
            package_root: package_root.into(),
            ..Default::default()
        }
    }

    pub fn with_package_version(mut self, version: impl Into<String>) -> Self {
        self.package_version = version.into();
        self
    }

    /// Enable virtual downloads at `speed` bytes per second
    pub fn with_virtual_download(mut self, speed: u64) -> Self {
        self.virtual_download_mode = true;
        self.virtual_download_speed = speed;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.package_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "package_root".to_string(),
                value: String::new(),
                reason: "EditorFileSystem root directory is null or empty !".to_string(),
            });
        }
        if self.virtual_download_speed == 0 {
            return Err(ConfigError::InvalidValue {
                field: "virtual_download_speed".to_string(),
                value: "0".to_string(),
                reason: "Speed must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// GUID to bundle name of every virtually downloaded bundle
type RecordTable = Rc<RefCell<HashMap<String, String>>>;

/// Editor implementation of [`FileSystem`]
pub struct EditorFileSystem {
    package_name: String,
    config: EditorFileSystemConfig,
    scheduler: Rc<DownloadScheduler>,
    registration: SchedulerRegistration,
    records: RecordTable,
}

impl EditorFileSystem {
    pub const NAME: &'static str = "EditorFileSystem";

    pub fn new(
        package_name: impl Into<String>,
        config: EditorFileSystemConfig,
        backend: Rc<dyn DownloadBackend>,
        operations: Rc<OperationSystem>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            config,
            scheduler: DownloadScheduler::new(backend, SchedulerLimits::default()),
            registration: SchedulerRegistration::new(operations),
            records: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &EditorFileSystemConfig {
        &self.config
    }

    fn is_present(&self, bundle: &PackageBundle) -> bool {
        !self.config.virtual_download_mode || self.records.borrow().contains_key(bundle.bundle_guid())
    }
}

impl TransferSource for EditorFileSystem {
    fn exists(&self, bundle: &PackageBundle) -> bool {
        self.is_present(bundle)
    }

    fn begin_transfer(&self, bundle: &PackageBundle, url: &str) -> SharedTransfer {
        self.scheduler.download(bundle.bundle_guid(), || {
            Rc::new(RefCell::new(VirtualTransfer::new(
                self.scheduler.backend().clone(),
                self.records.clone(),
                bundle.clone(),
                url,
                self.config.virtual_download_speed,
            )))
        })
    }
}

impl BundleStore for EditorFileSystem {
    fn store_name(&self) -> &'static str {
        Self::NAME
    }

    fn download_options(&self, bundle: &PackageBundle) -> DownloadFileOptions {
        DownloadFileOptions::new(bundle.bundle_name.clone(), bundle.bundle_name.clone())
            .with_failed_try_again(u32::MAX)
    }

    fn open_bundle(&self, bundle: &PackageBundle) -> Result<BundleData, String> {
        let path = self.config.package_root.join(&bundle.bundle_name);
        if path.is_file() {
            Ok(BundleData::File(path))
        } else {
            Err(CacheError::FileNotFound { path }.to_string())
        }
    }
}

impl FileSystem for EditorFileSystem {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn file_count(&self) -> usize {
        0
    }

    fn exists(&self, bundle: &PackageBundle) -> bool {
        self.is_present(bundle)
    }

    fn record_download_file(&self, bundle: &PackageBundle) -> bool {
        self.records
            .borrow_mut()
            .entry(bundle.bundle_guid().to_string())
            .or_insert_with(|| bundle.bundle_name.clone());
        true
    }

    fn initialize(self: Rc<Self>) -> SharedOperation {
        let root = &self.config.package_root;
        let result = if root.is_dir() {
            self.registration.start(&self.scheduler);
            Ok(())
        } else {
            Err(format!("{} root directory {} does not exist !", Self::NAME, root.display()))
        };
        Rc::new(RefCell::new(InstantOperation::new("InitializeEditorOperation", result)))
    }

    fn request_package_version(
        self: Rc<Self>,
        _append_time_ticks: bool,
        _timeout: Option<Duration>,
    ) -> SharedVersionOperation {
        let version = &self.config.package_version;
        let result = if version.is_empty() {
            Err(ManifestError::EmptyVersion.to_string())
        } else {
            Ok(version.clone())
        };
        Rc::new(RefCell::new(InstantOperation::new("EditorVersionOperation", result)))
    }

    fn load_package_manifest(
        self: Rc<Self>,
        package_version: &str,
        _timeout: Option<Duration>,
    ) -> SharedManifestOperation {
        let result = ManifestBuilder::new(self.package_name.clone(), package_version)
            .build(&self.config.package_root)
            .map_err(|e| e.to_string());
        Rc::new(RefCell::new(InstantOperation::new("EditorManifestOperation", result)))
    }

    fn load_bundle_file(self: Rc<Self>, bundle: &PackageBundle) -> SharedBundleFileOperation {
        Rc::new(RefCell::new(LoadBundleOperation::new(self, bundle.clone())))
    }

    fn download_file(
        self: Rc<Self>,
        bundle: &PackageBundle,
        options: DownloadFileOptions,
    ) -> Rc<RefCell<BundleDownloadOperation>> {
        let options = DownloadFileOptions {
            main_url: bundle.bundle_name.clone(),
            fallback_url: bundle.bundle_name.clone(),
            ..options
        };
        let source: Rc<dyn TransferSource> = self;
        Rc::new(RefCell::new(BundleDownloadOperation::new(source, bundle.clone(), options)))
    }

    fn clear_cache_files(
        self: Rc<Self>,
        _manifest: Option<Rc<PackageManifest>>,
        _clear_mode: &str,
        _tags: Vec<String>,
    ) -> SharedOperation {
        Rc::new(RefCell::new(InstantOperation::new("ClearCacheFilesOperation", Ok(()))))
    }

    fn dispose(&self) {
        self.registration.dispose(&self.scheduler);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    CreateRequest,
    CheckRequest,
    Done,
}

/// Simulated bundle download
pub struct VirtualTransfer {
    core: OperationCore,
    backend: Rc<dyn DownloadBackend>,
    records: RecordTable,
    bundle: PackageBundle,
    url: String,
    speed: u64,
    refs: RefCount,
    request: Option<Box<dyn DownloadRequest>>,
    downloaded_bytes: u64,
    download_progress: f32,
    steps: Steps,
}

impl VirtualTransfer {
    fn new(
        backend: Rc<dyn DownloadBackend>,
        records: RecordTable,
        bundle: PackageBundle,
        url: &str,
        speed: u64,
    ) -> Self {
        Self {
            core: OperationCore::new("VirtualTransfer"),
            backend,
            records,
            bundle,
            url: url.to_string(),
            speed,
            refs: RefCount::default(),
            request: None,
            downloaded_bytes: 0,
            download_progress: 0.0,
            steps: Steps::None,
        }
    }
}

impl Operation for VirtualTransfer {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = Steps::CreateRequest;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if self.steps == Steps::CreateRequest {
            let args = SimulateRequestArgs::new(self.url.clone(), self.bundle.file_size, self.speed);
            let mut request = self.backend.create_simulate_request(args);
            request.send_request();
            self.request = Some(request);
            self.steps = Steps::CheckRequest;
        }

        if self.steps == Steps::CheckRequest {
            let Some(request) = self.request.as_mut() else {
                return;
            };
            request.poll_request(ctx.delta());
            self.downloaded_bytes = request.downloaded_bytes();
            self.download_progress = request.download_progress();
            self.core.set_progress(self.download_progress);
            if !request.is_done() {
                return;
            }

            self.steps = Steps::Done;
            if request.status() == RequestStatus::Succeed {
                debug!("Simulated download of {} finished", self.bundle.bundle_name);
                self.records
                    .borrow_mut()
                    .insert(self.bundle.bundle_guid().to_string(), self.bundle.bundle_name.clone());
                self.core.succeed();
            } else {
                let message = request.error().to_string();
                self.core.fail(message);
            }
        }
    }

    fn on_abort(&mut self) {
        if let Some(request) = self.request.as_mut() {
            request.abort_request();
        }
        self.steps = Steps::Done;
    }

    /// Simulated downloads only advance with frame time
    fn on_wait(&mut self, _ctx: &TickContext) {
        if self.steps != Steps::Done {
            if let Some(request) = self.request.as_mut() {
                request.abort_request();
            }
            self.steps = Steps::Done;
            let message = format!("Try load bundle {} from remote !", self.bundle.bundle_name);
            error!("{}", message);
            self.core.fail(message);
        }
    }
}

impl Transfer for VirtualTransfer {
    fn url(&self) -> &str {
        &self.url
    }

    fn reference(&mut self) {
        self.refs.reference();
    }

    fn release(&mut self) {
        self.refs.release();
    }

    fn ref_count(&self) -> i32 {
        self.refs.get()
    }

    fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    fn download_progress(&self) -> f32 {
        self.download_progress
    }
}
