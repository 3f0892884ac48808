//! Built-in files served by a web server
//!
//! The server root carries a catalog listing which bundles it hosts.
//! Initialization loads the catalog; bundles are fetched as bytes from
//! `{root}/{file name}` and kept in memory once loaded. Nothing touches
//! the local disk.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::catalog::LoadCatalogOperation;
use super::remote::{with_time_ticks, InstantOperation, RemoteManifestOperation, RemoteVersionOperation};
use super::{
    BundleData, BundleStore, FileSystem, LoadBundleOperation, SharedBundleFileOperation,
    SharedManifestOperation, SharedVersionOperation,
};
use crate::app::download::{
    BundleDownloadOperation, BundleRequestArgs, DownloadBackend, DownloadFileOptions,
    DownloadRequest, DownloadScheduler, RefCount, RequestStatus, SchedulerLimits,
    SchedulerRegistration, SharedTransfer, Transfer, TransferSource,
};
use crate::app::manifest::{join_url, ManifestServices, PackageBundle, PackageManifest, PlainManifestServices};
use crate::app::operation::{Operation, OperationCore, OperationSystem, SharedOperation, TickContext};
use crate::constants::download::DEFAULT_DATA_TIMEOUT;
use crate::constants::manifest::{catalog_file_name, manifest_file_name, version_file_name};

/// Bundle payloads fetched so far, keyed by GUID
type PayloadTable = Rc<RefCell<HashMap<String, Vec<u8>>>>;

/// Web server implementation of [`FileSystem`]
pub struct WebServerFileSystem {
    package_name: String,
    root_url: String,
    failed_try_again: u32,
    scheduler: Rc<DownloadScheduler>,
    registration: SchedulerRegistration,
    manifest_services: Rc<dyn ManifestServices>,
    catalog: RefCell<HashMap<String, String>>,
    payloads: PayloadTable,
}

impl WebServerFileSystem {
    pub const NAME: &'static str = "WebServerFileSystem";

    pub fn new(
        package_name: impl Into<String>,
        root_url: impl Into<String>,
        backend: Rc<dyn DownloadBackend>,
        operations: Rc<OperationSystem>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            root_url: root_url.into(),
            failed_try_again: crate::constants::download::DEFAULT_FAILED_TRY_AGAIN,
            scheduler: DownloadScheduler::new(backend, SchedulerLimits::default()),
            registration: SchedulerRegistration::new(operations),
            manifest_services: Rc::new(PlainManifestServices),
            catalog: RefCell::new(HashMap::new()),
            payloads: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn with_manifest_services(mut self, services: Rc<dyn ManifestServices>) -> Self {
        self.manifest_services = services;
        self
    }

    pub fn with_failed_try_again(mut self, failed_try_again: u32) -> Self {
        self.failed_try_again = failed_try_again;
        self
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Server path of a built-in bundle, if the catalog lists it
    pub fn web_file_url(&self, bundle: &PackageBundle) -> Option<String> {
        self.catalog
            .borrow()
            .get(bundle.bundle_guid())
            .map(|file_name| join_url(&self.root_url, file_name))
    }

    fn start_scheduler(&self) {
        self.registration.start(&self.scheduler);
    }

    fn backend(&self) -> Rc<dyn DownloadBackend> {
        self.scheduler.backend().clone()
    }
}

impl TransferSource for WebServerFileSystem {
    /// A bundle counts as present once its payload has been fetched
    fn exists(&self, bundle: &PackageBundle) -> bool {
        self.payloads.borrow().contains_key(bundle.bundle_guid())
    }

    fn begin_transfer(&self, bundle: &PackageBundle, url: &str) -> SharedTransfer {
        self.scheduler.download(bundle.bundle_guid(), || {
            Rc::new(RefCell::new(WebTransfer::new(
                self.backend(),
                self.payloads.clone(),
                bundle.clone(),
                url,
            )))
        })
    }
}

impl BundleStore for WebServerFileSystem {
    fn store_name(&self) -> &'static str {
        Self::NAME
    }

    fn download_options(&self, bundle: &PackageBundle) -> DownloadFileOptions {
        let url = self
            .web_file_url(bundle)
            .unwrap_or_else(|| join_url(&self.root_url, bundle.file_name()));
        DownloadFileOptions::new(url.clone(), url).with_failed_try_again(self.failed_try_again)
    }

    fn open_bundle(&self, bundle: &PackageBundle) -> Result<BundleData, String> {
        self.payloads
            .borrow()
            .get(bundle.bundle_guid())
            .map(|bytes| BundleData::Bytes(bytes.clone()))
            .ok_or_else(|| format!("{} has no payload for {}", Self::NAME, bundle.bundle_name))
    }
}

impl FileSystem for WebServerFileSystem {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn file_count(&self) -> usize {
        self.catalog.borrow().len()
    }

    /// Built-in presence according to the catalog
    fn exists(&self, bundle: &PackageBundle) -> bool {
        self.catalog.borrow().contains_key(bundle.bundle_guid())
    }

    fn need_download(&self, _bundle: &PackageBundle) -> bool {
        false
    }

    fn record_download_file(&self, bundle: &PackageBundle) -> bool {
        FileSystem::exists(self, bundle)
    }

    fn initialize(self: Rc<Self>) -> SharedOperation {
        Rc::new(RefCell::new(InitializeWebOperation::new(self)))
    }

    fn request_package_version(
        self: Rc<Self>,
        append_time_ticks: bool,
        timeout: Option<Duration>,
    ) -> SharedVersionOperation {
        let mut url = join_url(&self.root_url, &version_file_name(&self.package_name));
        if append_time_ticks {
            url = with_time_ticks(&url);
        }
        Rc::new(RefCell::new(RemoteVersionOperation::new(self.backend(), url, timeout)))
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
        let url = join_url(
            &self.root_url,
            &manifest_file_name(&self.package_name, package_version),
        );
        Rc::new(RefCell::new(RemoteManifestOperation::new(
            self.backend(),
            self.manifest_services.clone(),
            self.package_name.clone(),
            url,
            timeout,
        )))
    }

    fn load_bundle_file(self: Rc<Self>, bundle: &PackageBundle) -> SharedBundleFileOperation {
        Rc::new(RefCell::new(LoadBundleOperation::new(self, bundle.clone())))
    }

    fn download_file(
        self: Rc<Self>,
        bundle: &PackageBundle,
        options: DownloadFileOptions,
    ) -> Rc<RefCell<BundleDownloadOperation>> {
        let defaults = self.download_options(bundle);
        let options = DownloadFileOptions {
            main_url: defaults.main_url,
            fallback_url: defaults.fallback_url,
            ..options
        };
        let source: Rc<dyn TransferSource> = self;
        Rc::new(RefCell::new(BundleDownloadOperation::new(source, bundle.clone(), options)))
    }

    /// Nothing is cached on disk, so clearing always succeeds
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
        self.payloads.borrow_mut().clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitSteps {
    None,
    LoadCatalogFile,
    Done,
}

/// Load the catalog, then start scheduling transfers
pub struct InitializeWebOperation {
    core: OperationCore,
    file_system: Rc<WebServerFileSystem>,
    load_catalog: Option<LoadCatalogOperation>,
    steps: InitSteps,
}

impl InitializeWebOperation {
    pub fn new(file_system: Rc<WebServerFileSystem>) -> Self {
        Self {
            core: OperationCore::new("InitializeWebOperation"),
            file_system,
            load_catalog: None,
            steps: InitSteps::None,
        }
    }
}

impl Operation for InitializeWebOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = InitSteps::LoadCatalogFile;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if self.steps != InitSteps::LoadCatalogFile {
            return;
        }

        let file_system = self.file_system.clone();
        let load_catalog = self.load_catalog.get_or_insert_with(|| {
            let url = join_url(file_system.root_url(), &catalog_file_name(&file_system.package_name));
            let mut operation = LoadCatalogOperation::new(
                file_system.backend(),
                url,
                file_system.package_name.clone(),
                Some(DEFAULT_DATA_TIMEOUT),
            );
            operation.start();
            operation
        });

        load_catalog.update(ctx);
        self.core.set_progress(load_catalog.progress());
        if !load_catalog.is_done() {
            return;
        }

        self.steps = InitSteps::Done;
        if !load_catalog.status().is_succeed() {
            let message = load_catalog.error().to_string();
            error!("{}", message);
            self.core.fail(message);
            return;
        }

        if let Some(catalog) = load_catalog.take_catalog() {
            file_system.catalog.borrow_mut().extend(catalog.into_map());
        }
        info!(
            "Package '{}' buildin catalog files count : {}",
            file_system.package_name,
            file_system.file_count()
        );
        file_system.start_scheduler();
        self.core.succeed();
    }

    fn on_abort(&mut self) {
        if let Some(load_catalog) = self.load_catalog.as_mut() {
            load_catalog.abort();
        }
        self.steps = InitSteps::Done;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferSteps {
    None,
    CreateRequest,
    CheckRequest,
    Done,
}

/// Fetch one bundle into memory, checking its CRC
pub struct WebTransfer {
    core: OperationCore,
    backend: Rc<dyn DownloadBackend>,
    payloads: PayloadTable,
    bundle: PackageBundle,
    url: String,
    refs: RefCount,
    request: Option<Box<dyn DownloadRequest>>,
    downloaded_bytes: u64,
    download_progress: f32,
    steps: TransferSteps,
}

impl WebTransfer {
    fn new(backend: Rc<dyn DownloadBackend>, payloads: PayloadTable, bundle: PackageBundle, url: &str) -> Self {
        Self {
            core: OperationCore::new("WebTransfer"),
            backend,
            payloads,
            bundle,
            url: url.to_string(),
            refs: RefCount::default(),
            request: None,
            downloaded_bytes: 0,
            download_progress: 0.0,
            steps: TransferSteps::None,
        }
    }
}

impl Operation for WebTransfer {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = TransferSteps::CreateRequest;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if self.steps == TransferSteps::CreateRequest {
            let args = BundleRequestArgs::new(self.url.clone()).with_crc(self.bundle.file_crc);
            let mut request = self.backend.create_bundle_request(args);
            request.send_request();
            self.request = Some(request);
            self.steps = TransferSteps::CheckRequest;
        }

        if self.steps == TransferSteps::CheckRequest {
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

            self.steps = TransferSteps::Done;
            if request.status() != RequestStatus::Succeed {
                let message = request.error().to_string();
                self.core.fail(message);
                return;
            }
            let payload = request.take_data().unwrap_or_default();
            debug!("Fetched {} ({} bytes)", self.bundle.bundle_name, payload.len());
            self.payloads
                .borrow_mut()
                .insert(self.bundle.bundle_guid().to_string(), payload);
            self.core.succeed();
        }
    }

    fn on_abort(&mut self) {
        if let Some(request) = self.request.as_mut() {
            request.abort_request();
        }
        self.steps = TransferSteps::Done;
    }

    /// Web transfers cannot complete on a blocked thread
    fn on_wait(&mut self, _ctx: &TickContext) {
        if self.steps != TransferSteps::Done {
            if let Some(request) = self.request.as_mut() {
                request.abort_request();
            }
            self.steps = TransferSteps::Done;
            let message = format!("Try load bundle {} from remote !", self.bundle.bundle_name);
            error!("{}", message);
            self.core.fail(message);
        }
    }

    fn description(&self) -> String {
        format!("{} <- {}", self.bundle.bundle_name, self.url)
    }
}

impl Transfer for WebTransfer {
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
