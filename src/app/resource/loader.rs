//! Shared per-bundle loader
//!
//! One [`BundleLoader`] exists per loaded bundle. Providers reference the
//! loaders they need; a loader can only be destroyed once nothing
//! references it and it is not in the middle of loading.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, error};

use crate::app::filesystem::{FileSystem, LoadedBundle, SharedBundleFileOperation};
use crate::app::manifest::PackageBundle;
use crate::app::operation::{Operation, OperationCore, SharedOperation, TickContext};
use crate::errors::{ResourceError, ResourceResult};

pub type SharedLoader = Rc<RefCell<BundleLoader>>;

/// Number of bundles in the load step, against a limit
#[derive(Debug)]
pub struct LoadingCounter {
    current: Cell<usize>,
    max: usize,
}

impl LoadingCounter {
    pub fn new(max: usize) -> Self {
        Self {
            current: Cell::new(0),
            max,
        }
    }

    pub fn current(&self) -> usize {
        self.current.get()
    }

    pub fn is_busy(&self) -> bool {
        self.current.get() >= self.max
    }

    fn increment(&self) {
        self.current.set(self.current.get() + 1);
    }

    fn decrement(&self) {
        self.current.set(self.current.get().saturating_sub(1));
    }
}

/// Lifecycle of a loader as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Created,
    /// Waiting for a loading slot or loading the bundle
    Loading,
    /// Finished loading, successfully or not
    Loaded,
    Unloading,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    CheckConcurrency,
    LoadBundleFile,
    Done,
}

/// Loads one bundle through the file system on behalf of providers
pub struct BundleLoader {
    core: OperationCore,
    bundle: PackageBundle,
    file_system: Rc<dyn FileSystem>,
    counter: Rc<LoadingCounter>,
    load: Option<SharedBundleFileOperation>,
    providers: Vec<String>,
    ref_count: i32,
    unloading: bool,
    destroyed: bool,
    reference_guids: Vec<String>,
    result: Option<LoadedBundle>,
    downloaded_bytes: u64,
    download_progress: f32,
    steps: Steps,
}

impl BundleLoader {
    pub fn new(
        bundle: PackageBundle,
        file_system: Rc<dyn FileSystem>,
        counter: Rc<LoadingCounter>,
    ) -> Self {
        Self {
            core: OperationCore::new("BundleLoader"),
            bundle,
            file_system,
            counter,
            load: None,
            providers: Vec::new(),
            ref_count: 0,
            unloading: false,
            destroyed: false,
            reference_guids: Vec::new(),
            result: None,
            downloaded_bytes: 0,
            download_progress: 0.0,
            steps: Steps::None,
        }
    }

    /// GUIDs of the bundles that depend on this one
    pub fn with_reference_guids(mut self, guids: Vec<String>) -> Self {
        self.reference_guids = guids;
        self
    }

    pub fn bundle(&self) -> &PackageBundle {
        &self.bundle
    }

    /// Bundles that must be destroyed before this one
    pub fn reference_guids(&self) -> &[String] {
        &self.reference_guids
    }

    pub fn state(&self) -> LoaderState {
        if self.destroyed {
            return LoaderState::Destroyed;
        }
        if self.unloading {
            return LoaderState::Unloading;
        }
        match self.steps {
            Steps::None => LoaderState::Created,
            Steps::CheckConcurrency | Steps::LoadBundleFile => LoaderState::Loading,
            Steps::Done => LoaderState::Loaded,
        }
    }

    /// Loaded bundle, once the load succeeded
    pub fn result(&self) -> Option<&LoadedBundle> {
        self.result.as_ref()
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn download_progress(&self) -> f32 {
        self.download_progress
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count
    }

    pub fn reference(&mut self) {
        self.ref_count += 1;
    }

    pub fn release(&mut self) {
        self.ref_count -= 1;
    }

    /// Attach a provider whose main bundle this is
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::LoaderUnloading` once unloading has begun
    pub fn add_provider(&mut self, guid: &str) -> ResourceResult<()> {
        if matches!(self.state(), LoaderState::Unloading | LoaderState::Destroyed) {
            return Err(ResourceError::LoaderUnloading {
                bundle: self.bundle.bundle_name.clone(),
            });
        }
        if !self.providers.iter().any(|p| p == guid) {
            self.providers.push(guid.to_string());
        }
        Ok(())
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub fn remove_provider(&mut self, guid: &str) {
        self.providers.retain(|p| p != guid);
    }

    /// Not loading and not referenced
    pub fn can_destroy(&self) -> bool {
        self.steps != Steps::LoadBundleFile && self.ref_count <= 0 && !self.destroyed
    }

    /// Refuse new providers from now on
    pub fn begin_unload(&mut self) {
        self.unloading = true;
    }

    /// Drop the loaded bundle and mark the loader destroyed
    ///
    /// # Errors
    ///
    /// Returns an error while the bundle is loading or still referenced
    pub fn destroy(&mut self) -> ResourceResult<()> {
        if self.steps == Steps::LoadBundleFile {
            return Err(ResourceError::LoaderStillLoading {
                bundle: self.bundle.bundle_name.clone(),
            });
        }
        if self.ref_count > 0 {
            return Err(ResourceError::LoaderReferenced {
                bundle: self.bundle.bundle_name.clone(),
                ref_count: self.ref_count,
            });
        }

        self.destroyed = true;
        self.result = None;
        if !self.core.is_done() {
            self.steps = Steps::Done;
            self.core.fail(ResourceError::LoaderDestroyed.to_string());
        }
        debug!("Bundle loader {} destroyed", self.bundle.bundle_name);
        Ok(())
    }

    /// Destroy regardless of references, aborting a running load
    pub fn force_destroy(&mut self) {
        if self.steps == Steps::LoadBundleFile {
            if let Some(load) = &self.load {
                if let Ok(mut load) = load.try_borrow_mut() {
                    load.abort();
                }
            }
            self.counter.decrement();
        }
        self.steps = Steps::Done;
        self.destroyed = true;
        self.result = None;
        self.core.fail(ResourceError::LoaderDestroyed.to_string());
    }

    /// Stop a loader that is waiting for a slot, or abort its download
    pub fn try_abort(&mut self) {
        if self.core.is_done() {
            return;
        }
        match self.steps {
            Steps::CheckConcurrency => {
                self.steps = Steps::Done;
                self.core.fail(ResourceError::LoaderAborted.to_string());
            }
            Steps::LoadBundleFile => {
                if let Some(load) = &self.load {
                    if let Ok(mut load) = load.try_borrow_mut() {
                        load.abort();
                    }
                }
            }
            _ => {}
        }
    }

    fn load_bundle_file(&mut self, ctx: &TickContext) {
        let waiting = self.core.is_wait_for_async_complete();
        let load = match &self.load {
            Some(load) => load.clone(),
            None => {
                self.counter.increment();
                let load = self.file_system.clone().load_bundle_file(&self.bundle);
                load.borrow_mut().start();
                let child: SharedOperation = load.clone();
                self.core.add_child(child);
                self.load = Some(load.clone());
                load
            }
        };

        let Ok(mut load) = load.try_borrow_mut() else {
            return;
        };
        if waiting {
            load.wait_for_async_complete(ctx);
        }
        load.update(ctx);
        self.downloaded_bytes = load.downloaded_bytes();
        self.download_progress = load.download_progress();
        self.core.set_progress(load.progress());
        if !load.is_done() {
            return;
        }

        self.steps = Steps::Done;
        self.counter.decrement();
        if load.status().is_succeed() {
            match load.take_bundle() {
                Some(bundle) => {
                    self.result = Some(bundle);
                    self.core.succeed();
                }
                None => {
                    let message = ResourceError::EmptyLoaderResult {
                        bundle: self.bundle.bundle_name.clone(),
                    }
                    .to_string();
                    error!("{}", message);
                    self.core.fail(message);
                }
            }
        } else {
            let message = load.error().to_string();
            error!("{}", message);
            self.core.fail(message);
        }
    }
}

impl Operation for BundleLoader {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = Steps::CheckConcurrency;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if matches!(self.steps, Steps::None | Steps::Done) {
            return;
        }

        if self.steps == Steps::CheckConcurrency {
            if !self.core.is_wait_for_async_complete() && self.counter.is_busy() {
                return;
            }
            self.steps = Steps::LoadBundleFile;
        }

        if self.steps == Steps::LoadBundleFile {
            self.load_bundle_file(ctx);
        }
    }

    fn description(&self) -> String {
        format!("BundleName : {}", self.bundle.bundle_name)
    }
}
