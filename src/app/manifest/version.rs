//! Package version request and manifest update
//!
//! Both operations delegate to the main file system and keep its
//! operation as a child, so aborting the parent aborts the request.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{error, info};

use super::types::PackageManifest;
use crate::app::filesystem::{FileSystem, SharedManifestOperation, SharedVersionOperation};
use crate::app::operation::{Operation, OperationCore, SharedOperation, TickContext};
use crate::errors::ManifestError;

/// Manifest currently used to resolve assets
pub type ActiveManifest = Rc<RefCell<Option<Rc<PackageManifest>>>>;

/// Advance a child one step, or drain it while the parent waits
fn drive_child<T: Operation + ?Sized>(child: &RefCell<T>, waiting: bool, ctx: &TickContext) -> bool {
    let Ok(mut child) = child.try_borrow_mut() else {
        return false;
    };
    if waiting {
        child.wait_for_async_complete(ctx);
    } else {
        child.update(ctx);
    }
    child.is_done()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionSteps {
    None,
    RequestPackageVersion,
    Done,
}

/// Ask the main file system for the latest package version
pub struct RequestPackageVersionOperation {
    core: OperationCore,
    file_system: Rc<dyn FileSystem>,
    append_time_ticks: bool,
    timeout: Option<Duration>,
    request: Option<SharedVersionOperation>,
    package_version: String,
    steps: VersionSteps,
}

impl RequestPackageVersionOperation {
    pub fn new(file_system: Rc<dyn FileSystem>, append_time_ticks: bool, timeout: Option<Duration>) -> Self {
        Self {
            core: OperationCore::new("RequestPackageVersionOperation"),
            file_system,
            append_time_ticks,
            timeout,
            request: None,
            package_version: String::new(),
            steps: VersionSteps::None,
        }
    }

    /// Latest version, set once the operation succeeds
    pub fn package_version(&self) -> &str {
        &self.package_version
    }
}

impl Operation for RequestPackageVersionOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = VersionSteps::RequestPackageVersion;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if self.steps != VersionSteps::RequestPackageVersion {
            return;
        }

        let request = match &self.request {
            Some(request) => request.clone(),
            None => {
                let request = self
                    .file_system
                    .clone()
                    .request_package_version(self.append_time_ticks, self.timeout);
                request.borrow_mut().start();
                let child: SharedOperation = request.clone();
                self.core.add_child(child);
                self.request = Some(request.clone());
                request
            }
        };

        if !drive_child(&request, self.core.is_wait_for_async_complete(), ctx) {
            return;
        }

        let request = request.borrow();
        self.steps = VersionSteps::Done;
        if request.status().is_succeed() {
            self.package_version = request.package_version().to_string();
            info!(
                "Package '{}' version : {}",
                self.file_system.package_name(),
                self.package_version
            );
            self.core.succeed();
        } else {
            let message = request.error().to_string();
            error!("{}", message);
            self.core.fail(message);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateSteps {
    None,
    CheckParams,
    CheckActiveManifest,
    LoadPackageManifest,
    Done,
}

/// Make a package version the active manifest
///
/// Succeeds at once when that version is already active; otherwise the
/// manifest is loaded through the main file system and replaces the
/// active one only on success.
pub struct UpdatePackageManifestOperation {
    core: OperationCore,
    file_system: Rc<dyn FileSystem>,
    active: ActiveManifest,
    package_version: String,
    timeout: Option<Duration>,
    load: Option<SharedManifestOperation>,
    steps: UpdateSteps,
}

impl UpdatePackageManifestOperation {
    pub fn new(
        file_system: Rc<dyn FileSystem>,
        active: ActiveManifest,
        package_version: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            core: OperationCore::new("UpdatePackageManifestOperation"),
            file_system,
            active,
            package_version: package_version.into(),
            timeout,
            load: None,
            steps: UpdateSteps::None,
        }
    }

    fn load_package_manifest(&mut self, ctx: &TickContext) {
        let load = match &self.load {
            Some(load) => load.clone(),
            None => {
                let load = self
                    .file_system
                    .clone()
                    .load_package_manifest(&self.package_version, self.timeout);
                load.borrow_mut().start();
                let child: SharedOperation = load.clone();
                self.core.add_child(child);
                self.load = Some(load.clone());
                load
            }
        };

        if !drive_child(&load, self.core.is_wait_for_async_complete(), ctx) {
            return;
        }

        let mut load = load.borrow_mut();
        self.steps = UpdateSteps::Done;
        if !load.status().is_succeed() {
            let message = load.error().to_string();
            error!("{}", message);
            self.core.fail(message);
            return;
        }

        match load.take_manifest() {
            Some(manifest) => {
                *self.active.borrow_mut() = Some(Rc::new(manifest));
                self.core.succeed();
            }
            None => {
                let message = format!("{} returned no manifest", self.file_system.name());
                error!("{}", message);
                self.core.fail(message);
            }
        }
    }
}

impl Operation for UpdatePackageManifestOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = UpdateSteps::CheckParams;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if matches!(self.steps, UpdateSteps::None | UpdateSteps::Done) {
            return;
        }

        if self.steps == UpdateSteps::CheckParams {
            if self.package_version.is_empty() {
                self.steps = UpdateSteps::Done;
                self.core.fail(ManifestError::EmptyVersion.to_string());
                return;
            }
            self.steps = UpdateSteps::CheckActiveManifest;
        }

        if self.steps == UpdateSteps::CheckActiveManifest {
            let already_active = self
                .active
                .borrow()
                .as_ref()
                .is_some_and(|manifest| manifest.package_version == self.package_version);
            if already_active {
                self.steps = UpdateSteps::Done;
                self.core.succeed();
                return;
            }
            self.steps = UpdateSteps::LoadPackageManifest;
        }

        if self.steps == UpdateSteps::LoadPackageManifest {
            self.load_package_manifest(ctx);
        }
    }

    fn description(&self) -> String {
        format!("PackageVersion : {}", self.package_version)
    }
}
