//! Bundle load shared by every file system
//!
//! The load checks presence first and only downloads on a miss, so
//! loading the same bundle twice never downloads it twice.

use std::rc::Rc;

use tracing::{debug, error};

use super::{BundleData, BundleFileOperation, LoadedBundle};
use crate::app::download::{BundleDownloadOperation, DownloadFileOptions, TransferSource};
use crate::app::manifest::PackageBundle;
use crate::app::operation::{Operation, OperationCore, TickContext};

/// File system side of a bundle load
pub trait BundleStore: TransferSource {
    /// Name used in messages
    fn store_name(&self) -> &'static str;

    /// Retry options and URLs for downloading `bundle`
    fn download_options(&self, bundle: &PackageBundle) -> DownloadFileOptions;

    /// Open a present bundle
    fn open_bundle(&self, bundle: &PackageBundle) -> Result<BundleData, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    CheckExists,
    DownloadFile,
    LoadBundleFile,
    Done,
}

/// Load one bundle from a [`BundleStore`]
pub struct LoadBundleOperation<S: BundleStore + 'static> {
    core: OperationCore,
    store: Rc<S>,
    bundle: PackageBundle,
    download: Option<BundleDownloadOperation>,
    result: Option<LoadedBundle>,
    downloaded_bytes: u64,
    download_progress: f32,
    steps: Steps,
}

impl<S: BundleStore + 'static> LoadBundleOperation<S> {
    pub fn new(store: Rc<S>, bundle: PackageBundle) -> Self {
        Self {
            core: OperationCore::new("LoadBundleOperation"),
            store,
            bundle,
            download: None,
            result: None,
            downloaded_bytes: 0,
            download_progress: 0.0,
            steps: Steps::None,
        }
    }

    fn begin_download(&mut self) {
        let source: Rc<dyn TransferSource> = self.store.clone();
        let options = self.store.download_options(&self.bundle);
        let mut download = BundleDownloadOperation::new(source, self.bundle.clone(), options);
        download.start();
        self.download = Some(download);
    }

    fn drive_download(&mut self, ctx: &TickContext) {
        let waiting = self.core.is_wait_for_async_complete();
        let Some(download) = self.download.as_mut() else {
            return;
        };

        if waiting {
            download.wait_for_async_complete(ctx);
        } else {
            download.update(ctx);
        }
        self.downloaded_bytes = download.downloaded_bytes();
        self.download_progress = download.download_progress();
        self.core.set_progress(download.progress());
        if !download.is_done() {
            return;
        }

        if download.status().is_succeed() {
            self.steps = Steps::LoadBundleFile;
        } else {
            let message = download.error().to_string();
            self.steps = Steps::Done;
            self.core.fail(message);
        }
    }
}

impl<S: BundleStore + 'static> Operation for LoadBundleOperation<S> {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = Steps::CheckExists;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if matches!(self.steps, Steps::None | Steps::Done) {
            return;
        }

        if self.steps == Steps::CheckExists {
            if self.store.exists(&self.bundle) {
                self.steps = Steps::LoadBundleFile;
            } else {
                debug!("{} downloading {}", self.store.store_name(), self.bundle.bundle_name);
                self.begin_download();
                self.steps = Steps::DownloadFile;
            }
        }

        if self.steps == Steps::DownloadFile {
            self.drive_download(ctx);
        }

        if self.steps == Steps::LoadBundleFile {
            match self.store.open_bundle(&self.bundle) {
                Ok(data) => {
                    self.result = Some(LoadedBundle {
                        bundle: self.bundle.clone(),
                        data,
                    });
                    self.steps = Steps::Done;
                    self.core.succeed();
                }
                Err(message) => {
                    error!("{}", message);
                    self.steps = Steps::Done;
                    self.core.fail(message);
                }
            }
        }
    }

    fn on_abort(&mut self) {
        if let Some(download) = self.download.as_mut() {
            download.abort();
        }
        self.steps = Steps::Done;
    }

    fn description(&self) -> String {
        self.bundle.bundle_name.clone()
    }
}

impl<S: BundleStore + 'static> BundleFileOperation for LoadBundleOperation<S> {
    fn take_bundle(&mut self) -> Option<LoadedBundle> {
        self.result.take()
    }

    fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    fn download_progress(&self) -> f32 {
        self.download_progress
    }
}
