//! Providers turn loaded bundles into the objects handles expose
//!
//! A provider references its main bundle loader and every dependency
//! loader for its whole life. Handles count against the provider, not the
//! loaders, so a provider with live handles pins all of its bundles.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use tracing::error;

use super::handle::HandleKind;
use super::loader::SharedLoader;
use crate::app::filesystem::LoadedBundle;
use crate::app::operation::{Operation, OperationCore, TickContext};
use crate::errors::ResourceError;

pub type SharedProvider = Rc<RefCell<Provider>>;

/// Live handle count of one provider
///
/// Kept outside the provider's `RefCell` so handles can be released while
/// the provider is being updated.
#[derive(Debug, Default)]
pub struct HandleRefs {
    count: Cell<usize>,
}

impl HandleRefs {
    pub fn count(&self) -> usize {
        self.count.get()
    }

    pub(crate) fn acquire(&self) {
        self.count.set(self.count.get() + 1);
    }

    pub(crate) fn release(&self) {
        self.count.set(self.count.get().saturating_sub(1));
    }
}

/// One asset's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetObject {
    pub asset_path: String,
    pub bytes: Vec<u8>,
}

/// A loaded scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneObject {
    /// File stem of the scene asset
    pub scene_name: String,
    pub asset_path: String,
    pub bytes: Vec<u8>,
}

/// What a finished provider produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResult {
    Asset(AssetObject),
    Scene(SceneObject),
    /// Sub assets or all assets, depending on the provider kind
    Assets(Vec<AssetObject>),
    RawFile(LoadedBundle),
}

/// Aggregated download state of a provider's bundles
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DownloadStatus {
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub is_done: bool,
    pub progress: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    StartBundleLoader,
    WaitBundleLoader,
    ProcessBundleResult,
    Done,
}

/// Loads one asset in one of the handle kinds
pub struct Provider {
    core: OperationCore,
    guid: String,
    kind: HandleKind,
    location: String,
    /// Asset paths sharing the main bundle, for all-assets loads
    bundle_assets: Vec<String>,
    /// Main loader first, then dependency loaders
    loaders: Vec<SharedLoader>,
    refs: Rc<HandleRefs>,
    destroyed: bool,
    result: Option<ProviderResult>,
    steps: Steps,
}

impl Provider {
    /// Create a provider and reference its loaders
    pub fn new(
        guid: String,
        kind: HandleKind,
        location: String,
        bundle_assets: Vec<String>,
        loaders: Vec<SharedLoader>,
    ) -> Self {
        for loader in &loaders {
            loader.borrow_mut().reference();
        }
        Self {
            core: OperationCore::new("Provider"),
            guid,
            kind,
            location,
            bundle_assets,
            loaders,
            refs: Rc::new(HandleRefs::default()),
            destroyed: false,
            result: None,
            steps: Steps::None,
        }
    }

    /// Provider that has already failed, used to hand out failed handles
    pub fn completed(kind: HandleKind, location: &str, error: impl Into<String>) -> Self {
        let mut core = OperationCore::new("CompletedProvider");
        core.fail(error);
        Self {
            core,
            guid: String::new(),
            kind,
            location: location.to_string(),
            bundle_assets: Vec::new(),
            loaders: Vec::new(),
            refs: Rc::new(HandleRefs::default()),
            destroyed: false,
            result: None,
            steps: Steps::Done,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn refs(&self) -> Rc<HandleRefs> {
        self.refs.clone()
    }

    pub fn ref_count(&self) -> usize {
        self.refs.count()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn result(&self) -> Option<&ProviderResult> {
        self.result.as_ref()
    }

    /// No live handles and not decoding
    pub fn can_destroy(&self) -> bool {
        self.steps != Steps::ProcessBundleResult && self.refs.count() == 0
    }

    /// Release every loader; fails the provider if it had not finished
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if !self.core.is_done() {
            self.steps = Steps::Done;
            self.core.fail(ResourceError::ProviderAborted.to_string());
        }
        for loader in &self.loaders {
            loader.borrow_mut().release();
        }
    }

    /// Sum bundle sizes and downloaded bytes over every loader
    pub fn download_status(&self) -> DownloadStatus {
        let mut status = DownloadStatus::default();
        for loader in &self.loaders {
            let loader = loader.borrow();
            status.total_bytes += loader.bundle().file_size;
            status.downloaded_bytes += if loader.result().is_some() {
                loader.bundle().file_size
            } else {
                loader.downloaded_bytes()
            };
        }

        if status.total_bytes == 0 {
            status.is_done = self.core.is_done();
            status.progress = if status.is_done { 1.0 } else { 0.0 };
        } else {
            status.is_done = status.downloaded_bytes >= status.total_bytes;
            status.progress = status.downloaded_bytes as f32 / status.total_bytes as f32;
        }
        status
    }

    fn complete(&mut self, result: Result<ProviderResult, String>) {
        self.steps = Steps::Done;
        match result {
            Ok(result) => {
                self.result = Some(result);
                self.core.succeed();
            }
            Err(message) => {
                error!("{}", message);
                self.core.fail(message);
            }
        }
    }

    fn wait_bundle_loaders(&mut self, ctx: &TickContext) -> bool {
        let waiting = self.core.is_wait_for_async_complete();
        let mut progress = 0.0;
        for loader in &self.loaders {
            let Ok(mut loader) = loader.try_borrow_mut() else {
                continue;
            };
            if waiting {
                loader.wait_for_async_complete(ctx);
            }
            loader.update(ctx);
            progress += loader.progress();
        }
        if !self.loaders.is_empty() {
            self.core.set_progress(progress / self.loaders.len() as f32);
        }

        let mut failure = None;
        for loader in &self.loaders {
            let loader = loader.borrow();
            if !loader.is_done() {
                return false;
            }
            if failure.is_none() && !loader.status().is_succeed() {
                failure = Some(loader.error().to_string());
            }
        }

        match failure {
            Some(message) => {
                self.complete(Err(message));
                false
            }
            None => true,
        }
    }

    fn read(&self, bundle: &LoadedBundle, asset_path: &str) -> Result<AssetObject, String> {
        let bytes = bundle.read_bytes().map_err(|e| {
            ResourceError::DecodeFailed {
                path: asset_path.to_string(),
                reason: e.to_string(),
            }
            .to_string()
        })?;
        Ok(AssetObject {
            asset_path: asset_path.to_string(),
            bytes,
        })
    }

    fn process_bundle_result(&self) -> Result<ProviderResult, String> {
        let bundles: Vec<LoadedBundle> = self
            .loaders
            .iter()
            .filter_map(|loader| loader.borrow().result().cloned())
            .collect();
        let Some(main) = bundles.first() else {
            return Err("Loaded bundle result is null !".to_string());
        };

        match self.kind {
            HandleKind::Asset => self.read(main, &self.location).map(ProviderResult::Asset),
            HandleKind::Scene => {
                let asset = self.read(main, &self.location)?;
                let scene_name = Path::new(&asset.asset_path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                Ok(ProviderResult::Scene(SceneObject {
                    scene_name,
                    asset_path: asset.asset_path,
                    bytes: asset.bytes,
                }))
            }
            HandleKind::SubAssets => {
                let mut objects = vec![self.read(main, &self.location)?];
                for bundle in &bundles[1..] {
                    objects.push(self.read(bundle, &bundle.bundle.bundle_name)?);
                }
                Ok(ProviderResult::Assets(objects))
            }
            HandleKind::AllAssets => {
                let bytes = self.read(main, &self.location)?.bytes;
                let objects = self
                    .bundle_assets
                    .iter()
                    .map(|path| AssetObject {
                        asset_path: path.clone(),
                        bytes: bytes.clone(),
                    })
                    .collect();
                Ok(ProviderResult::Assets(objects))
            }
            HandleKind::RawFile => Ok(ProviderResult::RawFile(main.clone())),
        }
    }
}

impl Operation for Provider {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = Steps::StartBundleLoader;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if matches!(self.steps, Steps::None | Steps::Done) {
            return;
        }

        if self.steps == Steps::StartBundleLoader {
            for loader in &self.loaders {
                loader.borrow_mut().start();
            }
            self.steps = Steps::WaitBundleLoader;
        }

        if self.steps == Steps::WaitBundleLoader {
            if !self.wait_bundle_loaders(ctx) {
                return;
            }
            self.steps = Steps::ProcessBundleResult;
        }

        if self.steps == Steps::ProcessBundleResult {
            let result = self.process_bundle_result();
            self.complete(result);
        }
    }

    fn on_abort(&mut self) {
        self.steps = Steps::Done;
    }

    fn description(&self) -> String {
        format!("AssetPath : {}", self.location)
    }
}
