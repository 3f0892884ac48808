//! Resource manager: providers and the loader arena of one package
//!
//! Loads resolve a location through the active manifest, reuse or create
//! the provider for that asset and kind, and hand out a fresh handle.
//! Loaders live in an arena keyed by bundle GUID and are shared by every
//! provider that needs the bundle.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, error, info};

use super::config::ResourceConfig;
use super::handle::{
    AllAssetsHandle, AnyHandle, AssetHandle, HandleFactory, HandleKind, RawFileHandle, SceneHandle,
    SubAssetsHandle,
};
use super::loader::{BundleLoader, LoaderState, LoadingCounter, SharedLoader};
use super::provider::{Provider, SharedProvider};
use super::unload::UnloadUnusedAssetsOperation;
use crate::app::filesystem::FileSystem;
use crate::app::manifest::{ActiveManifest, PackageAsset, PackageManifest};
use crate::app::operation::{Operation, OperationSystem};
use crate::errors::{ConfigResult, ResourceError, ResourceResult};

/// Live providers and loaders
#[derive(Default)]
pub struct ResourceState {
    loaders: HashMap<String, SharedLoader>,
    providers: HashMap<String, SharedProvider>,
}

impl ResourceState {
    pub fn loader_count(&self) -> usize {
        self.loaders.len()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    fn loader_for(
        &mut self,
        manifest: &PackageManifest,
        bundle_id: usize,
        file_system: &Rc<dyn FileSystem>,
        counter: &Rc<LoadingCounter>,
    ) -> SharedLoader {
        let bundle = &manifest.bundle_list[bundle_id];
        if let Some(loader) = self.loaders.get(bundle.bundle_guid()) {
            if !matches!(loader.borrow().state(), LoaderState::Unloading | LoaderState::Destroyed) {
                return loader.clone();
            }
        }

        let references = bundle
            .reference_bundle_ids()
            .iter()
            .map(|id| manifest.bundle_list[*id].bundle_guid().to_string())
            .collect();
        let loader = Rc::new(RefCell::new(
            BundleLoader::new(bundle.clone(), file_system.clone(), counter.clone())
                .with_reference_guids(references),
        ));
        self.loaders.insert(bundle.bundle_guid().to_string(), loader.clone());
        loader
    }

    /// Destroy the unreferenced providers attached to `loader`
    fn try_destroy_providers(&mut self, loader: &SharedLoader) {
        let guids = loader.borrow().providers().to_vec();
        for guid in guids {
            let Some(provider) = self.providers.get(&guid).cloned() else {
                loader.borrow_mut().remove_provider(&guid);
                continue;
            };
            let Ok(mut provider) = provider.try_borrow_mut() else {
                continue;
            };
            if !provider.can_destroy() {
                continue;
            }
            provider.destroy();
            drop(provider);

            loader.borrow_mut().remove_provider(&guid);
            self.providers.remove(&guid);
        }
    }

    fn destroy_loader(&mut self, guid: &str) -> bool {
        let Some(loader) = self.loaders.remove(guid) else {
            return false;
        };
        let mut loader = loader.borrow_mut();
        loader.begin_unload();
        if let Err(e) = loader.destroy() {
            error!("{}", e);
            return false;
        }
        true
    }

    /// Unreferenced, not loading, and every bundle depending on it gone
    ///
    /// Bundles referencing each other are never collected.
    fn can_destroy(&self, guid: &str) -> bool {
        let Some(Ok(loader)) = self.loaders.get(guid).map(|loader| loader.try_borrow()) else {
            return false;
        };
        loader.can_destroy()
            && loader
                .reference_guids()
                .iter()
                .all(|reference| self.is_destroyed(reference))
    }

    fn is_destroyed(&self, guid: &str) -> bool {
        match self.loaders.get(guid) {
            Some(loader) => loader
                .try_borrow()
                .map(|loader| loader.state() == LoaderState::Destroyed)
                .unwrap_or(false),
            None => true,
        }
    }

    /// One collection pass: providers first, then loaders; returns the
    /// number of loaders destroyed
    pub(crate) fn collect_unused(&mut self) -> usize {
        let loaders: Vec<SharedLoader> = self.loaders.values().cloned().collect();
        for loader in &loaders {
            self.try_destroy_providers(loader);
        }

        let removable: Vec<String> = self
            .loaders
            .keys()
            .filter(|guid| self.can_destroy(guid))
            .cloned()
            .collect();
        removable.iter().filter(|guid| self.destroy_loader(guid)).count()
    }

    /// Collect the bundles of one asset only
    fn collect_asset(&mut self, manifest: &PackageManifest, asset: &PackageAsset) {
        let main_guid = manifest.main_bundle(asset).bundle_guid().to_string();
        if let Some(main) = self.loaders.get(&main_guid).cloned() {
            self.try_destroy_providers(&main);
            if self.can_destroy(&main_guid) {
                self.destroy_loader(&main_guid);
            }
        }

        for bundle in manifest.depend_bundles(asset) {
            if self.can_destroy(bundle.bundle_guid()) {
                self.destroy_loader(bundle.bundle_guid());
            }
        }
    }

    /// Destroy everything regardless of references
    fn clear(&mut self) {
        for (_, provider) in self.providers.drain() {
            if let Ok(mut provider) = provider.try_borrow_mut() {
                provider.destroy();
            }
        }
        for (_, loader) in self.loaders.drain() {
            if let Ok(mut loader) = loader.try_borrow_mut() {
                loader.force_destroy();
            }
        }
    }
}

/// Loads assets of one package and tracks what is resident
pub struct ResourceManager {
    package_name: String,
    config: ResourceConfig,
    file_system: Rc<dyn FileSystem>,
    manifest: ActiveManifest,
    operations: Rc<OperationSystem>,
    factory: HandleFactory,
    counter: Rc<LoadingCounter>,
    state: Rc<RefCell<ResourceState>>,
    locked: Cell<bool>,
    scene_index: Cell<u64>,
}

impl ResourceManager {
    /// Create a manager over the package's main file system
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an invalid configuration
    pub fn new(
        package_name: impl Into<String>,
        config: ResourceConfig,
        file_system: Rc<dyn FileSystem>,
        manifest: ActiveManifest,
        operations: Rc<OperationSystem>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            package_name: package_name.into(),
            counter: Rc::new(LoadingCounter::new(config.bundle_loading_max_concurrency)),
            config,
            file_system,
            manifest,
            operations,
            factory: HandleFactory::default(),
            state: Rc::new(RefCell::new(ResourceState::default())),
            locked: Cell::new(false),
            scene_index: Cell::new(0),
        })
    }

    pub fn with_handle_factory(mut self, factory: HandleFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Make every new load fail until unlocked
    pub fn lock_load_operation(&self, locked: bool) {
        self.locked.set(locked);
    }

    pub fn is_load_locked(&self) -> bool {
        self.locked.get()
    }

    /// Load `location` as `kind`
    ///
    /// Resolution failures do not return `Err`: they produce a handle
    /// that is already failed with the reason.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::UnsupportedHandleKind` when the factory has
    /// no constructor for `kind`
    pub fn load_handle(&self, kind: HandleKind, location: &str, priority: u32) -> ResourceResult<AnyHandle> {
        if !self.factory.supports(kind) {
            return Err(ResourceError::UnsupportedHandleKind {
                kind: kind.to_string(),
            });
        }

        let provider = match self.provider_for(kind, location) {
            Ok(provider) => provider,
            Err(e) => {
                let message = e.to_string();
                error!("Failed to load {} {} ! {}", kind, location, message);
                let provider = Rc::new(RefCell::new(Provider::completed(kind, location, message)));
                self.operations.start_operation(provider.clone());
                provider
            }
        };
        if let Ok(mut provider) = provider.try_borrow_mut() {
            provider.core_mut().set_priority(priority);
        }
        self.factory.create(&provider, kind)
    }

    pub fn load_asset(&self, location: &str, priority: u32) -> ResourceResult<AssetHandle> {
        self.load_handle(HandleKind::Asset, location, priority)?.into_typed()
    }

    /// Load a scene; every call gets its own provider
    pub fn load_scene(&self, location: &str, priority: u32) -> ResourceResult<SceneHandle> {
        self.load_handle(HandleKind::Scene, location, priority)?.into_typed()
    }

    pub fn load_sub_assets(&self, location: &str, priority: u32) -> ResourceResult<SubAssetsHandle> {
        self.load_handle(HandleKind::SubAssets, location, priority)?.into_typed()
    }

    pub fn load_all_assets(&self, location: &str, priority: u32) -> ResourceResult<AllAssetsHandle> {
        self.load_handle(HandleKind::AllAssets, location, priority)?.into_typed()
    }

    pub fn load_raw_file(&self, location: &str, priority: u32) -> ResourceResult<RawFileHandle> {
        self.load_handle(HandleKind::RawFile, location, priority)?.into_typed()
    }

    fn active_manifest(&self) -> ResourceResult<Rc<PackageManifest>> {
        self.manifest
            .borrow()
            .clone()
            .ok_or_else(|| ResourceError::NoActiveManifest {
                package: self.package_name.clone(),
            })
    }

    fn resolve(&self, location: &str) -> ResourceResult<(Rc<PackageManifest>, PackageAsset)> {
        let manifest = self.active_manifest()?;
        let asset = manifest
            .asset(location)
            .cloned()
            .ok_or_else(|| ResourceError::AssetNotFound {
                path: location.to_string(),
            })?;
        Ok((manifest, asset))
    }

    fn provider_for(&self, kind: HandleKind, location: &str) -> ResourceResult<SharedProvider> {
        if self.locked.get() {
            return Err(ResourceError::LoadLocked);
        }
        let (manifest, asset) = self.resolve(location)?;

        let guid = if kind == HandleKind::Scene {
            self.scene_index.set(self.scene_index.get() + 1);
            format!("{}-{}", asset.asset_path, self.scene_index.get())
        } else {
            format!("{}{}", kind.provider_prefix(), asset.asset_path)
        };

        let mut state = self.state.borrow_mut();
        if let Some(provider) = state.providers.get(&guid) {
            return Ok(provider.clone());
        }

        let main = state.loader_for(&manifest, asset.bundle_id, &self.file_system, &self.counter);
        main.borrow_mut().add_provider(&guid)?;
        let mut loaders = vec![main];
        for bundle_id in asset.depend_bundle_ids.iter().filter(|id| **id != asset.bundle_id) {
            loaders.push(state.loader_for(&manifest, *bundle_id, &self.file_system, &self.counter));
        }
        let bundle_assets = manifest
            .asset_list
            .iter()
            .filter(|a| a.bundle_id == asset.bundle_id)
            .map(|a| a.asset_path.clone())
            .collect();

        let provider = Rc::new(RefCell::new(Provider::new(
            guid.clone(),
            kind,
            asset.asset_path.clone(),
            bundle_assets,
            loaders,
        )));
        state.providers.insert(guid, provider.clone());
        drop(state);

        debug!("Created {} provider for {}", kind, asset.asset_path);
        self.operations.start_operation(provider.clone());
        Ok(provider)
    }

    /// Start collecting unused bundles with the configured loop count
    pub fn unload_unused_assets(&self) -> Rc<RefCell<UnloadUnusedAssetsOperation>> {
        self.unload_unused_assets_with(self.config.unload_loop_count)
    }

    pub fn unload_unused_assets_with(&self, loop_count: u32) -> Rc<RefCell<UnloadUnusedAssetsOperation>> {
        let operation = Rc::new(RefCell::new(UnloadUnusedAssetsOperation::new(
            self.state.clone(),
            loop_count,
        )));
        self.operations.start_operation(operation.clone());
        operation
    }

    /// Collect the bundles of one asset, including its dependencies
    ///
    /// # Errors
    ///
    /// Returns an error when the location cannot be resolved
    pub fn try_unload_unused_asset(&self, location: &str, loop_count: u32) -> ResourceResult<()> {
        let (manifest, asset) = self.resolve(location)?;
        let mut state = self.state.borrow_mut();
        for _ in 0..loop_count {
            state.collect_asset(&manifest, &asset);
        }
        Ok(())
    }

    /// Destroy every provider and loader; live handles become invalid
    pub fn unload_all_assets(&self) {
        let mut state = self.state.borrow_mut();
        info!(
            "Unloading all assets of {}: {} providers, {} loaders",
            self.package_name,
            state.provider_count(),
            state.loader_count()
        );
        state.clear();
    }

    pub fn loader_count(&self) -> usize {
        self.state.borrow().loader_count()
    }

    pub fn provider_count(&self) -> usize {
        self.state.borrow().provider_count()
    }

    pub fn has_any_loader(&self) -> bool {
        self.loader_count() > 0
    }

    /// Bundles currently in the load step
    pub fn bundle_loading_count(&self) -> usize {
        self.counter.current()
    }

    pub fn loader_state(&self, bundle_name: &str) -> Option<LoaderState> {
        self.find_loader(bundle_name).map(|loader| loader.borrow().state())
    }

    pub fn loader_ref_count(&self, bundle_name: &str) -> Option<i32> {
        self.find_loader(bundle_name).map(|loader| loader.borrow().ref_count())
    }

    fn find_loader(&self, bundle_name: &str) -> Option<SharedLoader> {
        self.state
            .borrow()
            .loaders
            .values()
            .find(|loader| loader.borrow().bundle().bundle_name == bundle_name)
            .cloned()
    }
}
