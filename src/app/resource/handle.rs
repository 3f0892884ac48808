//! Handles: reference-counted leases on a provider
//!
//! Every load returns a new handle, even when the provider is shared.
//! Dropping or releasing a handle gives its reference back; a provider
//! without references becomes collectable.
//!
//! The [`HandleFactory`] maps a [`HandleKind`] to the constructor of its
//! concrete handle type, so the manager creates handles by kind alone.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::provider::{
    AssetObject, DownloadStatus, HandleRefs, ProviderResult, SceneObject, SharedProvider,
};
use crate::app::operation::{
    on_completed, wait_shared, Operation, OperationOutcome, OperationStatus, TickContext,
};
use crate::errors::{OperationError, ResourceError, ResourceResult};

/// Ways a loaded bundle can be consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    Asset,
    Scene,
    SubAssets,
    AllAssets,
    RawFile,
}

impl HandleKind {
    pub const ALL: [HandleKind; 5] = [
        HandleKind::Asset,
        HandleKind::Scene,
        HandleKind::SubAssets,
        HandleKind::AllAssets,
        HandleKind::RawFile,
    ];

    /// Prefix of shared provider GUIDs for this kind
    pub fn provider_prefix(&self) -> &'static str {
        match self {
            HandleKind::Asset => "LoadAssetAsync",
            HandleKind::Scene => "LoadSceneAsync",
            HandleKind::SubAssets => "LoadSubAssetsAsync",
            HandleKind::AllAssets => "LoadAllAssetsAsync",
            HandleKind::RawFile => "LoadRawFileAsync",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Asset => "AssetHandle",
            HandleKind::Scene => "SceneHandle",
            HandleKind::SubAssets => "SubAssetsHandle",
            HandleKind::AllAssets => "AllAssetsHandle",
            HandleKind::RawFile => "RawFileHandle",
        };
        f.write_str(name)
    }
}

/// State shared by every handle kind
pub struct HandleBase {
    provider: SharedProvider,
    refs: Rc<HandleRefs>,
    kind: HandleKind,
    released: bool,
}

impl HandleBase {
    /// Take a reference on `provider`
    pub fn new(provider: SharedProvider, kind: HandleKind) -> Self {
        let refs = provider.borrow().refs();
        refs.acquire();
        Self {
            provider,
            refs,
            kind,
            released: false,
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Not released and the provider still alive
    pub fn is_valid(&self) -> bool {
        !self.released
            && self
                .provider
                .try_borrow()
                .map(|provider| !provider.is_destroyed())
                .unwrap_or(true)
    }

    pub fn status(&self) -> OperationStatus {
        self.provider.borrow().status()
    }

    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }

    pub fn error(&self) -> String {
        self.provider.borrow().error().to_string()
    }

    pub fn progress(&self) -> f32 {
        self.provider.borrow().progress()
    }

    pub fn location(&self) -> String {
        self.provider.borrow().location().to_string()
    }

    pub fn download_status(&self) -> DownloadStatus {
        self.provider.borrow().download_status()
    }

    /// Run `callback` once the provider finishes, or now if it already has
    pub fn on_completed<F>(&self, callback: F)
    where
        F: FnOnce(&OperationOutcome) + 'static,
    {
        on_completed(&self.provider, callback);
    }

    /// Block until the provider is terminal
    ///
    /// # Errors
    ///
    /// Returns `OperationError::ReentrantWait` when called from inside the
    /// provider's own tick
    pub fn wait_for_async_complete(&self, ctx: &TickContext) -> Result<(), OperationError> {
        wait_shared(&self.provider, ctx)
    }

    /// Give the reference back; later calls do nothing
    pub fn release(&mut self) {
        if self.released {
            warn!("{} for {} released twice", self.kind, self.location());
            return;
        }
        self.released = true;
        self.refs.release();
    }

    fn result(&self) -> ResourceResult<ProviderResult> {
        if self.released {
            return Err(ResourceError::HandleReleased);
        }
        let provider = self.provider.borrow();
        provider
            .result()
            .cloned()
            .ok_or_else(|| ResourceError::AssetNotFound {
                path: provider.location().to_string(),
            })
    }
}

impl Drop for HandleBase {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.refs.release();
        }
    }
}

impl fmt::Debug for HandleBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleBase")
            .field("kind", &self.kind)
            .field("released", &self.released)
            .finish()
    }
}

/// A concrete handle type created by kind
pub trait TypedHandle: Deref<Target = HandleBase> + Sized {
    const KIND: HandleKind;

    /// Unwrap the matching variant, returning other kinds unchanged
    fn from_any(handle: AnyHandle) -> Result<Self, AnyHandle>;
}

macro_rules! typed_handle {
    ($name:ident, $kind:ident) => {
        #[derive(Debug)]
        pub struct $name(HandleBase);

        impl $name {
            pub fn new(base: HandleBase) -> Self {
                Self(base)
            }
        }

        impl Deref for $name {
            type Target = HandleBase;

            fn deref(&self) -> &HandleBase {
                &self.0
            }
        }

        impl std::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut HandleBase {
                &mut self.0
            }
        }

        impl TypedHandle for $name {
            const KIND: HandleKind = HandleKind::$kind;

            fn from_any(handle: AnyHandle) -> Result<Self, AnyHandle> {
                match handle {
                    AnyHandle::$kind(handle) => Ok(handle),
                    other => Err(other),
                }
            }
        }
    };
}

typed_handle!(AssetHandle, Asset);
typed_handle!(SceneHandle, Scene);
typed_handle!(SubAssetsHandle, SubAssets);
typed_handle!(AllAssetsHandle, AllAssets);
typed_handle!(RawFileHandle, RawFile);

impl AssetHandle {
    pub fn asset(&self) -> ResourceResult<AssetObject> {
        match self.result()? {
            ProviderResult::Asset(asset) => Ok(asset),
            other => Err(mismatch(HandleKind::Asset, &other)),
        }
    }
}

impl SceneHandle {
    pub fn scene(&self) -> ResourceResult<SceneObject> {
        match self.result()? {
            ProviderResult::Scene(scene) => Ok(scene),
            other => Err(mismatch(HandleKind::Scene, &other)),
        }
    }
}

impl SubAssetsHandle {
    pub fn sub_assets(&self) -> ResourceResult<Vec<AssetObject>> {
        match self.result()? {
            ProviderResult::Assets(assets) => Ok(assets),
            other => Err(mismatch(HandleKind::SubAssets, &other)),
        }
    }
}

impl AllAssetsHandle {
    pub fn all_assets(&self) -> ResourceResult<Vec<AssetObject>> {
        match self.result()? {
            ProviderResult::Assets(assets) => Ok(assets),
            other => Err(mismatch(HandleKind::AllAssets, &other)),
        }
    }
}

impl RawFileHandle {
    /// Path of the bundle file, when it lives on disk
    pub fn file_path(&self) -> ResourceResult<Option<PathBuf>> {
        match self.result()? {
            ProviderResult::RawFile(bundle) => Ok(match bundle.data {
                crate::app::filesystem::BundleData::File(path) => Some(path),
                _ => None,
            }),
            other => Err(mismatch(HandleKind::RawFile, &other)),
        }
    }

    pub fn read_bytes(&self) -> ResourceResult<Vec<u8>> {
        match self.result()? {
            ProviderResult::RawFile(bundle) => {
                bundle.read_bytes().map_err(|e| ResourceError::DecodeFailed {
                    path: bundle.bundle.bundle_name.clone(),
                    reason: e.to_string(),
                })
            }
            other => Err(mismatch(HandleKind::RawFile, &other)),
        }
    }
}

fn mismatch(expected: HandleKind, actual: &ProviderResult) -> ResourceError {
    let actual = match actual {
        ProviderResult::Asset(_) => "asset",
        ProviderResult::Scene(_) => "scene",
        ProviderResult::Assets(_) => "assets",
        ProviderResult::RawFile(_) => "raw file",
    };
    ResourceError::HandleKindMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// A handle of any kind
#[derive(Debug)]
pub enum AnyHandle {
    Asset(AssetHandle),
    Scene(SceneHandle),
    SubAssets(SubAssetsHandle),
    AllAssets(AllAssetsHandle),
    RawFile(RawFileHandle),
}

impl AnyHandle {
    pub fn kind(&self) -> HandleKind {
        self.base().kind()
    }

    pub fn base(&self) -> &HandleBase {
        match self {
            AnyHandle::Asset(handle) => &handle.0,
            AnyHandle::Scene(handle) => &handle.0,
            AnyHandle::SubAssets(handle) => &handle.0,
            AnyHandle::AllAssets(handle) => &handle.0,
            AnyHandle::RawFile(handle) => &handle.0,
        }
    }

    /// Convert to a concrete handle type
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::HandleKindMismatch` for another kind; the
    /// handle is released in that case
    pub fn into_typed<T: TypedHandle>(self) -> ResourceResult<T> {
        T::from_any(self).map_err(|other| ResourceError::HandleKindMismatch {
            expected: T::KIND.to_string(),
            actual: other.kind().to_string(),
        })
    }
}

pub type HandleConstructor = fn(HandleBase) -> AnyHandle;

/// Registry of handle constructors by kind
#[derive(Clone)]
pub struct HandleFactory {
    constructors: HashMap<HandleKind, HandleConstructor>,
}

impl Default for HandleFactory {
    fn default() -> Self {
        Self::empty()
            .register(HandleKind::Asset, |base| AnyHandle::Asset(AssetHandle::new(base)))
            .register(HandleKind::Scene, |base| AnyHandle::Scene(SceneHandle::new(base)))
            .register(HandleKind::SubAssets, |base| {
                AnyHandle::SubAssets(SubAssetsHandle::new(base))
            })
            .register(HandleKind::AllAssets, |base| {
                AnyHandle::AllAssets(AllAssetsHandle::new(base))
            })
            .register(HandleKind::RawFile, |base| AnyHandle::RawFile(RawFileHandle::new(base)))
    }
}

impl HandleFactory {
    /// Factory with no kinds registered
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(mut self, kind: HandleKind, constructor: HandleConstructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    pub fn supports(&self, kind: HandleKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Create a handle of `kind` on `provider`
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::UnsupportedHandleKind` for an unregistered kind
    pub fn create(&self, provider: &SharedProvider, kind: HandleKind) -> ResourceResult<AnyHandle> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| ResourceError::UnsupportedHandleKind {
                kind: kind.to_string(),
            })?;
        Ok(constructor(HandleBase::new(provider.clone(), kind)))
    }
}

impl fmt::Debug for HandleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleFactory")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
