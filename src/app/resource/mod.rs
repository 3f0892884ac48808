//! Asset loading on top of a package's file system
//!
//! A load request resolves an asset through the active manifest and
//! returns a handle. Handles are backed by providers, one per asset and
//! kind (scenes get one per load). Providers reference the bundle loaders
//! they need; loaders are shared and collected once nothing references
//! them.
//!
//! # Module Organization
//!
//! - [`config`] - Loading concurrency and collection loop count
//! - [`loader`] - Shared per-bundle loader and the loading counter
//! - [`provider`] - Per-asset loading and result production
//! - [`handle`] - Typed handles and the handle factory
//! - [`unload`] - Iterative collection of unused bundles
//! - [`manager`] - The loader arena and the public load API

pub mod config;
pub mod handle;
pub mod loader;
pub mod manager;
pub mod provider;
pub mod unload;

#[cfg(test)]
mod tests;

pub use config::ResourceConfig;
pub use handle::{
    AllAssetsHandle, AnyHandle, AssetHandle, HandleBase, HandleConstructor, HandleFactory,
    HandleKind, RawFileHandle, SceneHandle, SubAssetsHandle, TypedHandle,
};
pub use loader::{BundleLoader, LoaderState, LoadingCounter, SharedLoader};
pub use manager::{ResourceManager, ResourceState};
pub use provider::{
    AssetObject, DownloadStatus, HandleRefs, Provider, ProviderResult, SceneObject, SharedProvider,
};
pub use unload::UnloadUnusedAssetsOperation;
