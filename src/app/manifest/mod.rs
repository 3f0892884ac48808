//! Package manifests and the operations that keep them current
//!
//! A manifest lists a package's bundles (content-addressed by hash, with
//! CRC32 and size) and the assets that live in them. Manifests are built
//! from a directory, published next to a version file and a catalog, and
//! fetched back through a file system.
//!
//! # Module Organization
//!
//! - [`types`] - Bundles, assets and the manifest with its lookup indexes
//! - [`builder`] - Building and publishing manifests from a directory
//! - [`services`] - Host hooks for manifest bytes and local file imports
//! - [`version`] - Version request and active manifest update
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::path::Path;
//! use bundle_fetcher::app::manifest::{ManifestBuilder, PlainManifestServices};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let builder = ManifestBuilder::new("DefaultPackage", "v1").with_tag("ui/", "ui");
//! let manifest = builder.build(Path::new("./assets"))?;
//! builder.publish(&manifest, Path::new("./assets"), Path::new("./out"), &PlainManifestServices)?;
//! println!("{} bundles, {} bytes", manifest.bundle_list.len(), manifest.total_size());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod services;
pub mod types;
pub mod version;

#[cfg(test)]
mod tests;

pub use builder::{ManifestBuilder, PublishedPackage};
pub use services::{
    file_url, join_url, local_file_path, CopyFileServices, DefaultCopyFileServices,
    ManifestServices, PlainManifestServices,
};
pub use types::{PackageAsset, PackageBundle, PackageManifest};
pub use version::{ActiveManifest, RequestPackageVersionOperation, UpdatePackageManifestOperation};
