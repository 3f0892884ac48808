//! Build manifests from plain directories
//!
//! Every regular file under the source directory becomes one bundle and
//! one asset with the same relative path. [`ManifestBuilder::publish`]
//! writes the layout a remote server or web server file system expects:
//! the version file, the processed manifest, the catalog and each bundle
//! under its hashed file name.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::services::ManifestServices;
use super::types::{PackageAsset, PackageBundle, PackageManifest};
use crate::app::filesystem::catalog::{Catalog, CatalogWrapper};
use crate::app::hash::{file_crc_and_size, Md5Hash};
use crate::constants::manifest::{catalog_file_name, manifest_file_name, version_file_name};
use crate::errors::{ManifestError, ManifestResult};

/// Builds a [`PackageManifest`] from a directory of files
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    package_name: String,
    package_version: String,
    tag_rules: Vec<(String, String)>,
}

impl ManifestBuilder {
    pub fn new(package_name: impl Into<String>, package_version: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            package_version: package_version.into(),
            tag_rules: Vec::new(),
        }
    }

    /// Tag every bundle whose relative path starts with `prefix`
    pub fn with_tag(mut self, prefix: impl Into<String>, tag: impl Into<String>) -> Self {
        self.tag_rules.push((prefix.into(), tag.into()));
        self
    }

    /// Scan `root` and describe every file in it
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::EmptyVersion` for an empty version and
    /// `ManifestError::Io` when the directory cannot be read
    pub fn build(&self, root: &Path) -> ManifestResult<PackageManifest> {
        if self.package_version.is_empty() {
            return Err(ManifestError::EmptyVersion);
        }

        let mut files = Vec::new();
        collect_files(root, &mut files)?;
        files.sort();

        let mut bundles = Vec::with_capacity(files.len());
        let mut assets = Vec::with_capacity(files.len());
        for (bundle_id, path) in files.iter().enumerate() {
            let relative = relative_name(root, path);
            let hash = Md5Hash::of_file(path)?;
            let (crc, size) = file_crc_and_size(path)?;

            let tags: Vec<&str> = self
                .tag_rules
                .iter()
                .filter(|(prefix, _)| relative.starts_with(prefix.as_str()))
                .map(|(_, tag)| tag.as_str())
                .collect();
            bundles.push(PackageBundle::new(relative.clone(), hash.to_hex(), crc, size).with_tags(&tags));
            assets.push(PackageAsset {
                address: String::new(),
                asset_path: relative,
                asset_guid: hash.to_hex(),
                asset_tags: tags.iter().map(|t| t.to_string()).collect(),
                bundle_id,
                depend_bundle_ids: Vec::new(),
            });
        }

        debug!("Built manifest with {} bundles from {}", bundles.len(), root.display());
        PackageManifest::new(
            self.package_name.clone(),
            self.package_version.clone(),
            bundles,
            assets,
        )
    }

    /// Write the server layout for `manifest` into `output`
    ///
    /// Bundles are copied from `source` under their hashed file names.
    pub fn publish(
        &self,
        manifest: &PackageManifest,
        source: &Path,
        output: &Path,
        services: &dyn ManifestServices,
    ) -> ManifestResult<PublishedPackage> {
        std::fs::create_dir_all(output)?;

        let data = services
            .process_manifest(manifest.to_json()?)
            .map_err(|reason| ManifestError::RestoreFailed { reason })?;
        let manifest_path =
            output.join(manifest_file_name(&manifest.package_name, &manifest.package_version));
        std::fs::write(&manifest_path, data)?;

        let version_path = output.join(version_file_name(&manifest.package_name));
        std::fs::write(&version_path, &manifest.package_version)?;

        let mut bytes = 0u64;
        for bundle in &manifest.bundle_list {
            let target = output.join(bundle.file_name());
            bytes += std::fs::copy(source.join(&bundle.bundle_name), &target)?;
        }

        let catalog = Catalog {
            package_name: manifest.package_name.clone(),
            wrappers: manifest
                .bundle_list
                .iter()
                .map(|b| CatalogWrapper {
                    bundle_guid: b.bundle_guid().to_string(),
                    file_name: b.file_name().to_string(),
                })
                .collect(),
        };
        let catalog_path = output.join(catalog_file_name(&manifest.package_name));
        std::fs::write(&catalog_path, serde_json::to_vec_pretty(&catalog)?)?;

        info!(
            "Published {} version {} ({} bundles, {} bytes) to {}",
            manifest.package_name,
            manifest.package_version,
            manifest.bundle_list.len(),
            bytes,
            output.display()
        );
        Ok(PublishedPackage {
            manifest_path,
            version_path,
            catalog_path,
            bundle_bytes: bytes,
        })
    }
}

/// Files written by [`ManifestBuilder::publish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPackage {
    pub manifest_path: PathBuf,
    pub version_path: PathBuf,
    pub catalog_path: PathBuf,
    pub bundle_bytes: u64,
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> ManifestResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::manifest::PlainManifestServices;
    use tempfile::TempDir;

    fn source_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("ui")).unwrap();
        std::fs::write(temp_dir.path().join("ui/hud.bundle"), b"hud-bytes").unwrap();
        std::fs::write(temp_dir.path().join("audio.pak"), b"audio").unwrap();
        temp_dir
    }

    #[test]
    fn test_build_describes_each_file() {
        let source = source_dir();
        let manifest = ManifestBuilder::new("Demo", "v1")
            .with_tag("ui/", "ui")
            .build(source.path())
            .unwrap();

        assert_eq!(manifest.bundle_list.len(), 2);
        let hud = manifest.bundle_by_name("ui/hud.bundle").unwrap();
        assert_eq!(hud.file_crc, crc32fast::hash(b"hud-bytes"));
        assert_eq!(hud.file_size, 9);
        assert_eq!(hud.file_hash, Md5Hash::compute(b"hud-bytes").to_hex());
        assert_eq!(hud.tags, vec!["ui".to_string()]);
        assert!(manifest.asset("audio.pak").is_some());
    }

    #[test]
    fn test_empty_version_rejected() {
        let source = source_dir();
        let result = ManifestBuilder::new("Demo", "").build(source.path());
        assert!(matches!(result, Err(ManifestError::EmptyVersion)));
    }

    #[test]
    fn test_publish_layout() {
        let source = source_dir();
        let output = TempDir::new().unwrap();
        let builder = ManifestBuilder::new("Demo", "v1");
        let manifest = builder.build(source.path()).unwrap();

        let published = builder
            .publish(&manifest, source.path(), output.path(), &PlainManifestServices)
            .unwrap();

        assert_eq!(std::fs::read_to_string(&published.version_path).unwrap(), "v1");
        assert!(output.path().join("Demo_v1.json").exists());
        assert_eq!(published.bundle_bytes, 14);
        for bundle in &manifest.bundle_list {
            assert!(output.path().join(bundle.file_name()).exists());
        }
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&published.catalog_path).unwrap()).unwrap();
        assert_eq!(raw["PackageName"], "Demo");
        assert!(raw["Wrappers"][0]["BundleGUID"].is_string());
        assert!(raw["Wrappers"][0]["FileName"].is_string());
        let catalog: Catalog =
            serde_json::from_slice(&std::fs::read(published.catalog_path).unwrap()).unwrap();
        assert_eq!(catalog.package_name, "Demo");
        assert_eq!(catalog.wrappers.len(), 2);
    }
}
