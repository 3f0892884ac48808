//! Package manifest data model
//!
//! A manifest lists every asset of one package version and the bundle
//! that carries it. Bundles are content addressed: the file hash is the
//! bundle GUID, so two manifests sharing a bundle hash share its cache
//! entry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::app::hash::Md5Hash;
use crate::constants::manifest::FILE_VERSION;
use crate::errors::{ManifestError, ManifestResult};

/// One content-addressed bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageBundle {
    pub bundle_name: String,
    /// Lowercase MD5 hex of the file, also the bundle GUID
    pub file_hash: String,
    pub file_crc: u32,
    pub file_size: u64,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub depend_bundle_ids: Vec<usize>,
    #[serde(skip)]
    file_name: String,
    /// Bundles that depend on this one, derived when the manifest is indexed
    #[serde(skip)]
    reference_bundle_ids: Vec<usize>,
}

impl PackageBundle {
    pub fn new(
        bundle_name: impl Into<String>,
        file_hash: impl Into<String>,
        file_crc: u32,
        file_size: u64,
    ) -> Self {
        let mut bundle = Self {
            bundle_name: bundle_name.into(),
            file_hash: file_hash.into(),
            file_crc,
            file_size,
            encrypted: false,
            tags: Vec::new(),
            depend_bundle_ids: Vec::new(),
            file_name: String::new(),
            reference_bundle_ids: Vec::new(),
        };
        bundle.init();
        bundle
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Bundle identity used by caches and download deduplication
    pub fn bundle_guid(&self) -> &str {
        &self.file_hash
    }

    /// Remote file name: the hash plus the bundle name's extension
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Extension of the bundle name including the dot, or empty
    pub fn file_extension(&self) -> &str {
        match self.bundle_name.rfind('.') {
            Some(index) if !self.bundle_name[index..].contains('/') => &self.bundle_name[index..],
            _ => "",
        }
    }

    /// Indices of the bundles that depend on this one
    pub fn reference_bundle_ids(&self) -> &[usize] {
        &self.reference_bundle_ids
    }

    pub fn has_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }

    fn init(&mut self) {
        self.file_name = format!("{}{}", self.file_hash, self.file_extension());
    }
}

/// One addressable asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAsset {
    #[serde(default)]
    pub address: String,
    pub asset_path: String,
    #[serde(default)]
    pub asset_guid: String,
    #[serde(default)]
    pub asset_tags: Vec<String>,
    /// Index of the main bundle in the manifest's bundle list
    pub bundle_id: usize,
    #[serde(default)]
    pub depend_bundle_ids: Vec<usize>,
}

/// Asset and bundle listing of one package version
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    pub file_version: String,
    pub package_name: String,
    pub package_version: String,
    #[serde(default)]
    pub enable_addressable: bool,
    pub asset_list: Vec<PackageAsset>,
    pub bundle_list: Vec<PackageBundle>,
    #[serde(skip)]
    asset_index: HashMap<String, usize>,
    #[serde(skip)]
    guid_index: HashMap<String, usize>,
}

impl PackageManifest {
    pub fn new(
        package_name: impl Into<String>,
        package_version: impl Into<String>,
        bundle_list: Vec<PackageBundle>,
        asset_list: Vec<PackageAsset>,
    ) -> ManifestResult<Self> {
        let mut manifest = Self {
            file_version: FILE_VERSION.to_string(),
            package_name: package_name.into(),
            package_version: package_version.into(),
            enable_addressable: false,
            asset_list,
            bundle_list,
            asset_index: HashMap::new(),
            guid_index: HashMap::new(),
        };
        manifest.init()?;
        Ok(manifest)
    }

    /// Parse and index a manifest
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, a bad bundle hash or a bundle
    /// index that points outside the bundle list
    pub fn from_json(bytes: &[u8]) -> ManifestResult<Self> {
        let mut manifest: PackageManifest = serde_json::from_slice(bytes)?;
        manifest.init()?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> ManifestResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    fn init(&mut self) -> ManifestResult<()> {
        self.guid_index.clear();
        for (index, bundle) in self.bundle_list.iter_mut().enumerate() {
            Md5Hash::from_hex(&bundle.file_hash)?;
            bundle.file_hash = bundle.file_hash.to_ascii_lowercase();
            bundle.init();
            self.guid_index.insert(bundle.file_hash.clone(), index);
        }

        self.asset_index.clear();
        for (index, asset) in self.asset_list.iter().enumerate() {
            let ids = std::iter::once(&asset.bundle_id).chain(&asset.depend_bundle_ids);
            for id in ids {
                if *id >= self.bundle_list.len() {
                    return Err(ManifestError::BundleNotFound {
                        bundle: id.to_string(),
                    });
                }
            }
            self.asset_index.insert(asset.asset_path.clone(), index);
            if self.enable_addressable && !asset.address.is_empty() {
                self.asset_index.insert(asset.address.clone(), index);
            }
        }
        self.link_references()
    }

    /// Record on every bundle which bundles depend on it
    fn link_references(&mut self) -> ManifestResult<()> {
        let bundle_edges = self.bundle_list.iter().enumerate().flat_map(|(index, bundle)| {
            bundle.depend_bundle_ids.iter().map(move |depend| (*depend, index))
        });
        let asset_edges = self.asset_list.iter().flat_map(|asset| {
            asset
                .depend_bundle_ids
                .iter()
                .map(move |depend| (*depend, asset.bundle_id))
        });
        let edges: Vec<(usize, usize)> = bundle_edges.chain(asset_edges).collect();

        for bundle in &mut self.bundle_list {
            bundle.reference_bundle_ids.clear();
        }
        for (depend, referrer) in edges {
            if depend == referrer {
                continue;
            }
            let Some(bundle) = self.bundle_list.get_mut(depend) else {
                return Err(ManifestError::BundleNotFound {
                    bundle: depend.to_string(),
                });
            };
            if !bundle.reference_bundle_ids.contains(&referrer) {
                bundle.reference_bundle_ids.push(referrer);
            }
        }
        Ok(())
    }

    /// Look up an asset by path, or by address when addressing is enabled
    pub fn asset(&self, location: &str) -> Option<&PackageAsset> {
        self.asset_index.get(location).map(|i| &self.asset_list[*i])
    }

    pub fn main_bundle(&self, asset: &PackageAsset) -> &PackageBundle {
        &self.bundle_list[asset.bundle_id]
    }

    /// Dependency bundles of an asset, main bundle excluded
    pub fn depend_bundles(&self, asset: &PackageAsset) -> Vec<&PackageBundle> {
        asset
            .depend_bundle_ids
            .iter()
            .filter(|id| **id != asset.bundle_id)
            .map(|id| &self.bundle_list[*id])
            .collect()
    }

    pub fn bundle_by_guid(&self, guid: &str) -> Option<&PackageBundle> {
        self.guid_index.get(guid).map(|i| &self.bundle_list[*i])
    }

    pub fn bundle_by_name(&self, name: &str) -> Option<&PackageBundle> {
        self.bundle_list.iter().find(|b| b.bundle_name == name)
    }

    /// Check if a cached file with this GUID is still referenced
    pub fn is_including_bundle_file(&self, guid: &str) -> bool {
        self.guid_index.contains_key(guid)
    }

    /// Total bytes of every bundle
    pub fn total_size(&self) -> u64 {
        self.bundle_list.iter().map(|b| b.file_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "0cc175b9c0f1b6a831c399e269772661";
    const HASH_B: &str = "92eb5ffee6ae2fec3ad71c777531578f";

    fn manifest() -> PackageManifest {
        let bundles = vec![
            PackageBundle::new("ui/main.bundle", HASH_A, 1, 10),
            PackageBundle::new("shared", HASH_B, 2, 20).with_tags(&["base"]),
        ];
        let assets = vec![PackageAsset {
            address: "hud".to_string(),
            asset_path: "assets/ui/hud.prefab".to_string(),
            asset_guid: String::new(),
            asset_tags: Vec::new(),
            bundle_id: 0,
            depend_bundle_ids: vec![0, 1],
        }];
        PackageManifest::new("DefaultPackage", "v1", bundles, assets).unwrap()
    }

    #[test]
    fn test_file_name_keeps_extension() {
        let manifest = manifest();
        assert_eq!(manifest.bundle_list[0].file_name(), format!("{}.bundle", HASH_A));
        assert_eq!(manifest.bundle_list[1].file_name(), HASH_B);
    }

    #[test]
    fn test_lookups() {
        let manifest = manifest();
        let asset = manifest.asset("assets/ui/hud.prefab").unwrap();
        assert_eq!(manifest.main_bundle(asset).bundle_name, "ui/main.bundle");

        let depends = manifest.depend_bundles(asset);
        assert_eq!(depends.len(), 1);
        assert_eq!(depends[0].bundle_name, "shared");

        assert!(manifest.is_including_bundle_file(HASH_B));
        assert!(manifest.bundle_by_guid(HASH_B).unwrap().has_tag(&["base".to_string()]));
        assert_eq!(manifest.total_size(), 30);
        // Addressing is disabled by default
        assert!(manifest.asset("hud").is_none());
    }

    #[test]
    fn test_json_round_trip_rebuilds_indexes() {
        let json = manifest().to_json().unwrap();
        let parsed = PackageManifest::from_json(&json).unwrap();
        assert!(parsed.asset("assets/ui/hud.prefab").is_some());
        assert_eq!(parsed.bundle_list[0].file_name(), format!("{}.bundle", HASH_A));
    }

    #[test]
    fn test_reference_bundles_derived_from_dependencies() {
        let manifest = manifest();
        assert_eq!(manifest.bundle_list[1].reference_bundle_ids(), &[0]);
        // The main bundle listed among its own asset's dependencies is not a reference
        assert!(manifest.bundle_list[0].reference_bundle_ids().is_empty());

        let parsed = PackageManifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed.bundle_list[1].reference_bundle_ids(), &[0]);
    }

    #[test]
    fn test_rejects_dangling_bundle_dependency() {
        let mut manifest = manifest();
        manifest.bundle_list[0].depend_bundle_ids = vec![7];
        let json = serde_json::to_vec(&manifest).unwrap();
        assert!(matches!(
            PackageManifest::from_json(&json),
            Err(ManifestError::BundleNotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_dangling_bundle_id() {
        let mut manifest = manifest();
        manifest.asset_list[0].bundle_id = 9;
        let json = serde_json::to_vec(&manifest).unwrap();
        assert!(matches!(
            PackageManifest::from_json(&json),
            Err(ManifestError::BundleNotFound { .. })
        ));
    }
}
