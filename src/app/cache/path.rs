//! Cache directory layout
//!
//! Structure under `{cache_root}/{package}`:
//! - Bundle records: `BundleFiles/{hash[0..2]}/{guid}/__data` and `__info`
//! - Partial downloads: `TempFiles/{guid}`
//! - Manifests: `ManifestFiles/{package}_{version}.json`

use std::path::{Path, PathBuf};

use crate::app::manifest::PackageBundle;
use crate::constants::cache::{
    BUNDLE_FILES_FOLDER, DATA_FILE_NAME, INFO_FILE_NAME, MANIFEST_FILES_FOLDER, TEMP_FILES_FOLDER,
};
use crate::constants::manifest::manifest_file_name;

/// Path generation for one package's cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    package_root: PathBuf,
    bundle_files_root: PathBuf,
    manifest_files_root: PathBuf,
    temp_files_root: PathBuf,
    append_file_extension: bool,
}

impl CachePaths {
    pub fn new(cache_root: &Path, package_name: &str, append_file_extension: bool) -> Self {
        let package_root = cache_root.join(package_name);
        Self {
            bundle_files_root: package_root.join(BUNDLE_FILES_FOLDER),
            manifest_files_root: package_root.join(MANIFEST_FILES_FOLDER),
            temp_files_root: package_root.join(TEMP_FILES_FOLDER),
            package_root,
            append_file_extension,
        }
    }

    pub fn package_root(&self) -> &Path {
        &self.package_root
    }

    pub fn bundle_files_root(&self) -> &Path {
        &self.bundle_files_root
    }

    pub fn manifest_files_root(&self) -> &Path {
        &self.manifest_files_root
    }

    pub fn temp_files_root(&self) -> &Path {
        &self.temp_files_root
    }

    /// Folder holding one bundle's data and info files
    pub fn bundle_folder(&self, bundle: &PackageBundle) -> PathBuf {
        let hash = &bundle.file_hash;
        let prefix = hash.get(..2).unwrap_or(hash);
        self.bundle_files_root.join(prefix).join(bundle.bundle_guid())
    }

    pub fn data_file_path(&self, bundle: &PackageBundle) -> PathBuf {
        let folder = self.bundle_folder(bundle);
        if self.append_file_extension && !bundle.file_extension().is_empty() {
            folder.join(format!("{}{}", DATA_FILE_NAME, bundle.file_extension()))
        } else {
            folder.join(DATA_FILE_NAME)
        }
    }

    pub fn info_file_path(&self, bundle: &PackageBundle) -> PathBuf {
        self.bundle_folder(bundle).join(INFO_FILE_NAME)
    }

    pub fn temp_file_path(&self, bundle: &PackageBundle) -> PathBuf {
        self.temp_files_root.join(bundle.bundle_guid())
    }

    pub fn manifest_file_path(&self, package_name: &str, package_version: &str) -> PathBuf {
        self.manifest_files_root
            .join(manifest_file_name(package_name, package_version))
    }
}
