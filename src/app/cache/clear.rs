//! Cache clearing
//!
//! Bundle modes collect the GUIDs to delete up front and delete them
//! across frames; manifest modes work on the manifest folder directly.

use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;

use tracing::{info, warn};

use super::manager::CacheStore;
use crate::app::manifest::PackageManifest;
use crate::app::operation::{Operation, OperationCore, TickContext};
use crate::constants::manifest::manifest_file_name;
use crate::errors::CacheError;

/// What a clear operation removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// Every cached bundle
    ClearAllBundleFiles,
    /// Bundles the active manifest no longer references
    ClearUnusedBundleFiles,
    /// Bundles of the active manifest carrying any of the given tags
    ClearBundleFilesByTags,
    /// Every cached manifest
    ClearAllManifestFiles,
    /// Cached manifests other than the active version
    ClearUnusedManifestFiles,
}

impl ClearMode {
    pub const ALL: [ClearMode; 5] = [
        ClearMode::ClearAllBundleFiles,
        ClearMode::ClearUnusedBundleFiles,
        ClearMode::ClearBundleFilesByTags,
        ClearMode::ClearAllManifestFiles,
        ClearMode::ClearUnusedManifestFiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClearMode::ClearAllBundleFiles => "ClearAllBundleFiles",
            ClearMode::ClearUnusedBundleFiles => "ClearUnusedBundleFiles",
            ClearMode::ClearBundleFilesByTags => "ClearBundleFilesByTags",
            ClearMode::ClearAllManifestFiles => "ClearAllManifestFiles",
            ClearMode::ClearUnusedManifestFiles => "ClearUnusedManifestFiles",
        }
    }

    /// Check if the mode needs the active manifest
    pub fn requires_manifest(&self) -> bool {
        matches!(
            self,
            ClearMode::ClearUnusedBundleFiles
                | ClearMode::ClearBundleFilesByTags
                | ClearMode::ClearUnusedManifestFiles
        )
    }
}

impl fmt::Display for ClearMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClearMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClearMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| CacheError::InvalidClearMode { mode: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    CheckArgs,
    GetClearCacheFiles,
    ClearFilterCacheFiles,
    Done,
}

/// Remove cached files by [`ClearMode`]
pub struct ClearCacheFilesOperation {
    core: OperationCore,
    store: Rc<CacheStore>,
    mode: ClearMode,
    manifest: Option<Rc<PackageManifest>>,
    tags: Vec<String>,
    clear_guids: Vec<String>,
    clear_total: usize,
    steps: Steps,
}

impl ClearCacheFilesOperation {
    pub fn new(
        store: Rc<CacheStore>,
        mode: ClearMode,
        manifest: Option<Rc<PackageManifest>>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            core: OperationCore::new("ClearCacheFilesOperation"),
            store,
            mode,
            manifest,
            tags,
            clear_guids: Vec::new(),
            clear_total: 0,
            steps: Steps::None,
        }
    }

    fn fail(&mut self, message: String) {
        self.steps = Steps::Done;
        self.core.fail(message);
    }

    fn collect_bundle_guids(&self) -> Vec<String> {
        let guids = self.store.guids();
        let Some(manifest) = &self.manifest else {
            return guids;
        };
        match self.mode {
            ClearMode::ClearUnusedBundleFiles => guids
                .into_iter()
                .filter(|guid| !manifest.is_including_bundle_file(guid))
                .collect(),
            ClearMode::ClearBundleFilesByTags => guids
                .into_iter()
                .filter(|guid| {
                    manifest
                        .bundle_by_guid(guid)
                        .map(|bundle| bundle.has_tag(&self.tags))
                        .unwrap_or(false)
                })
                .collect(),
            _ => guids,
        }
    }

    /// Delete every cached manifest except the active one, if kept
    fn clear_manifest_files(&self) -> Result<usize, CacheError> {
        if self.mode == ClearMode::ClearAllManifestFiles {
            self.store.delete_all_manifest_files()?;
            return Ok(0);
        }

        let keep = self
            .manifest
            .as_ref()
            .map(|m| manifest_file_name(&m.package_name, &m.package_version));
        let root = self.store.paths().manifest_files_root();
        let mut removed = 0;
        let Ok(entries) = std::fs::read_dir(root) else {
            return Ok(0);
        };
        let files: Vec<PathBuf> = entries.flatten().map(|e| e.path()).filter(|p| p.is_file()).collect();
        for path in files {
            let name = path.file_name().map(|n| n.to_string_lossy().to_string());
            if name.is_some() && name == keep {
                continue;
            }
            std::fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

impl Operation for ClearCacheFilesOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = Steps::CheckArgs;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if matches!(self.steps, Steps::None | Steps::Done) {
            return;
        }

        if self.steps == Steps::CheckArgs {
            if self.mode.requires_manifest() && self.manifest.is_none() {
                let mode = self.mode.to_string();
                self.fail(CacheError::ManifestRequired { mode }.to_string());
                return;
            }
            if self.mode == ClearMode::ClearBundleFilesByTags && self.tags.is_empty() {
                self.fail("Clear param is null !".to_string());
                return;
            }
            self.steps = Steps::GetClearCacheFiles;
        }

        if self.steps == Steps::GetClearCacheFiles {
            if matches!(
                self.mode,
                ClearMode::ClearAllManifestFiles | ClearMode::ClearUnusedManifestFiles
            ) {
                match self.clear_manifest_files() {
                    Ok(removed) => {
                        info!("{} removed {} manifest files", self.mode, removed);
                        self.steps = Steps::Done;
                        self.core.succeed();
                    }
                    Err(e) => self.fail(e.to_string()),
                }
                return;
            }

            self.clear_guids = self.collect_bundle_guids();
            self.clear_total = self.clear_guids.len();
            self.steps = Steps::ClearFilterCacheFiles;
        }

        if self.steps == Steps::ClearFilterCacheFiles {
            while let Some(guid) = self.clear_guids.pop() {
                if !self.store.delete(&guid) {
                    warn!("Cached bundle {} was already gone", guid);
                }
                if ctx.is_busy() {
                    break;
                }
            }

            if self.clear_total == 0 {
                self.core.set_progress(1.0);
            } else {
                let done = self.clear_total - self.clear_guids.len();
                self.core.set_progress(done as f32 / self.clear_total as f32);
            }

            if self.clear_guids.is_empty() {
                if self.mode == ClearMode::ClearAllBundleFiles {
                    if let Err(e) = self.store.delete_all_bundle_files() {
                        self.fail(e.to_string());
                        return;
                    }
                }
                info!("{} removed {} bundles", self.mode, self.clear_total);
                self.steps = Steps::Done;
                self.core.succeed();
            }
        }
    }

    fn description(&self) -> String {
        self.mode.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        for mode in ClearMode::ALL {
            assert_eq!(mode.as_str().parse::<ClearMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_invalid_mode_message() {
        let err = "ClearEverything".parse::<ClearMode>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid clear mode : ClearEverything");
    }

    #[test]
    fn test_manifest_requirements() {
        assert!(!ClearMode::ClearAllBundleFiles.requires_manifest());
        assert!(ClearMode::ClearUnusedBundleFiles.requires_manifest());
        assert!(!ClearMode::ClearAllManifestFiles.requires_manifest());
    }
}
