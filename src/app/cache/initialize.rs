//! Cache initialization
//!
//! Rebuilds the record table from disk. The scan walks
//! `BundleFiles/{prefix}/{guid}` folders and the verification pass checks
//! each found record at the configured level; both yield when the frame's
//! time slice is used up. Invalid records are deleted.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::manager::CacheFileSystem;
use super::record::RecordFileElement;
use crate::app::operation::{Operation, OperationCore, TickContext};
use crate::constants::cache::{DATA_FILE_NAME, INFO_FILE_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    SearchCacheFiles,
    VerifyCacheFiles,
    CreateDownloadCenter,
    Done,
}

/// Initialize a [`CacheFileSystem`]
pub struct InitializeCacheOperation {
    core: OperationCore,
    file_system: Rc<CacheFileSystem>,
    prefix_folders: VecDeque<PathBuf>,
    found: Vec<(String, RecordFileElement)>,
    verify_total: usize,
    verify_failed: usize,
    steps: Steps,
}

impl InitializeCacheOperation {
    pub fn new(file_system: Rc<CacheFileSystem>) -> Self {
        Self {
            core: OperationCore::new("InitializeCacheOperation"),
            file_system,
            prefix_folders: VecDeque::new(),
            found: Vec::new(),
            verify_total: 0,
            verify_failed: 0,
            steps: Steps::None,
        }
    }

    fn search_prefix_folder(&mut self, folder: &Path) {
        let Ok(entries) = std::fs::read_dir(folder) else {
            return;
        };
        for entry in entries.flatten() {
            let bundle_folder = entry.path();
            if !bundle_folder.is_dir() {
                continue;
            }
            let guid = entry.file_name().to_string_lossy().to_string();
            match record_in_folder(&bundle_folder) {
                Some(element) => self.found.push((guid, element)),
                None => {
                    debug!("Removing incomplete cache folder {}", bundle_folder.display());
                    let _ = std::fs::remove_dir_all(&bundle_folder);
                }
            }
        }
    }
}

/// Build the record for one bundle folder, if its files are readable
fn record_in_folder(folder: &Path) -> Option<RecordFileElement> {
    let info_file_path = folder.join(INFO_FILE_NAME);
    let data_file_path = std::fs::read_dir(folder)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().starts_with(DATA_FILE_NAME))
                .unwrap_or(false)
        })?;
    RecordFileElement::load(info_file_path, data_file_path).ok()
}

impl Operation for InitializeCacheOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        let root = self.file_system.store().paths().bundle_files_root().to_path_buf();
        if let Ok(entries) = std::fs::read_dir(&root) {
            self.prefix_folders = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
        }
        self.steps = Steps::SearchCacheFiles;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if matches!(self.steps, Steps::None | Steps::Done) {
            return;
        }

        if self.steps == Steps::SearchCacheFiles {
            while let Some(folder) = self.prefix_folders.pop_front() {
                self.search_prefix_folder(&folder);
                if ctx.is_busy() {
                    break;
                }
            }
            if !self.prefix_folders.is_empty() {
                return;
            }
            self.verify_total = self.found.len();
            self.steps = Steps::VerifyCacheFiles;
        }

        if self.steps == Steps::VerifyCacheFiles {
            let level = self.file_system.config().verify_level;
            let store = self.file_system.store().clone();
            while let Some((guid, element)) = self.found.pop() {
                let result = element.verify(level);
                if result.is_succeed() {
                    store.record(&guid, element);
                } else {
                    warn!("Delete invalid cache file {} : {}", guid, result);
                    self.verify_failed += 1;
                    element.delete_folder();
                }
                if ctx.is_busy() {
                    break;
                }
            }

            if self.verify_total > 0 {
                let done = self.verify_total - self.found.len();
                self.core.set_progress(done as f32 / self.verify_total as f32);
            }
            if !self.found.is_empty() {
                return;
            }

            info!(
                "Package '{}' cached files count : {} ({} invalid removed)",
                self.file_system.config().package_name,
                store.file_count(),
                self.verify_failed
            );
            self.steps = Steps::CreateDownloadCenter;
        }

        if self.steps == Steps::CreateDownloadCenter {
            self.file_system.start_scheduler();
            self.steps = Steps::Done;
            self.core.succeed();
        }
    }

    fn description(&self) -> String {
        format!("{} records pending verification", self.found.len())
    }
}
