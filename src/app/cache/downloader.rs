//! Download-and-cache transfer
//!
//! Moves one bundle into the cache: the payload lands in a temp file, is
//! verified against the bundle's size and CRC, then copied into its record
//! folder. Remote URLs go through the download backend, optionally resuming
//! from a partial temp file; `file://` URLs are copied with the
//! [`CopyFileServices`] collaborator.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::manager::CacheStore;
use crate::app::download::{
    DownloadBackend, DownloadRequest, FileRequestArgs, RefCount, RequestStatus, Transfer,
};
use crate::app::hash::file_crc_and_size;
use crate::app::manifest::{local_file_path, CopyFileServices, PackageBundle};
use crate::app::operation::{Operation, OperationCore, TickContext};
use crate::errors::CacheError;

/// Transfer settings taken from the cache configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSettings {
    pub watchdog: Option<Duration>,
    pub resume_minimum_size: u64,
    pub resume_response_codes: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    CopyLocalFile,
    CreateRequest,
    CheckRequest,
    VerifyBundleFile,
    CacheBundleFile,
    Done,
}

/// Reference-counted transfer of one bundle into the cache
pub struct CacheTransfer {
    core: OperationCore,
    store: Rc<CacheStore>,
    backend: Rc<dyn DownloadBackend>,
    copy_services: Rc<dyn CopyFileServices>,
    settings: TransferSettings,
    bundle: PackageBundle,
    url: String,
    local_path: Option<PathBuf>,
    temp_file_path: PathBuf,
    refs: RefCount,
    request: Option<Box<dyn DownloadRequest>>,
    enable_resume: bool,
    file_origin_length: u64,
    downloaded_bytes: u64,
    download_progress: f32,
    wait_reported: bool,
    steps: Steps,
}

impl CacheTransfer {
    pub fn new(
        store: Rc<CacheStore>,
        backend: Rc<dyn DownloadBackend>,
        copy_services: Rc<dyn CopyFileServices>,
        settings: TransferSettings,
        bundle: PackageBundle,
        url: &str,
    ) -> Self {
        let temp_file_path = store.paths().temp_file_path(&bundle);
        Self {
            core: OperationCore::new("CacheTransfer"),
            store,
            backend,
            copy_services,
            settings,
            local_path: local_file_path(url),
            url: url.to_string(),
            bundle,
            temp_file_path,
            refs: RefCount::default(),
            request: None,
            enable_resume: false,
            file_origin_length: 0,
            downloaded_bytes: 0,
            download_progress: 0.0,
            wait_reported: false,
            steps: Steps::None,
        }
    }

    fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    fn finish(&mut self, result: Result<(), String>) {
        self.steps = Steps::Done;
        match result {
            Ok(()) => self.core.succeed(),
            Err(message) => self.core.fail(message),
        }
    }

    fn remove_temp_file(&self) {
        if self.temp_file_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.temp_file_path) {
                warn!("Failed to remove temp file {}: {}", self.temp_file_path.display(), e);
            }
        }
    }

    fn copy_local_file(&mut self) {
        let Some(source) = self.local_path.clone() else {
            return;
        };
        self.remove_temp_file();
        match self.copy_services.copy_file(&source, &self.temp_file_path) {
            Ok(_) if self.temp_file_path.exists() => {
                self.download_progress = 1.0;
                self.downloaded_bytes = self.bundle.file_size;
                self.steps = Steps::VerifyBundleFile;
            }
            Ok(_) => self.finish(Err(format!("Failed copy local file : {}", self.url))),
            Err(e) => self.finish(Err(format!("Failed copy local file : {}", e))),
        }
    }

    fn create_request(&mut self) {
        if let Some(parent) = self.temp_file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                self.finish(Err(CacheError::Io(e).to_string()));
                return;
            }
        }

        self.enable_resume = self.bundle.file_size >= self.settings.resume_minimum_size;
        let mut args = FileRequestArgs::new(self.url.clone(), self.temp_file_path.clone())
            .with_watchdog(self.settings.watchdog);
        if self.enable_resume {
            self.file_origin_length = 0;
            if let Ok(metadata) = std::fs::metadata(&self.temp_file_path) {
                if metadata.len() >= self.bundle.file_size {
                    self.remove_temp_file();
                } else {
                    self.file_origin_length = metadata.len();
                }
            }
            args = args.with_resume(self.file_origin_length);
        } else {
            self.remove_temp_file();
        }

        debug!(
            "Downloading {} from {} (resume from {} bytes)",
            self.bundle.bundle_name, self.url, self.file_origin_length
        );
        let mut request = self.backend.create_file_request(args);
        request.send_request();
        self.request = Some(request);
        self.steps = Steps::CheckRequest;
    }

    fn check_request(&mut self, ctx: &TickContext) {
        let Some(mut request) = self.request.take() else {
            return;
        };
        request.poll_request(ctx.delta());
        self.download_progress = request.download_progress();
        self.downloaded_bytes = self.file_origin_length + request.downloaded_bytes();
        self.core.set_progress(self.download_progress);
        if !request.is_done() {
            self.request = Some(request);
            return;
        }

        if request.status() == RequestStatus::Succeed {
            self.steps = Steps::VerifyBundleFile;
        } else {
            self.finish(Err(request.error().to_string()));
        }

        if self.enable_resume && self.settings.resume_response_codes.contains(&request.http_code()) {
            self.remove_temp_file();
        }
        request.dispose();
    }

    fn verify_temp_file(&self) -> Result<(), String> {
        if !self.temp_file_path.exists() {
            return Err(CacheError::FileNotFound {
                path: self.temp_file_path.clone(),
            }
            .to_string());
        }
        let (crc, size) = file_crc_and_size(&self.temp_file_path).map_err(|e| e.to_string())?;
        if size != self.bundle.file_size {
            return Err(CacheError::SizeMismatch {
                expected: self.bundle.file_size,
                actual: size,
            }
            .to_string());
        }
        if crc != self.bundle.file_crc {
            return Err(CacheError::CrcMismatch {
                expected: self.bundle.file_crc,
                actual: crc,
            }
            .to_string());
        }
        Ok(())
    }
}

impl Operation for CacheTransfer {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = if self.is_local() {
            Steps::CopyLocalFile
        } else {
            Steps::CreateRequest
        };
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if matches!(self.steps, Steps::None | Steps::Done) {
            return;
        }

        if self.steps == Steps::CopyLocalFile {
            self.copy_local_file();
        }

        if self.steps == Steps::CreateRequest {
            self.create_request();
        }

        if self.steps == Steps::CheckRequest {
            self.check_request(ctx);
        }

        if self.steps == Steps::VerifyBundleFile {
            match self.verify_temp_file() {
                Ok(()) => self.steps = Steps::CacheBundleFile,
                Err(message) => {
                    error!("{}", message);
                    self.remove_temp_file();
                    self.finish(Err(message));
                }
            }
        }

        if self.steps == Steps::CacheBundleFile {
            let result = if self.store.write_cache_bundle_file(&self.bundle, &self.temp_file_path) {
                Ok(())
            } else {
                Err(CacheError::WriteFailed {
                    file_system: self.store.name().to_string(),
                }
                .to_string())
            };
            self.remove_temp_file();
            self.finish(result);
        }
    }

    fn on_abort(&mut self) {
        if let Some(request) = self.request.as_mut() {
            request.abort_request();
        }
        self.steps = Steps::Done;
    }

    /// Remote transfers keep running in the background instead of blocking
    fn on_wait(&mut self, ctx: &TickContext) {
        if self.is_local() {
            while !self.execute_while_done(ctx) {
                std::thread::sleep(ctx.wait_poll_interval());
            }
        } else if !self.wait_reported && self.steps != Steps::Done {
            self.wait_reported = true;
            error!("Try load bundle {} from remote : {} !", self.bundle.bundle_name, self.url);
        }
    }

    fn description(&self) -> String {
        format!("{} <- {}", self.bundle.bundle_name, self.url)
    }
}

impl Transfer for CacheTransfer {
    fn url(&self) -> &str {
        &self.url
    }

    fn reference(&mut self) {
        self.refs.reference();
    }

    fn release(&mut self) {
        self.refs.release();
    }

    fn ref_count(&self) -> i32 {
        self.refs.get()
    }

    fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    fn download_progress(&self) -> f32 {
        self.download_progress
    }
}
