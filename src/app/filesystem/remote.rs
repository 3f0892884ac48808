//! Version and manifest operations over a download backend
//!
//! Shared by the cache and web server file systems. Both fetch
//! `{package}.version` as text and `{package}_{version}.json` as bytes;
//! the cache file system also keeps the raw manifest bytes on disk.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ManifestOperation, VersionOperation};
use crate::app::download::{DataRequestArgs, DownloadBackend, DownloadRequest, RequestStatus};
use crate::app::manifest::{ManifestServices, PackageManifest};
use crate::app::operation::{Operation, OperationCore, TickContext};
use crate::errors::ManifestError;

/// Operation that finishes on its first update with a precomputed result
pub struct InstantOperation<T> {
    core: OperationCore,
    result: Option<Result<T, String>>,
    value: Option<T>,
}

impl<T> InstantOperation<T> {
    pub fn new(name: &'static str, result: Result<T, String>) -> Self {
        Self {
            core: OperationCore::new(name),
            result: Some(result),
            value: None,
        }
    }
}

impl<T> Operation for InstantOperation<T> {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {}

    fn on_update(&mut self, _ctx: &TickContext) {
        match self.result.take() {
            Some(Ok(value)) => {
                self.value = Some(value);
                self.core.succeed();
            }
            Some(Err(message)) => self.core.fail(message),
            None => {}
        }
    }
}

impl VersionOperation for InstantOperation<String> {
    fn package_version(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }
}

impl ManifestOperation for InstantOperation<PackageManifest> {
    fn take_manifest(&mut self) -> Option<PackageManifest> {
        self.value.take()
    }
}

/// Append a cache-busting query to `url`
pub fn with_time_ticks(url: &str) -> String {
    format!("{}?{}", url, chrono::Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionSteps {
    None,
    CreateRequest,
    CheckRequest,
    Done,
}

/// Fetch a package version file as text
pub struct RemoteVersionOperation {
    core: OperationCore,
    backend: Rc<dyn DownloadBackend>,
    url: String,
    timeout: Option<Duration>,
    request: Option<Box<dyn DownloadRequest>>,
    version: String,
    steps: VersionSteps,
}

impl RemoteVersionOperation {
    pub fn new(backend: Rc<dyn DownloadBackend>, url: String, timeout: Option<Duration>) -> Self {
        Self {
            core: OperationCore::new("RemoteVersionOperation"),
            backend,
            url,
            timeout,
            request: None,
            version: String::new(),
            steps: VersionSteps::None,
        }
    }
}

impl Operation for RemoteVersionOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = VersionSteps::CreateRequest;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if self.steps == VersionSteps::CreateRequest {
            let args = DataRequestArgs::new(self.url.clone()).with_timeout(self.timeout);
            let mut request = self.backend.create_text_request(args);
            request.send_request();
            self.request = Some(request);
            self.steps = VersionSteps::CheckRequest;
        }

        if self.steps == VersionSteps::CheckRequest {
            let Some(request) = self.request.as_mut() else {
                return;
            };
            request.poll_request(ctx.delta());
            self.core.set_progress(request.download_progress());
            if !request.is_done() {
                return;
            }

            self.steps = VersionSteps::Done;
            if request.status() != RequestStatus::Succeed {
                let message = request.error().to_string();
                self.core.fail(message);
                return;
            }
            let text = request.take_text().unwrap_or_default();
            let version = text.trim();
            if version.is_empty() {
                self.core.fail(ManifestError::EmptyVersion.to_string());
            } else {
                debug!("Remote package version {}", version);
                self.version = version.to_string();
                self.core.succeed();
            }
        }
    }

    fn on_abort(&mut self) {
        if let Some(request) = self.request.as_mut() {
            request.abort_request();
        }
    }
}

impl VersionOperation for RemoteVersionOperation {
    fn package_version(&self) -> &str {
        &self.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManifestSteps {
    None,
    CheckCache,
    CreateRequest,
    CheckRequest,
    Done,
}

/// Load a manifest from a local copy or over the backend
pub struct RemoteManifestOperation {
    core: OperationCore,
    backend: Rc<dyn DownloadBackend>,
    services: Rc<dyn ManifestServices>,
    url: String,
    cache_path: Option<PathBuf>,
    package_name: String,
    timeout: Option<Duration>,
    request: Option<Box<dyn DownloadRequest>>,
    manifest: Option<PackageManifest>,
    steps: ManifestSteps,
}

impl RemoteManifestOperation {
    pub fn new(
        backend: Rc<dyn DownloadBackend>,
        services: Rc<dyn ManifestServices>,
        package_name: impl Into<String>,
        url: String,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            core: OperationCore::new("RemoteManifestOperation"),
            backend,
            services,
            url,
            cache_path: None,
            package_name: package_name.into(),
            timeout,
            request: None,
            manifest: None,
            steps: ManifestSteps::None,
        }
    }

    /// Read the manifest from `path` when present and keep downloads there
    pub fn with_cache_path(mut self, path: PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }

    fn parse(&self, raw: Vec<u8>) -> Result<PackageManifest, String> {
        let restored = self.services.restore_manifest(raw).map_err(|reason| {
            ManifestError::RestoreFailed { reason }.to_string()
        })?;
        let manifest = PackageManifest::from_json(&restored).map_err(|e| e.to_string())?;
        if manifest.package_name != self.package_name {
            return Err(ManifestError::PackageMismatch {
                expected: self.package_name.clone(),
                found: manifest.package_name,
            }
            .to_string());
        }
        Ok(manifest)
    }

    fn finish(&mut self, result: Result<PackageManifest, String>) {
        self.steps = ManifestSteps::Done;
        match result {
            Ok(manifest) => {
                info!(
                    "Loaded manifest {} version {} ({} bundles)",
                    manifest.package_name,
                    manifest.package_version,
                    manifest.bundle_list.len()
                );
                self.manifest = Some(manifest);
                self.core.succeed();
            }
            Err(message) => self.core.fail(message),
        }
    }
}

impl Operation for RemoteManifestOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = ManifestSteps::CheckCache;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if self.steps == ManifestSteps::CheckCache {
            self.steps = ManifestSteps::CreateRequest;
            if let Some(path) = self.cache_path.clone().filter(|p| p.exists()) {
                match std::fs::read(&path).map_err(|e| e.to_string()).and_then(|raw| self.parse(raw)) {
                    Ok(manifest) => {
                        self.finish(Ok(manifest));
                        return;
                    }
                    Err(e) => {
                        warn!("Discarding cached manifest {}: {}", path.display(), e);
                        let _ = std::fs::remove_file(&path);
                    }
                }
            }
        }

        if self.steps == ManifestSteps::CreateRequest {
            let args = DataRequestArgs::new(self.url.clone()).with_timeout(self.timeout);
            let mut request = self.backend.create_bytes_request(args);
            request.send_request();
            self.request = Some(request);
            self.steps = ManifestSteps::CheckRequest;
        }

        if self.steps == ManifestSteps::CheckRequest {
            let Some(mut request) = self.request.take() else {
                return;
            };
            request.poll_request(ctx.delta());
            self.core.set_progress(request.download_progress());
            if !request.is_done() {
                self.request = Some(request);
                return;
            }

            if request.status() != RequestStatus::Succeed {
                self.finish(Err(request.error().to_string()));
                return;
            }
            let raw = request.take_data().unwrap_or_default();
            if let Some(path) = &self.cache_path {
                let written = path
                    .parent()
                    .map_or(Ok(()), std::fs::create_dir_all)
                    .and_then(|_| std::fs::write(path, &raw));
                if let Err(e) = written {
                    warn!("Failed to cache manifest {}: {}", path.display(), e);
                }
            }
            let result = self.parse(raw);
            self.finish(result);
        }
    }

    fn on_abort(&mut self) {
        if let Some(request) = self.request.as_mut() {
            request.abort_request();
        }
    }
}

impl ManifestOperation for RemoteManifestOperation {
    fn take_manifest(&mut self) -> Option<PackageManifest> {
        self.manifest.take()
    }
}
