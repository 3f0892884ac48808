//! Built-in file catalog
//!
//! A web server file system cannot list its directory, so the publisher
//! writes `{package}.catalog.json` next to the bundles. The catalog maps
//! each bundle GUID to the file name it is served under.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::download::{DataRequestArgs, DownloadBackend, DownloadRequest, RequestStatus};
use crate::app::operation::{Operation, OperationCore, TickContext};
use crate::errors::CatalogError;

/// One served bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogWrapper {
    #[serde(rename = "BundleGUID")]
    pub bundle_guid: String,
    pub file_name: String,
}

/// Bundles shipped with a package
///
/// Serialized as `{ "PackageName", "Wrappers": [{ "BundleGUID", "FileName" }] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Catalog {
    pub package_name: String,
    pub wrappers: Vec<CatalogWrapper>,
}

impl Catalog {
    /// Parse catalog JSON and check it belongs to `package_name`
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Parse` for malformed JSON and
    /// `CatalogError::PackageMismatch` for a catalog of another package
    pub fn parse(bytes: &[u8], package_name: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_slice(bytes)?;
        if catalog.package_name != package_name {
            return Err(CatalogError::PackageMismatch {
                catalog: catalog.package_name,
                file_system: package_name.to_string(),
            });
        }
        Ok(catalog)
    }

    /// GUID to file name lookup
    pub fn into_map(self) -> HashMap<String, String> {
        self.wrappers
            .into_iter()
            .map(|w| (w.bundle_guid, w.file_name))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    RequestData,
    LoadCatalog,
    Done,
}

/// Fetch and parse a package catalog
pub struct LoadCatalogOperation {
    core: OperationCore,
    backend: Rc<dyn DownloadBackend>,
    url: String,
    package_name: String,
    timeout: Option<Duration>,
    request: Option<Box<dyn DownloadRequest>>,
    catalog: Option<Catalog>,
    steps: Steps,
}

impl LoadCatalogOperation {
    pub fn new(
        backend: Rc<dyn DownloadBackend>,
        url: String,
        package_name: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            core: OperationCore::new("LoadCatalogOperation"),
            backend,
            url,
            package_name: package_name.into(),
            timeout,
            request: None,
            catalog: None,
            steps: Steps::None,
        }
    }

    pub fn take_catalog(&mut self) -> Option<Catalog> {
        self.catalog.take()
    }
}

impl Operation for LoadCatalogOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = Steps::RequestData;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if self.steps == Steps::RequestData {
            let args = DataRequestArgs::new(self.url.clone()).with_timeout(self.timeout);
            let mut request = self.backend.create_bytes_request(args);
            request.send_request();
            self.request = Some(request);
            self.steps = Steps::LoadCatalog;
        }

        if self.steps == Steps::LoadCatalog {
            let Some(request) = self.request.as_mut() else {
                return;
            };
            request.poll_request(ctx.delta());
            self.core.set_progress(request.download_progress());
            if !request.is_done() {
                return;
            }

            self.steps = Steps::Done;
            if request.status() != RequestStatus::Succeed {
                let message = request.error().to_string();
                self.core.fail(message);
                return;
            }
            let bytes = request.take_data().unwrap_or_default();
            match Catalog::parse(&bytes, &self.package_name) {
                Ok(catalog) => {
                    info!(
                        "Loaded catalog {} with {} files",
                        catalog.package_name,
                        catalog.wrappers.len()
                    );
                    self.catalog = Some(catalog);
                    self.core.succeed();
                }
                Err(e) => self.core.fail(e.to_string()),
            }
        }
    }

    fn on_abort(&mut self) {
        if let Some(request) = self.request.as_mut() {
            request.abort_request();
        }
    }
}
