//! Bundle download with retry and URL fallback
//!
//! [`BundleDownloadOperation`] checks the file system first, then asks it
//! for a shared transfer. A failed transfer is retried after a fixed one
//! second wait while retries remain, alternating between the main URL
//! (odd attempts) and the fallback URL (even attempts). Synchronous waits
//! never retry: the first failure is terminal.

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::config::DownloadFileOptions;
use super::transfer::{SharedTransfer, TransferSource};
use crate::app::manifest::PackageBundle;
use crate::app::operation::{Operation, OperationCore, TickContext};
use crate::constants::download::RETRY_INTERVAL;
use crate::errors::DownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    CheckExists,
    CreateRequest,
    CheckRequest,
    TryAgain,
    Done,
}

/// Download one bundle into a file system, retrying on failure
pub struct BundleDownloadOperation {
    core: OperationCore,
    bundle: PackageBundle,
    source: Rc<dyn TransferSource>,
    options: DownloadFileOptions,
    transfer: Option<SharedTransfer>,
    request_count: u32,
    try_again_timer: Duration,
    failed_try_again: u32,
    downloaded_bytes: u64,
    download_progress: f32,
    steps: Steps,
}

impl BundleDownloadOperation {
    pub fn new(
        source: Rc<dyn TransferSource>,
        bundle: PackageBundle,
        options: DownloadFileOptions,
    ) -> Self {
        let failed_try_again = options.failed_try_again;
        Self {
            core: OperationCore::new("BundleDownloadOperation"),
            bundle,
            source,
            options,
            transfer: None,
            request_count: 0,
            try_again_timer: Duration::ZERO,
            failed_try_again,
            downloaded_bytes: 0,
            download_progress: 0.0,
            steps: Steps::None,
        }
    }

    pub fn bundle(&self) -> &PackageBundle {
        &self.bundle
    }

    /// Bytes received by the current attempt
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn download_progress(&self) -> f32 {
        self.download_progress
    }

    /// Number of transfers requested so far
    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    fn next_request_url(&mut self) -> String {
        self.request_count += 1;
        self.options.url_for_attempt(self.request_count).to_string()
    }

    fn check_request(&mut self, ctx: &TickContext) {
        let Some(transfer) = self.transfer.clone() else {
            self.steps = Steps::CreateRequest;
            return;
        };

        let waiting = self.core.is_wait_for_async_complete();
        if waiting {
            // Nothing else ticks the transfer while this thread is blocked
            if let Ok(mut transfer) = transfer.try_borrow_mut() {
                transfer.wait_for_async_complete(ctx);
                transfer.update(ctx);
            }
        }

        let Ok(transfer) = transfer.try_borrow() else {
            return;
        };
        self.core.set_progress(transfer.progress());
        self.downloaded_bytes = transfer.downloaded_bytes();
        self.download_progress = transfer.download_progress();
        if !transfer.is_done() {
            return;
        }

        if transfer.status().is_succeed() {
            self.steps = Steps::Done;
            self.core.succeed();
        } else if !waiting && self.failed_try_again > 0 {
            warn!("Failed download : {} Try again !", transfer.url());
            self.steps = Steps::TryAgain;
        } else {
            let message = transfer.error().to_string();
            error!("{}", message);
            self.steps = Steps::Done;
            self.core.fail(message);
        }
    }
}

impl Operation for BundleDownloadOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {
        self.steps = Steps::CheckExists;
    }

    fn on_update(&mut self, ctx: &TickContext) {
        if matches!(self.steps, Steps::None | Steps::Done) {
            return;
        }

        if self.steps == Steps::CheckExists {
            if self.source.exists(&self.bundle) {
                debug!("Bundle {} already present", self.bundle.bundle_name);
                self.steps = Steps::Done;
                self.core.succeed();
                return;
            }
            self.steps = Steps::CreateRequest;
        }

        if self.steps == Steps::CreateRequest {
            if !self.options.is_valid() {
                let message = DownloadError::InvalidOptions.to_string();
                error!("{}", message);
                self.steps = Steps::Done;
                self.core.fail(message);
                return;
            }

            let url = self.next_request_url();
            debug!(
                "Requesting bundle {} from {} (attempt {})",
                self.bundle.bundle_name, url, self.request_count
            );
            self.transfer = Some(self.source.begin_transfer(&self.bundle, &url));
            self.steps = Steps::CheckRequest;
        }

        if self.steps == Steps::CheckRequest {
            self.check_request(ctx);
        }

        if self.steps == Steps::TryAgain {
            self.try_again_timer += ctx.delta();
            if self.try_again_timer > RETRY_INTERVAL {
                self.try_again_timer = Duration::ZERO;
                self.failed_try_again -= 1;
                self.core.set_progress(0.0);
                self.download_progress = 0.0;
                self.downloaded_bytes = 0;
                self.steps = Steps::CreateRequest;
            }
        }
    }

    fn on_abort(&mut self) {
        if self.steps != Steps::Done {
            if let Some(transfer) = &self.transfer {
                if let Ok(mut transfer) = transfer.try_borrow_mut() {
                    transfer.release();
                }
            }
        }
        self.steps = Steps::Done;
    }

    fn description(&self) -> String {
        format!("{} attempt {}", self.bundle.bundle_name, self.request_count)
    }
}
