//! Shared download scheduler
//!
//! One scheduler per file system owns every in-flight transfer, keyed by
//! bundle GUID. A second request for a bundle already in flight takes a
//! reference on the existing transfer. Transfers wait in `None` until a
//! concurrency slot frees up; transfers whose references all went away are
//! aborted on the next update.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use super::backend::DownloadBackend;
use super::transfer::SharedTransfer;
use crate::app::operation::{
    Operation, OperationCore, OperationStatus, OperationSystem, SharedOperation, TickContext,
};

/// Concurrency limits for a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    pub max_concurrency: usize,
    pub max_request_per_frame: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            max_concurrency: crate::constants::download::DEFAULT_MAX_CONCURRENCY,
            max_request_per_frame: crate::constants::download::DEFAULT_MAX_REQUEST_PER_FRAME,
        }
    }
}

/// Deduplicating, concurrency-bounded owner of transfers
pub struct DownloadScheduler {
    backend: Rc<dyn DownloadBackend>,
    limits: SchedulerLimits,
    transfers: RefCell<Vec<(String, SharedTransfer)>>,
    paused: Cell<bool>,
    active: Cell<usize>,
}

impl DownloadScheduler {
    pub fn new(backend: Rc<dyn DownloadBackend>, limits: SchedulerLimits) -> Rc<Self> {
        Rc::new(Self {
            backend,
            limits,
            transfers: RefCell::new(Vec::new()),
            paused: Cell::new(false),
            active: Cell::new(0),
        })
    }

    pub fn backend(&self) -> &Rc<dyn DownloadBackend> {
        &self.backend
    }

    /// Return the transfer for `guid`, creating it when none is in flight
    ///
    /// The returned transfer carries one new reference for the caller.
    pub fn download(&self, guid: &str, create: impl FnOnce() -> SharedTransfer) -> SharedTransfer {
        let existing = self
            .transfers
            .borrow()
            .iter()
            .find(|(key, _)| key == guid)
            .map(|(_, transfer)| transfer.clone());

        let transfer = match existing {
            Some(transfer) => transfer,
            None => {
                let transfer = create();
                self.transfers
                    .borrow_mut()
                    .push((guid.to_string(), transfer.clone()));
                debug!("Scheduled download {}", guid);
                transfer
            }
        };
        if let Ok(mut transfer) = transfer.try_borrow_mut() {
            transfer.reference();
        }
        transfer
    }

    /// Stop starting new transfers; running ones continue
    pub fn pause(&self) {
        self.paused.set(true);
    }

    pub fn resume(&self) {
        self.paused.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    /// Transfers started and not yet finished
    pub fn active_download_count(&self) -> usize {
        self.active.get()
    }

    /// Transfers waiting for a slot
    pub fn pending_download_count(&self) -> usize {
        self.transfers.borrow().len().saturating_sub(self.active.get())
    }

    pub fn download_count(&self) -> usize {
        self.transfers.borrow().len()
    }

    /// Abort and forget every transfer
    pub fn abort_all(&self) {
        let transfers = std::mem::take(&mut *self.transfers.borrow_mut());
        for (_, transfer) in transfers {
            if let Ok(mut transfer) = transfer.try_borrow_mut() {
                transfer.abort();
            }
        }
        self.active.set(0);
    }

    /// One scheduling pass
    pub fn update(&self, ctx: &TickContext) {
        self.backend.update();

        let snapshot = self.transfers.borrow().clone();
        let mut removed = Vec::new();
        for (guid, transfer) in &snapshot {
            let Ok(mut transfer) = transfer.try_borrow_mut() else {
                continue;
            };
            transfer.update(ctx);
            if transfer.is_done() {
                removed.push(guid.clone());
                continue;
            }
            if transfer.ref_count() <= 0 {
                debug!("Aborting unreferenced download {}", guid);
                transfer.abort();
                removed.push(guid.clone());
            }
        }
        if !removed.is_empty() {
            self.transfers
                .borrow_mut()
                .retain(|(guid, _)| !removed.contains(guid));
        }

        let transfers = self.transfers.borrow().clone();
        let active = transfers
            .iter()
            .filter(|(_, t)| t.try_borrow().map(|t| t.status() != OperationStatus::None).unwrap_or(true))
            .count();
        self.active.set(active);
        if self.paused.get() || active == transfers.len() || active >= self.limits.max_concurrency {
            return;
        }

        let mut start_count = (self.limits.max_concurrency - active).min(self.limits.max_request_per_frame);
        for (_, transfer) in &transfers {
            if start_count == 0 {
                break;
            }
            let Ok(mut transfer) = transfer.try_borrow_mut() else {
                continue;
            };
            if transfer.status() == OperationStatus::None {
                transfer.start();
                start_count -= 1;
                self.active.set(self.active.get() + 1);
            }
        }
    }

    /// Abort everything and release the backend
    pub fn dispose(&self) {
        self.abort_all();
        self.backend.dispose();
    }
}

/// Drives a [`DownloadScheduler`] from the operation system
///
/// Never finishes on its own; abort it to stop scheduling.
pub struct DownloadSchedulerOperation {
    core: OperationCore,
    scheduler: Rc<DownloadScheduler>,
}

impl DownloadSchedulerOperation {
    pub fn new(scheduler: Rc<DownloadScheduler>) -> Self {
        Self {
            core: OperationCore::new("DownloadSchedulerOperation"),
            scheduler,
        }
    }
}

impl Operation for DownloadSchedulerOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {}

    fn on_update(&mut self, ctx: &TickContext) {
        self.scheduler.update(ctx);
    }

    fn on_abort(&mut self) {
        self.scheduler.dispose();
    }

    fn description(&self) -> String {
        format!(
            "{} active, {} pending",
            self.scheduler.active_download_count(),
            self.scheduler.pending_download_count()
        )
    }
}

/// Registers a file system's scheduler with the host's operation system
///
/// Registration happens at most once; disposing aborts the registered
/// operation, or the scheduler directly when it was never registered.
pub struct SchedulerRegistration {
    operations: Rc<OperationSystem>,
    operation: RefCell<Option<SharedOperation>>,
}

impl SchedulerRegistration {
    pub fn new(operations: Rc<OperationSystem>) -> Self {
        Self {
            operations,
            operation: RefCell::new(None),
        }
    }

    pub fn operations(&self) -> &Rc<OperationSystem> {
        &self.operations
    }

    pub fn is_started(&self) -> bool {
        self.operation.borrow().is_some()
    }

    /// Start driving `scheduler` from the operation system
    pub fn start(&self, scheduler: &Rc<DownloadScheduler>) {
        let mut slot = self.operation.borrow_mut();
        if slot.is_none() {
            let operation: SharedOperation =
                Rc::new(RefCell::new(DownloadSchedulerOperation::new(scheduler.clone())));
            self.operations.start_operation(operation.clone());
            *slot = Some(operation);
        }
    }

    pub fn dispose(&self, scheduler: &DownloadScheduler) {
        let operation = self.operation.borrow_mut().take();
        match operation.map(|op| op.try_borrow_mut().map(|mut op| op.abort()).is_ok()) {
            Some(true) => {}
            _ => scheduler.dispose(),
        }
    }
}
