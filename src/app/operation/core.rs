//! Operation contract and shared lifecycle state
//!
//! Every asynchronous unit of work implements [`Operation`]. Concrete
//! operations keep an [`OperationCore`] for the shared lifecycle fields and
//! implement the step hooks (`on_start`, `on_update`, `on_abort`, `on_wait`);
//! the provided methods enforce the lifecycle rules: start only from `None`,
//! terminal status is immutable, completion callbacks fire exactly once.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use tracing::{error, warn};

use super::types::{OperationOutcome, OperationStatus, TickContext};
use crate::errors::OperationError;

/// Operation shared between the scheduler and its callers
pub type SharedOperation = Rc<RefCell<dyn Operation>>;

/// Completion callback
pub type Completion = Box<dyn FnOnce(&OperationOutcome)>;

/// Callbacks drained from a finished operation, waiting to be run
///
/// Produced while the operation is mutably borrowed and delivered after the
/// borrow ends, so callbacks may read the operation they observe.
#[must_use = "completion callbacks only run when delivered"]
pub struct Completed {
    outcome: OperationOutcome,
    callbacks: Vec<Completion>,
}

impl Completed {
    pub fn outcome(&self) -> &OperationOutcome {
        &self.outcome
    }

    /// Run every drained callback in registration order
    pub fn deliver(self) {
        for callback in self.callbacks {
            callback(&self.outcome);
        }
    }
}

/// Lifecycle state shared by every operation
pub struct OperationCore {
    name: &'static str,
    status: OperationStatus,
    error: String,
    progress: f32,
    priority: u32,
    wait_for_async_complete: bool,
    wait_frames_left: Option<u32>,
    finished: bool,
    children: Vec<SharedOperation>,
    callbacks: Vec<Completion>,
}

impl OperationCore {
    /// Create the core for an operation type
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            status: OperationStatus::None,
            error: String::new(),
            progress: 0.0,
            priority: crate::constants::operation::DEFAULT_PRIORITY,
            wait_for_async_complete: false,
            wait_frames_left: None,
            finished: false,
            children: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Operation type name used in messages
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Set progress, clamped to `0.0..=1.0`
    pub fn set_progress(&mut self, progress: f32) {
        if !self.finished {
            self.progress = progress.clamp(0.0, 1.0);
        }
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    /// Check if completion has been delivered to callbacks
    pub fn is_finish(&self) -> bool {
        self.finished
    }

    pub fn is_wait_for_async_complete(&self) -> bool {
        self.wait_for_async_complete
    }

    /// Mark the operation succeeded; ignored once terminal
    pub fn succeed(&mut self) {
        if !self.is_done() {
            self.status = OperationStatus::Succeed;
            self.error.clear();
        }
    }

    /// Mark the operation failed; ignored once terminal
    pub fn fail(&mut self, error: impl Into<String>) {
        if !self.is_done() {
            self.status = OperationStatus::Failed;
            self.error = error.into();
        }
    }

    /// Register a child that is aborted before this operation
    pub fn add_child(&mut self, child: SharedOperation) {
        if !self.children.iter().any(|c| Rc::ptr_eq(c, &child)) {
            self.children.push(child);
        }
    }

    pub fn remove_child(&mut self, child: &SharedOperation) {
        self.children.retain(|c| !Rc::ptr_eq(c, child));
    }

    pub fn children(&self) -> &[SharedOperation] {
        &self.children
    }

    /// Register a completion callback
    ///
    /// Fires immediately when completion was already delivered.
    pub fn add_completed(&mut self, callback: Completion) {
        if self.finished {
            callback(&self.outcome());
        } else {
            self.callbacks.push(callback);
        }
    }

    /// Snapshot of the current status and error
    pub fn outcome(&self) -> OperationOutcome {
        OperationOutcome {
            name: self.name,
            status: self.status,
            error: self.error.clone(),
        }
    }

    fn begin(&mut self) -> bool {
        if self.status == OperationStatus::None {
            self.status = OperationStatus::Processing;
            true
        } else {
            false
        }
    }

    fn begin_wait(&mut self, budget: u32) {
        self.wait_for_async_complete = true;
        if self.wait_frames_left.is_none() {
            self.wait_frames_left = Some(budget);
        }
    }

    fn consume_wait_frame(&mut self) -> u32 {
        let left = self.wait_frames_left.unwrap_or(0).saturating_sub(1);
        self.wait_frames_left = Some(left);
        left
    }

    /// Mark completion once: progress to 1.0 and callbacks drained
    fn finish(&mut self) -> Option<Completed> {
        if !self.is_done() || self.finished {
            return None;
        }
        self.finished = true;
        self.progress = 1.0;
        Some(Completed {
            outcome: self.outcome(),
            callbacks: mem::take(&mut self.callbacks),
        })
    }
}

impl std::fmt::Debug for OperationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationCore")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("progress", &self.progress)
            .field("priority", &self.priority)
            .field("children", &self.children.len())
            .finish()
    }
}

/// A pollable unit of asynchronous work
///
/// Implementors provide the step hooks; callers and the scheduler use the
/// provided methods. Failures never escape: they become a terminal
/// `Failed` status plus an error string.
pub trait Operation {
    fn core(&self) -> &OperationCore;

    fn core_mut(&mut self) -> &mut OperationCore;

    /// One-time setup when the operation leaves `None`
    fn on_start(&mut self);

    /// Advance the internal state machine by one step
    fn on_update(&mut self, ctx: &TickContext);

    /// Release external resources after an abort
    fn on_abort(&mut self) {}

    /// Drive the operation to completion on the calling thread
    ///
    /// The default runs [`Operation::execute_while_done`] until it reports
    /// completion, sleeping the poll interval between frames.
    fn on_wait(&mut self, ctx: &TickContext) {
        while !self.execute_while_done(ctx) {
            std::thread::sleep(ctx.wait_poll_interval());
        }
    }

    /// Human-readable detail for diagnostics
    fn description(&self) -> String {
        String::new()
    }

    fn status(&self) -> OperationStatus {
        self.core().status()
    }

    fn error(&self) -> &str {
        self.core().error()
    }

    fn progress(&self) -> f32 {
        self.core().progress()
    }

    fn is_done(&self) -> bool {
        self.core().is_done()
    }

    /// Start the operation; does nothing unless the status is `None`
    fn start(&mut self) {
        if self.core_mut().begin() {
            self.on_start();
        }
    }

    /// Advance the operation by one frame and deliver completion
    fn update(&mut self, ctx: &TickContext) {
        if let Some(completed) = self.tick(ctx) {
            completed.deliver();
        }
    }

    /// Advance the operation by one frame, handing completion to the caller
    ///
    /// Used by owners that hold the operation borrowed: they deliver the
    /// returned callbacks once the borrow is released.
    fn tick(&mut self, ctx: &TickContext) -> Option<Completed> {
        if self.status() == OperationStatus::Processing {
            self.on_update(ctx);
        }
        self.core_mut().finish()
    }

    /// Abort children first, then this operation if it is unfinished
    fn abort(&mut self) {
        let children = self.core().children().to_vec();
        for child in children {
            match child.try_borrow_mut() {
                Ok(mut child) => child.abort(),
                Err(_) => warn!(
                    "Child of {} is being driven and was not aborted",
                    self.core().name()
                ),
            }
        }

        if !self.is_done() {
            self.core_mut().fail(OperationError::UserAbort.to_string());
            warn!("Operation {} aborted by user", self.core().name());
            self.on_abort();
        }
    }

    /// Run one synchronous wait frame and report completion
    ///
    /// Fails the operation once the wait frame budget is spent.
    fn execute_while_done(&mut self, ctx: &TickContext) -> bool {
        if !self.is_done() {
            self.on_update(ctx);
            let left = self.core_mut().consume_wait_frame();
            if left == 0 && !self.is_done() {
                let name = self.core().name().to_string();
                let message = OperationError::WaitBudgetExhausted { name }.to_string();
                error!("{}", message);
                self.core_mut().fail(message);
            }
        }
        self.is_done()
    }

    /// Block the calling thread until the operation is terminal
    ///
    /// Must not be called from inside a tick or a completion callback.
    fn wait_for_async_complete(&mut self, ctx: &TickContext) {
        if let Some(completed) = self.wait_until_done(ctx) {
            completed.deliver();
        }
    }

    /// Same as [`Operation::wait_for_async_complete`], handing completion
    /// to the caller
    fn wait_until_done(&mut self, ctx: &TickContext) -> Option<Completed> {
        if !self.is_done() {
            if self.status() == OperationStatus::None {
                self.start();
            }
            self.core_mut().begin_wait(ctx.wait_budget());
            let frame = ctx.wait_frame();
            if !self.is_done() {
                self.on_wait(&frame);
            }
        }
        self.core_mut().finish()
    }
}

/// Synchronously wait on a shared operation
///
/// # Errors
///
/// Returns `OperationError::ReentrantWait` when the operation is already
/// borrowed, i.e. the wait was requested from inside its own tick.
pub fn wait_shared<T>(operation: &Rc<RefCell<T>>, ctx: &TickContext) -> Result<(), OperationError>
where
    T: Operation + ?Sized,
{
    let completed = operation
        .try_borrow_mut()
        .map_err(|_| OperationError::ReentrantWait {
            name: std::any::type_name::<T>().to_string(),
        })?
        .wait_until_done(ctx);
    if let Some(completed) = completed {
        completed.deliver();
    }
    Ok(())
}

/// Register a completion callback on a shared operation
///
/// An already finished operation runs the callback right away, outside
/// any borrow of the operation.
pub fn on_completed<T, F>(operation: &Rc<RefCell<T>>, callback: F)
where
    T: Operation + ?Sized,
    F: FnOnce(&OperationOutcome) + 'static,
{
    let finished = {
        let operation = operation.borrow();
        operation.core().is_finish().then(|| operation.core().outcome())
    };
    match finished {
        Some(outcome) => callback(&outcome),
        None => operation
            .borrow_mut()
            .core_mut()
            .add_completed(Box::new(callback)),
    }
}
