//! Per-frame operation driver
//!
//! The host owns one [`OperationSystem`] and calls [`OperationSystem::update`]
//! once per frame. Operations started during a frame are merged into the
//! live list at the start of the next frame, ordered by descending priority.

use std::cell::{Cell, RefCell};
use std::mem;
use std::time::{Duration, Instant};

use tracing::debug;

use super::config::OperationSystemConfig;
use super::core::SharedOperation;
use super::types::TickContext;

/// Cooperative single-threaded operation scheduler
pub struct OperationSystem {
    config: OperationSystemConfig,
    operations: RefCell<Vec<SharedOperation>>,
    new_operations: RefCell<Vec<SharedOperation>>,
    frame_start: Cell<Instant>,
    frame_count: Cell<u64>,
}

impl OperationSystem {
    /// Create an operation system with the given configuration
    pub fn new(config: OperationSystemConfig) -> Self {
        Self {
            config,
            operations: RefCell::new(Vec::new()),
            new_operations: RefCell::new(Vec::new()),
            frame_start: Cell::new(Instant::now()),
            frame_count: Cell::new(0),
        }
    }

    pub fn config(&self) -> &OperationSystemConfig {
        &self.config
    }

    /// Register and start an operation
    ///
    /// Safe to call from inside another operation's update.
    pub fn start_operation(&self, operation: SharedOperation) {
        operation.borrow_mut().start();
        self.new_operations.borrow_mut().push(operation);
    }

    /// Advance every live operation by one frame
    pub fn update(&self, delta: Duration) {
        self.frame_start.set(Instant::now());
        self.frame_count.set(self.frame_count.get() + 1);

        let added = mem::take(&mut *self.new_operations.borrow_mut());
        if !added.is_empty() {
            let mut operations = self.operations.borrow_mut();
            operations.extend(added);
            operations.sort_by_key(|op| std::cmp::Reverse(priority_of(op)));
        }

        let ctx = self.context(delta);
        let snapshot: Vec<SharedOperation> = self.operations.borrow().clone();
        for operation in snapshot {
            if ctx.is_busy() {
                debug!("Operation frame {} ran out of time slice", self.frame_count.get());
                break;
            }
            let completed = {
                let Ok(mut operation) = operation.try_borrow_mut() else {
                    continue;
                };
                if operation.core().is_finish() {
                    continue;
                }
                operation.tick(&ctx)
            };
            if let Some(completed) = completed {
                completed.deliver();
            }
        }

        self.operations
            .borrow_mut()
            .retain(|op| op.try_borrow().map(|op| !op.core().is_finish()).unwrap_or(true));
    }

    /// Context for a frame of `delta` under this system's configuration
    pub fn context(&self, delta: Duration) -> TickContext {
        TickContext::new(delta)
            .with_time_slice(self.config.max_time_slice)
            .with_wait_budget(self.config.wait_frame_budget)
            .with_wait_poll_interval(self.config.wait_poll_interval)
    }

    /// Check if the current frame has used up its time slice
    pub fn is_busy(&self) -> bool {
        match self.config.max_time_slice {
            Some(slice) => self.frame_start.get().elapsed() >= slice,
            None => false,
        }
    }

    /// Number of live and newly started operations
    pub fn operation_count(&self) -> usize {
        self.operations.borrow().len() + self.new_operations.borrow().len()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.get()
    }

    /// Abort and drop every operation
    pub fn abort_all(&self) {
        let mut all = mem::take(&mut *self.operations.borrow_mut());
        all.append(&mut self.new_operations.borrow_mut());
        for operation in all {
            if let Ok(mut operation) = operation.try_borrow_mut() {
                operation.abort();
            }
        }
    }
}

impl Default for OperationSystem {
    fn default() -> Self {
        Self::new(OperationSystemConfig::default())
    }
}

fn priority_of(operation: &SharedOperation) -> u32 {
    operation
        .try_borrow()
        .map(|op| op.core().priority())
        .unwrap_or_default()
}
