//! Frame loop for the command-line host
//!
//! The engine is single-threaded and cooperative: something has to call
//! [`OperationSystem::update`] every frame. [`Host`] owns that loop, the
//! tokio runtime the HTTP backend moves bytes on, and the Ctrl-C flag that
//! aborts every live operation.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, Runtime};
use tracing::{debug, warn};

use crate::app::operation::{Operation, OperationOutcome, OperationSystem, OperationSystemConfig};
use crate::errors::{AppError, Result};

/// Runtime, operation system and frame pacing of the binary
pub struct Host {
    runtime: Runtime,
    operations: Rc<OperationSystem>,
    frame_interval: Duration,
    interrupted: Arc<AtomicBool>,
}

impl Host {
    /// Build the runtime and operation system
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` when the tokio runtime cannot be created
    pub fn new(config: OperationSystemConfig, frame_interval: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("bundle-fetcher-io")
            .build()?;

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        runtime.spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to setup Ctrl-C handler: {}", e);
                return;
            }
            eprintln!("\n🛑 Ctrl-C received - aborting downloads");
            flag.store(true, Ordering::SeqCst);
        });

        Ok(Self {
            runtime,
            operations: Rc::new(OperationSystem::new(config)),
            frame_interval,
            interrupted,
        })
    }

    /// Handle for backends that spawn transfers
    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn operations(&self) -> &Rc<OperationSystem> {
        &self.operations
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Run one frame and sleep for the rest of the frame interval
    pub fn frame(&self) {
        let start = Instant::now();
        self.operations.update(self.frame_interval);
        if let Some(rest) = self.frame_interval.checked_sub(start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    /// Run frames while `pending` returns true
    ///
    /// `pending` is checked before every frame. Returns the number of
    /// frames run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Interrupted` after aborting every live operation
    /// when Ctrl-C was pressed
    pub fn run_while<F>(&self, mut pending: F) -> Result<u64>
    where
        F: FnMut() -> bool,
    {
        let mut frames = 0u64;
        while pending() {
            if self.is_interrupted() {
                self.operations.abort_all();
                return Err(AppError::Interrupted);
            }
            self.frame();
            frames += 1;
        }
        Ok(frames)
    }

    /// Run frames until `operation` is done
    ///
    /// # Errors
    ///
    /// Returns `AppError::Interrupted` when Ctrl-C aborted the operation
    pub fn run_until<T>(&self, operation: &Rc<RefCell<T>>) -> Result<OperationOutcome>
    where
        T: Operation + ?Sized,
    {
        let frames = self.run_while(|| !operation.borrow().is_done())?;
        let outcome = operation.borrow().core().outcome();
        debug!("{} finished after {} frames: {:?}", outcome.name, frames, outcome.status);
        Ok(outcome)
    }

    /// Run frames until `operation` is done and turn a failure into an error
    ///
    /// # Errors
    ///
    /// Returns `AppError::Operation` carrying the operation's error string
    pub fn complete<T>(&self, operation: &Rc<RefCell<T>>) -> Result<()>
    where
        T: Operation + ?Sized,
    {
        let outcome = self.run_until(operation)?;
        if outcome.is_succeed() {
            Ok(())
        } else {
            Err(AppError::operation_failed(outcome.name, outcome.error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::filesystem::InstantOperation;
    use crate::app::operation::OperationStatus;

    fn host() -> Host {
        Host::new(OperationSystemConfig::default(), Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn test_run_until_completes_operation() {
        let host = host();
        let operation = Rc::new(RefCell::new(InstantOperation::new("TestOperation", Ok(()))));
        host.operations().start_operation(operation.clone());

        let outcome = host.run_until(&operation).unwrap();
        assert_eq!(outcome.status, OperationStatus::Succeed);
        assert!(host.operations().frame_count() >= 1);
    }

    #[test]
    fn test_complete_reports_failure() {
        let host = host();
        let operation = Rc::new(RefCell::new(InstantOperation::<()>::new(
            "TestOperation",
            Err("broken".to_string()),
        )));
        host.operations().start_operation(operation.clone());

        let error = host.complete(&operation).unwrap_err();
        assert!(error.to_string().contains("broken"));
    }

    #[test]
    fn test_run_while_counts_frames() {
        let host = host();
        let mut remaining = 3;
        let frames = host
            .run_while(|| {
                remaining -= 1;
                remaining >= 0
            })
            .unwrap();
        assert_eq!(frames, 3);
    }

    #[test]
    fn test_frame_advances_operation_system() {
        let host = host();
        host.frame();
        host.frame();
        assert_eq!(host.operations().frame_count(), 2);
    }
}
