//! Cooperative operation scheduler
//!
//! This module provides the unit of asynchronous work used by the whole
//! engine and the per-frame driver that advances it. Work is polled, never
//! preempted: each update does a bounded amount of work and returns.
//!
//! # Key Features
//!
//! - **Explicit state machines**: operations keep a private step enum and advance one step per update
//! - **Exactly-once completion**: terminal status is immutable and callbacks fire once
//! - **Synchronous drain**: `wait_for_async_complete` drives the same step function in a bounded loop
//! - **Time slicing**: the driver stops a frame once its time slice is spent
//!
//! # Module Organization
//!
//! - [`types`] - Status, outcome and tick context
//! - [`core`] - The `Operation` contract and shared lifecycle state
//! - [`config`] - Time slice and wait budget configuration
//! - [`system`] - The per-frame driver
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use bundle_fetcher::app::operation::{Operation, OperationSystem, SharedOperation};
//!
//! # fn example(op: SharedOperation) {
//! let system = OperationSystem::default();
//! system.start_operation(op.clone());
//! while !op.borrow().is_done() {
//!     system.update(Duration::from_millis(16));
//! }
//! # }
//! ```

pub mod config;
pub mod core;
pub mod system;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export main types for public API
pub use config::OperationSystemConfig;
pub use core::{
    on_completed, wait_shared, Completed, Completion, Operation, OperationCore, SharedOperation,
};
pub use system::OperationSystem;
pub use types::{OperationOutcome, OperationStatus, TickContext};
