//! Core data structures for cooperative operations
//!
//! This module defines the status of an operation, the outcome handed to
//! completion callbacks, and the per-frame tick context that carries the
//! frame delta and time-slice budget into every update.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::constants::operation;

/// Status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OperationStatus {
    /// Created but not started
    #[default]
    None,
    /// Started and advancing its internal steps
    Processing,
    /// Finished successfully
    Succeed,
    /// Finished with an error
    Failed,
}

impl OperationStatus {
    /// Check if the status is terminal
    pub fn is_done(&self) -> bool {
        matches!(self, OperationStatus::Succeed | OperationStatus::Failed)
    }

    /// Check if the status represents success
    pub fn is_succeed(&self) -> bool {
        matches!(self, OperationStatus::Succeed)
    }
}

/// Terminal result handed to completion callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    /// Operation type name
    pub name: &'static str,
    /// Terminal status
    pub status: OperationStatus,
    /// Error string, empty on success
    pub error: String,
}

impl OperationOutcome {
    /// Check if the operation succeeded
    pub fn is_succeed(&self) -> bool {
        self.status.is_succeed()
    }
}

/// Per-frame context passed to every operation update
///
/// The delta drives time-based steps such as the retry interval and
/// simulated transfer speed, so tests can advance time deterministically.
#[derive(Debug, Clone)]
pub struct TickContext {
    delta: Duration,
    frame_start: Instant,
    time_slice: Option<Duration>,
    wait_budget: u32,
    wait_poll_interval: Duration,
}

impl TickContext {
    /// Create a context for one frame of `delta` with no time slice
    pub fn new(delta: Duration) -> Self {
        Self {
            delta,
            frame_start: Instant::now(),
            time_slice: None,
            wait_budget: operation::WAIT_FRAME_BUDGET,
            wait_poll_interval: operation::WAIT_POLL_INTERVAL,
        }
    }

    /// Limit the frame to a time slice
    pub fn with_time_slice(mut self, time_slice: Option<Duration>) -> Self {
        self.time_slice = time_slice;
        self
    }

    /// Set the synchronous wait frame budget
    pub fn with_wait_budget(mut self, budget: u32) -> Self {
        self.wait_budget = budget;
        self
    }

    /// Set the sleep between synchronous wait frames
    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Time elapsed since the previous frame
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Frame delta in seconds
    pub fn delta_secs(&self) -> f64 {
        self.delta.as_secs_f64()
    }

    /// Check if the frame has used up its time slice
    pub fn is_busy(&self) -> bool {
        match self.time_slice {
            Some(slice) => self.frame_start.elapsed() >= slice,
            None => false,
        }
    }

    /// Frames a synchronous wait may spend
    pub fn wait_budget(&self) -> u32 {
        self.wait_budget
    }

    /// Sleep between synchronous wait frames
    pub fn wait_poll_interval(&self) -> Duration {
        self.wait_poll_interval
    }

    /// Context used for the frames of a synchronous wait
    ///
    /// Each wait frame advances time by the poll interval and is never busy.
    pub fn wait_frame(&self) -> TickContext {
        TickContext {
            delta: self.wait_poll_interval,
            frame_start: Instant::now(),
            time_slice: None,
            wait_budget: self.wait_budget,
            wait_poll_interval: self.wait_poll_interval,
        }
    }
}

impl Default for TickContext {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_helpers() {
        assert!(!OperationStatus::None.is_done());
        assert!(!OperationStatus::Processing.is_done());
        assert!(OperationStatus::Succeed.is_done());
        assert!(OperationStatus::Failed.is_done());
        assert!(OperationStatus::Succeed.is_succeed());
        assert!(!OperationStatus::Failed.is_succeed());
        assert_eq!(OperationStatus::default(), OperationStatus::None);
    }

    #[test]
    fn test_tick_context_busy() {
        // Without a time slice the frame is never busy
        let ctx = TickContext::new(Duration::from_millis(16));
        assert!(!ctx.is_busy());
        assert_eq!(ctx.delta(), Duration::from_millis(16));

        // A zero slice is exhausted immediately
        let ctx = TickContext::new(Duration::ZERO).with_time_slice(Some(Duration::ZERO));
        assert!(ctx.is_busy());
    }

    #[test]
    fn test_wait_frame_uses_poll_interval() {
        let ctx = TickContext::new(Duration::from_secs(5))
            .with_time_slice(Some(Duration::ZERO))
            .with_wait_poll_interval(Duration::from_millis(2));
        let frame = ctx.wait_frame();
        assert_eq!(frame.delta(), Duration::from_millis(2));
        assert!(!frame.is_busy());
    }
}
