//! Simulated transfer at a fixed speed
//!
//! Used by the editor file system to exercise download flows without I/O.

use std::time::Duration;

use super::config::SimulateRequestArgs;
use super::request::DownloadRequest;
use super::types::{RequestKind, RequestState};
use crate::constants::download::SIMULATED_HTTP_CODE;

/// Request that gains `speed * delta` bytes per poll
#[derive(Debug)]
pub struct VirtualFileRequest {
    state: RequestState,
    file_size: u64,
    speed: u64,
    transferred: f64,
}

impl VirtualFileRequest {
    pub fn new(args: SimulateRequestArgs) -> Self {
        Self {
            state: RequestState::new(RequestKind::Simulate, args.url, None, None),
            file_size: args.file_size,
            speed: args.speed,
            transferred: 0.0,
        }
    }
}

impl DownloadRequest for VirtualFileRequest {
    fn state(&self) -> &RequestState {
        &self.state
    }

    fn send_request(&mut self) {
        self.state.begin();
    }

    fn poll_request(&mut self, delta: Duration) {
        if !self.state.is_running() {
            return;
        }

        self.transferred += self.speed as f64 * delta.as_secs_f64();
        let bytes = (self.transferred as u64).min(self.file_size);
        self.state.set_transfer(bytes, Some(self.file_size));
        if bytes >= self.file_size {
            self.state.succeed(SIMULATED_HTTP_CODE);
        }
    }

    fn abort_request(&mut self) {
        self.state.abort();
    }
}
