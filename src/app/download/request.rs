//! Pollable download request contract
//!
//! A request is created by a backend, sent once, polled every tick until
//! terminal, and disposed. `downloaded_bytes` counts bytes transferred by
//! this request only, never bytes resumed from an earlier partial file.

use std::time::Duration;

use super::types::{RequestKind, RequestState, RequestStatus, ResponseHeaders};

/// One in-flight transfer
pub trait DownloadRequest {
    /// Shared lifecycle state
    fn state(&self) -> &RequestState;

    /// Start the transfer; does nothing unless the status is `None`
    fn send_request(&mut self);

    /// Advance the transfer; does nothing unless the status is `Running`
    ///
    /// Timeout and watchdog limits are checked here against `delta`.
    fn poll_request(&mut self, delta: Duration);

    /// Abort from `None` or `Running`; later polls are no-ops
    fn abort_request(&mut self);

    /// Release transport resources
    fn dispose(&mut self) {}

    /// Response headers, available once a head request succeeded
    fn response_headers(&self) -> Option<&ResponseHeaders> {
        None
    }

    /// Take the downloaded payload of a bytes, text or bundle request
    fn take_data(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Take the payload decoded as UTF-8
    fn take_text(&mut self) -> Option<String> {
        self.take_data().and_then(|data| String::from_utf8(data).ok())
    }

    fn kind(&self) -> RequestKind {
        self.state().kind()
    }

    fn url(&self) -> &str {
        self.state().url()
    }

    fn status(&self) -> RequestStatus {
        self.state().status()
    }

    fn is_done(&self) -> bool {
        self.state().status().is_done()
    }

    fn download_progress(&self) -> f32 {
        self.state().progress()
    }

    fn downloaded_bytes(&self) -> u64 {
        self.state().downloaded_bytes()
    }

    fn http_code(&self) -> u16 {
        self.state().http_code()
    }

    fn error(&self) -> &str {
        self.state().error()
    }

    /// Case-insensitive response header lookup
    fn response_header(&self, name: &str) -> Option<String> {
        self.response_headers()
            .and_then(|headers| headers.get(name))
            .map(str::to_string)
    }
}
