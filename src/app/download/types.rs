//! Core data structures for download requests
//!
//! This module defines request status and kinds, the case-insensitive
//! response header table filled by head requests, and the shared request
//! state that every backend uses to enforce the request lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DownloadError;

/// Status of a download request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RequestStatus {
    /// Created, not sent
    #[default]
    None,
    /// Sent and in flight
    Running,
    /// Finished successfully
    Succeed,
    /// Finished with a transport error
    Failed,
    /// Aborted by the caller or the watchdog
    Aborted,
}

impl RequestStatus {
    /// Check if the status is terminal
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            RequestStatus::Succeed | RequestStatus::Failed | RequestStatus::Aborted
        )
    }
}

/// Kind of request produced by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Head,
    File,
    Bytes,
    Text,
    Bundle,
    Simulate,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Head => "HeadRequest",
            RequestKind::File => "FileRequest",
            RequestKind::Bytes => "BytesRequest",
            RequestKind::Text => "TextRequest",
            RequestKind::Bundle => "BundleRequest",
            RequestKind::Simulate => "SimulateRequest",
        };
        f.write_str(name)
    }
}

/// Response headers keyed by lower-cased name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    headers: HashMap<String, String>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header; later values replace earlier ones
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Look up a header by case-insensitive name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn etag(&self) -> Option<&str> {
        self.get("ETag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.get("Last-Modified")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    /// Content length, or -1 when missing or unparseable
    pub fn content_length(&self) -> i64 {
        self.get("Content-Length")
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(-1)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Lifecycle state shared by every request implementation
///
/// Enforces: send only from `None`, poll only while `Running`, abort only
/// from `None`/`Running`. Timeout and watchdog are measured from the
/// deltas handed to `tick`.
#[derive(Debug, Clone)]
pub struct RequestState {
    kind: RequestKind,
    url: String,
    status: RequestStatus,
    progress: f32,
    downloaded_bytes: u64,
    http_code: u16,
    error: String,
    timeout: Option<Duration>,
    watchdog: Option<Duration>,
    elapsed: Duration,
    idle: Duration,
    last_bytes: Option<u64>,
}

impl RequestState {
    pub fn new(
        kind: RequestKind,
        url: impl Into<String>,
        timeout: Option<Duration>,
        watchdog: Option<Duration>,
    ) -> Self {
        Self {
            kind,
            url: url.into(),
            status: RequestStatus::None,
            progress: 0.0,
            downloaded_bytes: 0,
            http_code: 0,
            error: String::new(),
            timeout,
            watchdog,
            elapsed: Duration::ZERO,
            idle: Duration::ZERO,
            last_bytes: None,
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn http_code(&self) -> u16 {
        self.http_code
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn is_running(&self) -> bool {
        self.status == RequestStatus::Running
    }

    /// Move from `None` to `Running`; returns false otherwise
    pub fn begin(&mut self) -> bool {
        if self.status == RequestStatus::None {
            self.status = RequestStatus::Running;
            true
        } else {
            false
        }
    }

    /// Record transfer progress for this request
    pub fn set_transfer(&mut self, downloaded_bytes: u64, total_bytes: Option<u64>) {
        self.downloaded_bytes = downloaded_bytes;
        self.progress = match total_bytes {
            Some(0) => 1.0,
            Some(total) => (downloaded_bytes as f64 / total as f64).clamp(0.0, 1.0) as f32,
            None => self.progress,
        };
    }

    /// Advance the timeout and watchdog clocks
    ///
    /// Aborts the request and returns the cause when a limit is exceeded.
    pub fn tick(&mut self, delta: Duration) -> Option<DownloadError> {
        if !self.is_running() {
            return None;
        }
        self.elapsed += delta;

        if let Some(timeout) = self.timeout {
            if self.elapsed > timeout {
                let cause = DownloadError::Timeout {
                    seconds: timeout.as_secs(),
                };
                self.fail(self.http_code, &cause);
                return Some(cause);
            }
        }

        if let Some(watchdog) = self.watchdog {
            if self.last_bytes != Some(self.downloaded_bytes) {
                self.last_bytes = Some(self.downloaded_bytes);
                self.idle = Duration::ZERO;
            } else {
                self.idle += delta;
                if self.idle > watchdog {
                    let cause = DownloadError::Watchdog {
                        seconds: watchdog.as_secs(),
                    };
                    self.status = RequestStatus::Aborted;
                    self.error = self.format_error(&cause);
                    return Some(cause);
                }
            }
        }
        None
    }

    /// Finish successfully
    pub fn succeed(&mut self, http_code: u16) {
        if self.is_running() {
            self.status = RequestStatus::Succeed;
            self.http_code = http_code;
            self.progress = 1.0;
        }
    }

    /// Finish with an attributable error
    pub fn fail(&mut self, http_code: u16, reason: &dyn fmt::Display) {
        if self.is_running() {
            self.status = RequestStatus::Failed;
            self.http_code = http_code;
            self.error = self.format_error(reason);
        }
    }

    /// Abort from `None` or `Running`; returns true when the status changed
    pub fn abort(&mut self) -> bool {
        if matches!(self.status, RequestStatus::None | RequestStatus::Running) {
            self.status = RequestStatus::Aborted;
            self.error = self.format_error(&DownloadError::Aborted);
            true
        } else {
            false
        }
    }

    fn format_error(&self, reason: &dyn fmt::Display) -> String {
        DownloadError::Request {
            kind: self.kind.to_string(),
            url: self.url.clone(),
            reason: reason.to_string(),
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = ResponseHeaders::new();
        headers.insert("ETag", "\"abc\"");
        headers.insert("content-length", "1024");
        headers.insert("Content-Type", "application/octet-stream");

        assert_eq!(headers.get("etag"), Some("\"abc\""));
        assert_eq!(headers.etag(), Some("\"abc\""));
        assert_eq!(headers.content_length(), 1024);
        assert_eq!(headers.content_type(), Some("application/octet-stream"));
        assert_eq!(headers.last_modified(), None);
    }

    #[test]
    fn test_content_length_defaults() {
        let mut headers = ResponseHeaders::new();
        assert_eq!(headers.content_length(), -1);
        headers.insert("Content-Length", "not-a-number");
        assert_eq!(headers.content_length(), -1);
    }

    #[test]
    fn test_request_lifecycle_guards() {
        let mut state = RequestState::new(RequestKind::File, "https://a/b", None, None);

        // Polling-related transitions are ignored before send
        state.succeed(200);
        assert_eq!(state.status(), RequestStatus::None);

        assert!(state.begin());
        assert!(!state.begin());
        state.succeed(200);
        assert_eq!(state.status(), RequestStatus::Succeed);

        // Abort is ignored once terminal
        assert!(!state.abort());
        assert_eq!(state.status(), RequestStatus::Succeed);
    }

    #[test]
    fn test_failure_message_format() {
        let mut state = RequestState::new(RequestKind::Bytes, "https://a/b", None, None);
        state.begin();
        state.fail(404, &"HTTP 404");
        assert_eq!(state.error(), "[BytesRequest] URL: https://a/b - error: HTTP 404");
        assert_eq!(state.http_code(), 404);
    }

    #[test]
    fn test_timeout() {
        let mut state = RequestState::new(
            RequestKind::Text,
            "https://a/b",
            Some(Duration::from_secs(2)),
            None,
        );
        state.begin();
        assert!(state.tick(Duration::from_secs(1)).is_none());
        assert!(matches!(
            state.tick(Duration::from_secs(2)),
            Some(DownloadError::Timeout { seconds: 2 })
        ));
        assert_eq!(state.status(), RequestStatus::Failed);
    }

    #[test]
    fn test_watchdog_aborts_stalled_transfer() {
        let mut state = RequestState::new(
            RequestKind::File,
            "https://a/b",
            None,
            Some(Duration::from_secs(3)),
        );
        state.begin();
        state.set_transfer(10, Some(100));
        assert!(state.tick(Duration::from_secs(2)).is_none());

        // New bytes reset the idle clock
        state.set_transfer(20, Some(100));
        assert!(state.tick(Duration::from_secs(2)).is_none());
        assert!(state.tick(Duration::from_secs(2)).is_none());
        assert!(state.tick(Duration::from_secs(2)).is_some());
        assert_eq!(state.status(), RequestStatus::Aborted);
    }
}
