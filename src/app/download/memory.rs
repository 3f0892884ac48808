//! Offline backend serving scripted responses
//!
//! [`MemoryBackend`] answers requests from an in-memory table of URL to
//! payload. Unknown URLs fail with HTTP 404, scripted URLs can fail with a
//! chosen code, and every created request URL is recorded in order. Hosts
//! use it for offline runs; the test suites use it to observe retries.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use tracing::debug;

use super::backend::DownloadBackend;
use super::config::{BundleRequestArgs, DataRequestArgs, FileRequestArgs};
use super::request::DownloadRequest;
use super::types::{RequestKind, RequestState, ResponseHeaders};
use crate::errors::DownloadError;

#[derive(Debug, Clone)]
enum ScriptedResponse {
    Payload(Vec<u8>),
    Failure { http_code: u16, reason: String },
}

#[derive(Debug, Default)]
struct MemoryInner {
    files: HashMap<String, Vec<u8>>,
    failures: HashMap<String, (u16, String)>,
    history: Vec<(RequestKind, String)>,
    latency_polls: u32,
    update_count: u64,
}

/// In-memory download backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RefCell<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of polls each request stays in flight before completing
    pub fn with_latency(self, polls: u32) -> Self {
        self.inner.borrow_mut().latency_polls = polls;
        self
    }

    /// Serve `data` at `url`
    pub fn insert(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) {
        let url = url.into();
        let mut inner = self.inner.borrow_mut();
        inner.failures.remove(&url);
        inner.files.insert(url, data.into());
    }

    /// Fail every request to `url` with the given code and reason
    pub fn fail_url(&self, url: impl Into<String>, http_code: u16, reason: impl Into<String>) {
        self.inner
            .borrow_mut()
            .failures
            .insert(url.into(), (http_code, reason.into()));
    }

    /// URLs of every created request, in creation order
    pub fn requested_urls(&self) -> Vec<String> {
        self.inner
            .borrow()
            .history
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }

    /// Number of created requests of one kind
    pub fn request_count(&self, kind: RequestKind) -> usize {
        self.inner
            .borrow()
            .history
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Number of driver updates received
    pub fn update_count(&self) -> u64 {
        self.inner.borrow().update_count
    }

    fn script(&self, kind: RequestKind, url: &str) -> (ScriptedResponse, u32) {
        let mut inner = self.inner.borrow_mut();
        inner.history.push((kind, url.to_string()));
        debug!("Memory backend created {} for {}", kind, url);

        let response = if let Some((http_code, reason)) = inner.failures.get(url) {
            ScriptedResponse::Failure {
                http_code: *http_code,
                reason: reason.clone(),
            }
        } else if let Some(data) = inner.files.get(url) {
            ScriptedResponse::Payload(data.clone())
        } else {
            ScriptedResponse::Failure {
                http_code: 404,
                reason: DownloadError::ServerError { status: 404 }.to_string(),
            }
        };
        (response, inner.latency_polls)
    }

    fn create(
        &self,
        kind: RequestKind,
        url: String,
        timeout: Option<Duration>,
        watchdog: Option<Duration>,
        target: MemoryTarget,
    ) -> Box<dyn DownloadRequest> {
        let (response, latency) = self.script(kind, &url);
        Box::new(MemoryRequest {
            state: RequestState::new(kind, url, timeout, watchdog),
            response,
            polls_left: latency,
            target,
            data: None,
            headers: None,
        })
    }
}

impl DownloadBackend for MemoryBackend {
    fn name(&self) -> &str {
        "MemoryBackend"
    }

    fn update(&self) {
        self.inner.borrow_mut().update_count += 1;
    }

    fn create_head_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest> {
        self.create(
            RequestKind::Head,
            args.url,
            args.timeout,
            args.watchdog,
            MemoryTarget::Head,
        )
    }

    fn create_file_request(&self, args: FileRequestArgs) -> Box<dyn DownloadRequest> {
        let url = args.url.clone();
        let (timeout, watchdog) = (args.timeout, args.watchdog);
        self.create(
            RequestKind::File,
            url,
            timeout,
            watchdog,
            MemoryTarget::File(args),
        )
    }

    fn create_bytes_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest> {
        self.create(
            RequestKind::Bytes,
            args.url,
            args.timeout,
            args.watchdog,
            MemoryTarget::Memory { crc: None },
        )
    }

    fn create_text_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest> {
        self.create(
            RequestKind::Text,
            args.url,
            args.timeout,
            args.watchdog,
            MemoryTarget::Memory { crc: None },
        )
    }

    fn create_bundle_request(&self, args: BundleRequestArgs) -> Box<dyn DownloadRequest> {
        self.create(
            RequestKind::Bundle,
            args.url,
            args.timeout,
            args.watchdog,
            MemoryTarget::Memory { crc: args.file_crc },
        )
    }
}

#[derive(Debug)]
enum MemoryTarget {
    Head,
    File(FileRequestArgs),
    Memory { crc: Option<u32> },
}

#[derive(Debug)]
struct MemoryRequest {
    state: RequestState,
    response: ScriptedResponse,
    polls_left: u32,
    target: MemoryTarget,
    data: Option<Vec<u8>>,
    headers: Option<ResponseHeaders>,
}

impl MemoryRequest {
    fn complete(&mut self) {
        let payload = match &self.response {
            ScriptedResponse::Failure { http_code, reason } => {
                let (code, reason) = (*http_code, reason.clone());
                self.state.fail(code, &reason);
                return;
            }
            ScriptedResponse::Payload(payload) => payload.clone(),
        };

        match &self.target {
            MemoryTarget::Head => {
                let mut headers = ResponseHeaders::new();
                headers.insert("Content-Length", payload.len().to_string());
                headers.insert("Content-Type", "application/octet-stream");
                headers.insert("ETag", format!("\"{:08x}\"", crc32fast::hash(&payload)));
                self.headers = Some(headers);
                self.state.succeed(200);
            }
            MemoryTarget::File(args) => {
                let resume = args.resume_from_bytes.min(payload.len() as u64) as usize;
                let body = &payload[resume..];
                let code = if resume > 0 { 206 } else { 200 };
                match write_file(args, body) {
                    Ok(()) => {
                        self.state.set_transfer(body.len() as u64, Some(body.len() as u64));
                        self.state.succeed(code);
                    }
                    Err(e) => self.state.fail(code, &e),
                }
            }
            MemoryTarget::Memory { crc } => {
                if let Some(expected) = crc {
                    let actual = crc32fast::hash(&payload);
                    if actual != *expected {
                        let reason = format!("CRC mismatch {:08x} != {:08x}", actual, expected);
                        self.state.fail(200, &reason);
                        return;
                    }
                }
                self.state
                    .set_transfer(payload.len() as u64, Some(payload.len() as u64));
                self.data = Some(payload);
                self.state.succeed(200);
            }
        }
    }
}

fn write_file(args: &FileRequestArgs, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = args.save_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(args.append_to_file)
        .truncate(!args.append_to_file)
        .open(&args.save_path)?;
    file.write_all(body)?;
    file.flush()
}

impl DownloadRequest for MemoryRequest {
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
        if self.polls_left > 0 {
            self.polls_left -= 1;
            self.state.tick(delta);
            return;
        }
        self.complete();
    }

    fn abort_request(&mut self) {
        if self.state.abort() {
            if let MemoryTarget::File(args) = &self.target {
                if args.remove_file_on_abort && args.save_path.exists() {
                    let _ = std::fs::remove_file(&args.save_path);
                }
            }
        }
    }

    fn response_headers(&self) -> Option<&ResponseHeaders> {
        self.headers.as_ref()
    }

    fn take_data(&mut self) -> Option<Vec<u8>> {
        self.data.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::download::RequestStatus;
    use tempfile::TempDir;

    fn drive(request: &mut Box<dyn DownloadRequest>) {
        request.send_request();
        for _ in 0..10 {
            request.poll_request(Duration::from_millis(100));
            if request.is_done() {
                break;
            }
        }
    }

    #[test]
    fn test_bytes_request_serves_payload() {
        let backend = MemoryBackend::new().with_latency(2);
        backend.insert("mem://a", b"hello".to_vec());

        let mut request = backend.create_bytes_request(DataRequestArgs::new("mem://a"));
        drive(&mut request);

        assert_eq!(request.status(), RequestStatus::Succeed);
        assert_eq!(request.downloaded_bytes(), 5);
        assert_eq!(request.take_text().as_deref(), Some("hello"));
        assert_eq!(backend.requested_urls(), vec!["mem://a".to_string()]);
    }

    #[test]
    fn test_unknown_url_fails_with_404() {
        let backend = MemoryBackend::new();
        let mut request = backend.create_text_request(DataRequestArgs::new("mem://missing"));
        drive(&mut request);

        assert_eq!(request.status(), RequestStatus::Failed);
        assert_eq!(request.http_code(), 404);
        assert_eq!(
            request.error(),
            "[TextRequest] URL: mem://missing - error: Server error: HTTP 404"
        );
    }

    #[test]
    fn test_file_request_resume_appends_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("part");
        std::fs::write(&path, b"0123").unwrap();

        let backend = MemoryBackend::new();
        backend.insert("mem://file", b"0123456789".to_vec());
        let args = FileRequestArgs::new("mem://file", &path).with_resume(4);
        let mut request = backend.create_file_request(args);
        drive(&mut request);

        assert_eq!(request.status(), RequestStatus::Succeed);
        assert_eq!(request.http_code(), 206);
        // Only the bytes of this request are counted
        assert_eq!(request.downloaded_bytes(), 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");
    }

    #[test]
    fn test_bundle_request_checks_crc() {
        let backend = MemoryBackend::new();
        backend.insert("mem://bundle", b"payload".to_vec());

        let good = BundleRequestArgs::new("mem://bundle").with_crc(crc32fast::hash(b"payload"));
        let mut request = backend.create_bundle_request(good);
        drive(&mut request);
        assert_eq!(request.status(), RequestStatus::Succeed);

        let bad = BundleRequestArgs::new("mem://bundle").with_crc(1);
        let mut request = backend.create_bundle_request(bad);
        drive(&mut request);
        assert_eq!(request.status(), RequestStatus::Failed);
    }

    #[test]
    fn test_head_request_headers() {
        let backend = MemoryBackend::new();
        backend.insert("mem://a", vec![0u8; 42]);
        let mut request = backend.create_head_request(DataRequestArgs::new("mem://a"));
        drive(&mut request);

        assert_eq!(request.response_header("content-length").as_deref(), Some("42"));
        let headers = request.response_headers().unwrap();
        assert_eq!(headers.content_length(), 42);
        assert!(headers.etag().is_some());
    }
}
