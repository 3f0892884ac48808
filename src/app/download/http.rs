//! HTTP download backend
//!
//! Transfers run as abortable tasks on a tokio runtime owned by the host;
//! the cooperative side only polls a shared progress record, so a tick never
//! blocks on the network. Requests share one reqwest client and one
//! governor rate limiter.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{abortable, AbortHandle};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::backend::DownloadBackend;
use super::config::{BundleRequestArgs, DataRequestArgs, FileRequestArgs};
use super::request::DownloadRequest;
use super::types::{RequestKind, RequestState, ResponseHeaders};
use crate::constants::download;
use crate::errors::{DownloadError, DownloadResult};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Configuration for the HTTP backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    pub user_agent: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Request starts per second across all requests
    pub rate_limit_rps: u32,
    /// Maximum idle connections kept per host
    pub pool_max_per_host: usize,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            user_agent: download::USER_AGENT.to_string(),
            connect_timeout: download::CONNECT_TIMEOUT,
            rate_limit_rps: download::DEFAULT_RATE_LIMIT_RPS,
            pool_max_per_host: 16,
        }
    }
}

impl HttpBackendConfig {
    /// Builds the HTTP client with the specified configuration
    pub fn build_http_client(&self) -> DownloadResult<Client> {
        Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.as_str())
            .tcp_nodelay(true)
            .pool_max_idle_per_host(self.pool_max_per_host)
            .build()
            .map_err(DownloadError::Http)
    }

    fn build_rate_limiter(&self) -> DirectRateLimiter {
        let rps = NonZeroU32::new(self.rate_limit_rps).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_second(rps))
    }
}

/// Download backend over reqwest
pub struct HttpBackend {
    client: Client,
    runtime: Handle,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl HttpBackend {
    /// Create a backend whose transfers run on `runtime`
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Http` if the client cannot be built
    pub fn new(config: &HttpBackendConfig, runtime: Handle) -> DownloadResult<Self> {
        Ok(Self {
            client: config.build_http_client()?,
            runtime,
            rate_limiter: Arc::new(config.build_rate_limiter()),
        })
    }

    fn create(
        &self,
        kind: RequestKind,
        url: String,
        timeout: Option<Duration>,
        watchdog: Option<Duration>,
        target: HttpTarget,
    ) -> Box<dyn DownloadRequest> {
        Box::new(HttpRequest {
            state: RequestState::new(kind, url, timeout, watchdog),
            target,
            client: self.client.clone(),
            runtime: self.runtime.clone(),
            rate_limiter: self.rate_limiter.clone(),
            shared: Arc::new(Mutex::new(Shared::default())),
            abort_handle: None,
            data: None,
            headers: None,
        })
    }
}

impl DownloadBackend for HttpBackend {
    fn name(&self) -> &str {
        "HttpBackend"
    }

    fn create_head_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest> {
        let target = HttpTarget::Head {
            headers: args.headers,
        };
        self.create(RequestKind::Head, args.url, args.timeout, args.watchdog, target)
    }

    fn create_file_request(&self, args: FileRequestArgs) -> Box<dyn DownloadRequest> {
        let target = HttpTarget::File {
            save_path: args.save_path,
            append_to_file: args.append_to_file,
            remove_file_on_abort: args.remove_file_on_abort,
            resume_from_bytes: args.resume_from_bytes,
            headers: args.headers,
        };
        self.create(RequestKind::File, args.url, args.timeout, args.watchdog, target)
    }

    fn create_bytes_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest> {
        let target = HttpTarget::Memory {
            crc: None,
            headers: args.headers,
        };
        self.create(RequestKind::Bytes, args.url, args.timeout, args.watchdog, target)
    }

    fn create_text_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest> {
        let target = HttpTarget::Memory {
            crc: None,
            headers: args.headers,
        };
        self.create(RequestKind::Text, args.url, args.timeout, args.watchdog, target)
    }

    fn create_bundle_request(&self, args: BundleRequestArgs) -> Box<dyn DownloadRequest> {
        let target = HttpTarget::Memory {
            crc: args.file_crc,
            headers: Default::default(),
        };
        self.create(RequestKind::Bundle, args.url, args.timeout, args.watchdog, target)
    }
}

#[derive(Debug, Clone)]
enum HttpTarget {
    Head {
        headers: std::collections::HashMap<String, String>,
    },
    File {
        save_path: PathBuf,
        append_to_file: bool,
        remove_file_on_abort: bool,
        resume_from_bytes: u64,
        headers: std::collections::HashMap<String, String>,
    },
    Memory {
        crc: Option<u32>,
        headers: std::collections::HashMap<String, String>,
    },
}

/// Failure recorded by a transfer task: HTTP code (0 when none) and reason
type TransferFailure = (u16, String);

#[derive(Debug, Default)]
struct Shared {
    downloaded: u64,
    total: Option<u64>,
    outcome: Option<Result<u16, TransferFailure>>,
    data: Option<Vec<u8>>,
    headers: Option<ResponseHeaders>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

struct HttpRequest {
    state: RequestState,
    target: HttpTarget,
    client: Client,
    runtime: Handle,
    rate_limiter: Arc<DirectRateLimiter>,
    shared: Arc<Mutex<Shared>>,
    abort_handle: Option<AbortHandle>,
    data: Option<Vec<u8>>,
    headers: Option<ResponseHeaders>,
}

impl HttpRequest {
    fn cancel_task(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
        if let HttpTarget::File {
            save_path,
            remove_file_on_abort: true,
            ..
        } = &self.target
        {
            if save_path.exists() {
                if let Err(e) = std::fs::remove_file(save_path) {
                    warn!("Failed to remove aborted download {}: {}", save_path.display(), e);
                }
            }
        }
    }
}

impl DownloadRequest for HttpRequest {
    fn state(&self) -> &RequestState {
        &self.state
    }

    fn send_request(&mut self) {
        if !self.state.begin() {
            return;
        }
        debug!("Sending {} for {}", self.state.kind(), self.state.url());

        let transfer = run_transfer(
            self.client.clone(),
            self.rate_limiter.clone(),
            self.state.url().to_string(),
            self.target.clone(),
            self.shared.clone(),
        );
        let (task, handle) = abortable(transfer);
        self.runtime.spawn(task);
        self.abort_handle = Some(handle);
    }

    fn poll_request(&mut self, delta: Duration) {
        if !self.state.is_running() {
            return;
        }

        let outcome = {
            let mut shared = lock(&self.shared);
            self.state.set_transfer(shared.downloaded, shared.total);
            let outcome = shared.outcome.take();
            if outcome.is_some() {
                self.data = shared.data.take();
                self.headers = shared.headers.take();
            }
            outcome
        };

        match outcome {
            Some(Ok(code)) => {
                self.abort_handle = None;
                self.state.succeed(code);
            }
            Some(Err((code, reason))) => {
                self.abort_handle = None;
                self.state.fail(code, &reason);
            }
            None => {
                if let Some(cause) = self.state.tick(delta) {
                    warn!("{} for {}", cause, self.state.url());
                    self.cancel_task();
                }
            }
        }
    }

    fn abort_request(&mut self) {
        if self.state.abort() {
            self.cancel_task();
        }
    }

    fn dispose(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
    }

    fn response_headers(&self) -> Option<&ResponseHeaders> {
        self.headers.as_ref()
    }

    fn take_data(&mut self) -> Option<Vec<u8>> {
        self.data.take()
    }
}

impl Drop for HttpRequest {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_transfer(
    client: Client,
    rate_limiter: Arc<DirectRateLimiter>,
    url: String,
    target: HttpTarget,
    shared: Arc<Mutex<Shared>>,
) {
    rate_limiter.until_ready().await;

    let result = transfer(&client, &url, &target, &shared).await;
    let mut shared = lock(&shared);
    shared.outcome = Some(result);
}

async fn transfer(
    client: &Client,
    url: &str,
    target: &HttpTarget,
    shared: &Mutex<Shared>,
) -> Result<u16, TransferFailure> {
    let parsed = url::Url::parse(url).map_err(|e| {
        let error = DownloadError::InvalidUrl {
            url: url.to_string(),
            error: e.to_string(),
        };
        (0, error.to_string())
    })?;
    let builder = match target {
        HttpTarget::Head { .. } => client.head(parsed),
        _ => client.get(parsed),
    };
    let extra_headers = match target {
        HttpTarget::Head { headers } | HttpTarget::Memory { headers, .. } => headers,
        HttpTarget::File { headers, .. } => headers,
    };
    let mut builder = extra_headers
        .iter()
        .fold(builder, |builder, (name, value)| builder.header(name, value));
    if let HttpTarget::File {
        resume_from_bytes, ..
    } = target
    {
        if *resume_from_bytes > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", resume_from_bytes));
        }
    }

    let mut response = builder
        .send()
        .await
        .map_err(|e| (0, DownloadError::Http(e).to_string()))?;
    let status = response.status();
    let code = status.as_u16();
    if !status.is_success() {
        return Err((code, DownloadError::ServerError { status: code }.to_string()));
    }

    lock(shared).total = response.content_length();

    match target {
        HttpTarget::Head { .. } => {
            let mut headers = ResponseHeaders::new();
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    headers.insert(name.as_str(), value);
                }
            }
            lock(shared).headers = Some(headers);
        }
        HttpTarget::File {
            save_path,
            append_to_file,
            ..
        } => {
            let append = *append_to_file && status == StatusCode::PARTIAL_CONTENT;
            let io_failure = |e: std::io::Error| (code, DownloadError::Io(e).to_string());
            if let Some(parent) = save_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_failure)?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(save_path)
                .await
                .map_err(io_failure)?;

            let mut downloaded = 0u64;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| (code, DownloadError::Http(e).to_string()))?
            {
                file.write_all(&chunk).await.map_err(io_failure)?;
                downloaded += chunk.len() as u64;
                lock(shared).downloaded = downloaded;
            }
            file.flush().await.map_err(io_failure)?;
        }
        HttpTarget::Memory { crc, .. } => {
            let mut data = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| (code, DownloadError::Http(e).to_string()))?
            {
                data.extend_from_slice(&chunk);
                lock(shared).downloaded = data.len() as u64;
            }
            if let Some(expected) = crc {
                let actual = crc32fast::hash(&data);
                if actual != *expected {
                    let reason = format!("CRC mismatch {:08x} != {:08x}", actual, expected);
                    return Err((code, reason));
                }
            }
            lock(shared).data = Some(data);
        }
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::download::RequestStatus;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve one canned HTTP response on a local port
    fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response);
            }
        });
        format!("http://{}/file", addr)
    }

    fn drive(request: &mut Box<dyn DownloadRequest>) {
        request.send_request();
        for _ in 0..500 {
            request.poll_request(Duration::from_millis(10));
            if request.is_done() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_config_default() {
        let config = HttpBackendConfig::default();
        assert_eq!(config.rate_limit_rps, download::DEFAULT_RATE_LIMIT_RPS);
        assert_eq!(config.user_agent, download::USER_AGENT);
        assert!(config.build_http_client().is_ok());
    }

    #[test]
    fn test_zero_rate_limit_falls_back_to_one() {
        let config = HttpBackendConfig {
            rate_limit_rps: 0,
            ..Default::default()
        };
        let limiter = config.build_rate_limiter();
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_bytes_request_over_http() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let backend = HttpBackend::new(&HttpBackendConfig::default(), runtime.handle().clone())
            .unwrap();
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello");

        let mut request = backend.create_bytes_request(DataRequestArgs::new(url));
        drive(&mut request);

        assert_eq!(request.status(), RequestStatus::Succeed);
        assert_eq!(request.http_code(), 200);
        assert_eq!(request.downloaded_bytes(), 5);
        assert_eq!(request.take_text().as_deref(), Some("hello"));
    }

    #[test]
    fn test_server_error_is_attributed() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let backend = HttpBackend::new(&HttpBackendConfig::default(), runtime.handle().clone())
            .unwrap();
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");

        let mut request = backend.create_text_request(DataRequestArgs::new(url.clone()));
        drive(&mut request);

        assert_eq!(request.status(), RequestStatus::Failed);
        assert_eq!(request.http_code(), 404);
        assert_eq!(
            request.error(),
            format!("[TextRequest] URL: {} - error: Server error: HTTP 404", url)
        );
    }

    #[test]
    fn test_malformed_url_fails_without_http_code() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let backend = HttpBackend::new(&HttpBackendConfig::default(), runtime.handle().clone())
            .unwrap();
        let mut request = backend.create_text_request(DataRequestArgs::new("not a url"));
        drive(&mut request);

        assert_eq!(request.status(), RequestStatus::Failed);
        assert_eq!(request.http_code(), 0);
        assert!(request.error().contains("Invalid URL: not a url"), "{}", request.error());
    }

    #[test]
    fn test_abort_before_send() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let backend = HttpBackend::new(&HttpBackendConfig::default(), runtime.handle().clone())
            .unwrap();
        let mut request = backend.create_bytes_request(DataRequestArgs::new("http://127.0.0.1:9/"));
        request.abort_request();
        request.send_request();
        request.poll_request(Duration::from_millis(10));
        assert_eq!(request.status(), RequestStatus::Aborted);
    }
}
