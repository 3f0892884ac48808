//! Pluggable download transport
//!
//! The engine never talks to a network directly: it asks a backend for
//! requests and polls them. Hosts plug in their own transport by
//! implementing [`DownloadBackend`].

use super::config::{BundleRequestArgs, DataRequestArgs, FileRequestArgs, SimulateRequestArgs};
use super::request::DownloadRequest;
use super::virtual_file::VirtualFileRequest;

/// Factory for pollable download requests
pub trait DownloadBackend {
    /// Backend name used in diagnostics
    fn name(&self) -> &str;

    /// Per-frame driver hook, called by the download scheduler
    fn update(&self) {}

    /// Request response metadata without the body
    fn create_head_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest>;

    /// Stream the body into a file
    fn create_file_request(&self, args: FileRequestArgs) -> Box<dyn DownloadRequest>;

    /// Collect the body in memory
    fn create_bytes_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest>;

    /// Collect the body in memory as text
    fn create_text_request(&self, args: DataRequestArgs) -> Box<dyn DownloadRequest>;

    /// Collect a bundle payload in memory, verifying its CRC when given
    fn create_bundle_request(&self, args: BundleRequestArgs) -> Box<dyn DownloadRequest>;

    /// Fabricate a transfer at a fixed speed without I/O
    fn create_simulate_request(&self, args: SimulateRequestArgs) -> Box<dyn DownloadRequest> {
        Box::new(VirtualFileRequest::new(args))
    }

    /// Release backend resources
    fn dispose(&self) {}
}
