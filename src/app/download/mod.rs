//! Pluggable download transport and bundle retry policy
//!
//! Requests are created by a [`DownloadBackend`] and polled by their owner
//! once per tick. Nothing here blocks: the HTTP backend moves bytes on
//! background tasks and the cooperative side only observes shared state.
//!
//! # Module Organization
//!
//! - [`types`] - Request status, kinds, headers and shared lifecycle state
//! - [`config`] - Request arguments and retry options
//! - [`request`] / [`backend`] - The request and backend contracts
//! - [`http`] - reqwest backend
//! - [`memory`] - Scripted in-memory backend
//! - [`virtual_file`] - Simulated transfer at a fixed speed
//! - [`transfer`] - Reference-counted transfers and their sources
//! - [`retry`] - Bundle download with retry and URL fallback
//! - [`scheduler`] - Deduplicating, concurrency-bounded transfer owner

pub mod backend;
pub mod config;
pub mod http;
pub mod memory;
pub mod request;
pub mod retry;
pub mod scheduler;
pub mod transfer;
pub mod types;
pub mod virtual_file;

#[cfg(test)]
mod tests;

// Re-export main types for public API
pub use backend::DownloadBackend;
pub use config::{
    BundleRequestArgs, DataRequestArgs, DownloadFileOptions, FileRequestArgs, SimulateRequestArgs,
};
pub use http::{HttpBackend, HttpBackendConfig};
pub use memory::MemoryBackend;
pub use request::DownloadRequest;
pub use retry::BundleDownloadOperation;
pub use scheduler::{
    DownloadScheduler, DownloadSchedulerOperation, SchedulerLimits, SchedulerRegistration,
};
pub use transfer::{RefCount, SharedTransfer, Transfer, TransferSource};
pub use types::{RequestKind, RequestState, RequestStatus, ResponseHeaders};
pub use virtual_file::VirtualFileRequest;
