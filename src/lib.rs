//! Bundle Fetcher Library
//!
//! Fetches, caches and loads content-addressed asset bundles. Work runs as
//! cooperative operations advanced once per frame by the host, with a
//! pluggable download transport, a verified disk cache and a reference
//! counted resource manager on top.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
