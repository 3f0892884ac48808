//! Command-line interface components
//!
//! This module contains CLI-specific code for the Bundle Fetcher binary,
//! including argument parsing, the frame loop host and progress display.

pub mod args;
pub mod commands;
pub mod host;
pub mod progress;

pub use args::{BuildArgs, CacheAction, CacheArgs, Cli, Commands, FetchArgs, GlobalArgs, HeadArgs};
pub use commands::{handle_build, handle_cache, handle_fetch, handle_head};
pub use host::Host;
pub use progress::{FetchProgress, ProgressConfig, ProgressDisplay};
