//! Command-line argument parsing for Bundle Fetcher
//!
//! This module defines the CLI structure using clap derive macros:
//! building a package from a directory, fetching its bundles into the disk
//! cache, probing remote files and managing the cache.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Bundle Fetcher - download and cache content-addressed asset bundles
#[derive(Parser, Debug)]
#[command(
    name = "bundle-fetcher",
    version,
    about = "Download, cache and verify content-addressed asset bundles",
    long_about = "Builds package manifests from plain directories and fetches their bundles into a verified disk cache.
Downloads are deduplicated, bounded in concurrency, resumed when large and retried across a main and a fallback server."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory path
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Package name (overrides the configuration file)
    #[arg(short, long, global = true)]
    pub package: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a package manifest from a directory and publish it
    Build(BuildArgs),

    /// Download the bundles of a published package into the cache
    Fetch(FetchArgs),

    /// Show the response metadata of a remote file
    Head(HeadArgs),

    /// Cache management and verification
    Cache(CacheArgs),
}

/// Arguments for the build command
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Directory whose files become bundles
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Directory the published package is written to
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Package version written to the version file
    #[arg(long = "package-version", value_name = "VERSION")]
    pub version: String,

    /// Tag rules as PREFIX=TAG, e.g. "ui/=ui"
    #[arg(short, long = "tag", value_name = "PREFIX=TAG")]
    pub tags: Vec<String>,
}

/// Arguments for the fetch command
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Base URL of the published package
    #[arg(short, long)]
    pub url: Option<String>,

    /// Base URL used on alternate attempts (defaults to the main URL)
    #[arg(long)]
    pub fallback_url: Option<String>,

    /// Package version to fetch (latest when omitted)
    #[arg(long = "package-version", value_name = "VERSION")]
    pub version: Option<String>,

    /// Only fetch bundles carrying one of these tags
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Extra attempts after a failed download
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Dry run - show what would be downloaded without downloading
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the head command
#[derive(Args, Debug, Clone)]
pub struct HeadArgs {
    /// URL to query
    #[arg(value_name = "URL")]
    pub url: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout_secs: u64,
}

/// Arguments for cache management
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache management actions
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache statistics and information
    Info,

    /// Verify every cached bundle by size and CRC
    Verify,

    /// Remove cached files
    Clear {
        /// Clear mode, e.g. ClearAllBundleFiles or ClearUnusedBundleFiles
        #[arg(short, long, default_value = "ClearAllBundleFiles")]
        mode: String,

        /// Tags for ClearBundleFilesByTags
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Active package version for modes that need a manifest
        #[arg(long = "package-version", value_name = "VERSION")]
        version: Option<String>,

        /// Base URL the manifest is requested from when not cached
        #[arg(short, long)]
        url: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

impl BuildArgs {
    /// Parse the PREFIX=TAG rules
    pub fn tag_rules(&self) -> Result<Vec<(String, String)>, String> {
        self.tags
            .iter()
            .map(|rule| match rule.split_once('=') {
                Some((prefix, tag)) if !tag.is_empty() => Ok((prefix.to_string(), tag.to_string())),
                _ => Err(format!("Invalid tag rule '{}', expected PREFIX=TAG", rule)),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.version.trim().is_empty() {
            return Err("Package version must not be empty".to_string());
        }
        if self.source == self.output {
            return Err("Output directory must differ from the source directory".to_string());
        }
        self.tag_rules().map(|_| ())
    }
}

impl FetchArgs {
    /// Main and fallback URL, with the configured URLs as defaults
    pub fn remote_urls(&self, configured_main: &str, configured_fallback: &str) -> Option<(String, String)> {
        let main = self
            .url
            .clone()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| configured_main.to_string());
        if main.is_empty() {
            return None;
        }
        let fallback = self
            .fallback_url
            .clone()
            .or_else(|| self.url.as_ref().map(|_| main.clone()))
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| {
                if configured_fallback.is_empty() {
                    main.clone()
                } else {
                    configured_fallback.to_string()
                }
            });
        Some((main, fallback))
    }
}

impl HeadArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
