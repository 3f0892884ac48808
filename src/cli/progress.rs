//! Progress display for bundle fetches
//!
//! The host samples download state once per frame and hands it to
//! [`ProgressDisplay::update`]. On a terminal this drives an indicatif byte
//! bar; otherwise progress is reported as plain text at a fixed interval.
//!
//! # Examples
//!
//! ```rust,no_run
//! use bundle_fetcher::cli::{FetchProgress, ProgressConfig, ProgressDisplay};
//!
//! let mut display = ProgressDisplay::new(ProgressConfig::default());
//! display.start(3, 3 * 1024);
//! display.update(&FetchProgress {
//!     bundles_done: 1,
//!     bundles_failed: 0,
//!     bytes_done: 1024,
//! });
//! display.finish(&FetchProgress {
//!     bundles_done: 3,
//!     bundles_failed: 0,
//!     bytes_done: 3 * 1024,
//! });
//! ```

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Enable visual progress bars
    pub enable_progress_bars: bool,
    /// How often text mode prints a progress line
    pub text_report_interval: Duration,
    /// Show download rate in progress bar
    pub show_download_rate: bool,
    /// Show ETA in progress bar
    pub show_eta: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bars: true,
            text_report_interval: Duration::from_secs(10),
            show_download_rate: true,
            show_eta: true,
        }
    }
}

/// Snapshot of a fetch, sampled once per frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchProgress {
    /// Bundles finished successfully
    pub bundles_done: usize,
    /// Bundles whose download failed for good
    pub bundles_failed: usize,
    /// Bytes of finished bundles plus bytes received by running ones
    pub bytes_done: u64,
}

/// Byte progress bar with a text fallback
pub struct ProgressDisplay {
    config: ProgressConfig,
    bar: Option<ProgressBar>,
    total_bundles: usize,
    total_bytes: u64,
    started_at: Option<Instant>,
    last_report: Option<Instant>,
    is_terminal: bool,
}

impl ProgressDisplay {
    /// Create a new progress display with the given configuration
    pub fn new(config: ProgressConfig) -> Self {
        let is_terminal = atty::is(atty::Stream::Stderr);
        Self {
            config,
            bar: None,
            total_bundles: 0,
            total_bytes: 0,
            started_at: None,
            last_report: None,
            is_terminal,
        }
    }

    /// Check if a visual bar is in use
    pub fn is_visual(&self) -> bool {
        self.bar.is_some()
    }

    fn template(&self) -> &'static str {
        match (self.config.show_eta, self.config.show_download_rate) {
            (true, true) => {
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {bytes_per_sec} {msg}"
            }
            (true, false) => {
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}"
            }
            (false, true) => {
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {msg}"
            }
            (false, false) => "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        }
    }

    /// Start displaying a fetch of `total_bundles` bundles
    pub fn start(&mut self, total_bundles: usize, total_bytes: u64) {
        self.total_bundles = total_bundles;
        self.total_bytes = total_bytes;
        self.started_at = Some(Instant::now());
        self.last_report = Some(Instant::now());

        if self.config.enable_progress_bars && self.is_terminal {
            let bar = ProgressBar::new(total_bytes);
            match ProgressStyle::default_bar().template(self.template()) {
                Ok(style) => bar.set_style(style.progress_chars("##-")),
                Err(e) => debug!("Progress bar template error: {}", e),
            }
            bar.set_message(format!("0/{} bundles", total_bundles));
            self.bar = Some(bar);
        } else {
            eprintln!(
                "Starting download of {} bundles ({})...",
                total_bundles,
                crate::app::cache::format_bytes(total_bytes)
            );
        }
        debug!("Progress display started for {} bundles", total_bundles);
    }

    /// Refresh from a new snapshot
    pub fn update(&mut self, progress: &FetchProgress) {
        if let Some(bar) = &self.bar {
            bar.set_position(progress.bytes_done.min(self.total_bytes));
            bar.set_message(self.bundle_message(progress));
            return;
        }

        let due = self
            .last_report
            .is_none_or(|last| last.elapsed() >= self.config.text_report_interval);
        if due {
            eprintln!(
                "Progress: {} ({:.1}%)",
                self.bundle_message(progress),
                self.percent(progress)
            );
            self.last_report = Some(Instant::now());
        }
    }

    /// Close the bar and print the summary line
    pub fn finish(&mut self, progress: &FetchProgress) {
        let elapsed = self.started_at.map(|start| start.elapsed()).unwrap_or_default();
        if let Some(bar) = self.bar.take() {
            bar.set_position(progress.bytes_done.min(self.total_bytes));
            bar.finish_and_clear();
        }
        eprintln!(
            "Download completed: {} successful, {} failed in {:.1}s",
            progress.bundles_done,
            progress.bundles_failed,
            elapsed.as_secs_f64()
        );
    }

    fn bundle_message(&self, progress: &FetchProgress) -> String {
        if progress.bundles_failed > 0 {
            format!(
                "{}/{} bundles, {} failed",
                progress.bundles_done, self.total_bundles, progress.bundles_failed
            )
        } else {
            format!("{}/{} bundles", progress.bundles_done, self.total_bundles)
        }
    }

    /// Byte completion percentage
    pub fn percent(&self, progress: &FetchProgress) -> f64 {
        if self.total_bytes == 0 {
            return if progress.bundles_done + progress.bundles_failed >= self.total_bundles {
                100.0
            } else {
                0.0
            };
        }
        (progress.bytes_done.min(self.total_bytes) as f64 / self.total_bytes as f64) * 100.0
    }
}

impl Drop for ProgressDisplay {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}
