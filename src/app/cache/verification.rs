//! Cached file verification and integrity reports
//!
//! A cached bundle is only trusted when its data file matches the size and
//! CRC stored in its info file. Initialization checks at the configured
//! level; explicit verification always checks at `High`.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::hash::file_crc_and_size;

/// How thoroughly cached files are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileVerifyLevel {
    /// Trust every record
    None,
    /// Data and info files exist
    Low,
    /// Data file has the recorded size
    #[default]
    Middle,
    /// Data file has the recorded size and CRC
    High,
}

/// Outcome of checking one data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileVerifyResult {
    Succeed,
    CacheNotFound,
    InfoFileNotExisted,
    DataFileNotExisted,
    FileNotComplete,
    FileOverflow,
    FileCrcError,
    Exception,
}

impl FileVerifyResult {
    pub fn is_succeed(&self) -> bool {
        *self == FileVerifyResult::Succeed
    }
}

impl fmt::Display for FileVerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FileVerifyResult::Succeed => "Succeed",
            FileVerifyResult::CacheNotFound => "Cache not found",
            FileVerifyResult::InfoFileNotExisted => "Info file not existed",
            FileVerifyResult::DataFileNotExisted => "Data file not existed",
            FileVerifyResult::FileNotComplete => "File not complete",
            FileVerifyResult::FileOverflow => "File overflow",
            FileVerifyResult::FileCrcError => "File CRC error",
            FileVerifyResult::Exception => "Verification exception",
        };
        f.write_str(text)
    }
}

/// Check a data file against an expected size and CRC at `level`
pub fn verify_file(path: &Path, size: u64, crc: u32, level: FileVerifyLevel) -> FileVerifyResult {
    if level == FileVerifyLevel::None {
        return FileVerifyResult::Succeed;
    }
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return FileVerifyResult::DataFileNotExisted,
    };
    if level == FileVerifyLevel::Low {
        return FileVerifyResult::Succeed;
    }

    let length = metadata.len();
    if length < size {
        return FileVerifyResult::FileNotComplete;
    }
    if length > size {
        return FileVerifyResult::FileOverflow;
    }
    if level == FileVerifyLevel::Middle {
        return FileVerifyResult::Succeed;
    }

    match file_crc_and_size(path) {
        Ok((actual, _)) if actual == crc => FileVerifyResult::Succeed,
        Ok((actual, _)) => {
            debug!(
                "CRC mismatch for {}: expected {:08x}, got {:08x}",
                path.display(),
                crc,
                actual
            );
            FileVerifyResult::FileCrcError
        }
        Err(_) => FileVerifyResult::Exception,
    }
}

/// Cache verification report
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    /// Total records checked
    pub files_checked: usize,
    /// Records that passed verification
    pub files_verified: usize,
    /// Records that failed verification
    pub files_failed: usize,
    /// Total verification time
    pub verification_time: Duration,
    /// Failed records with details
    pub failed_files: Vec<VerificationFailure>,
}

/// Details about a verification failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFailure {
    /// Bundle GUID of the record
    pub bundle_guid: String,
    pub result: FileVerifyResult,
}

impl VerificationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get verification success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.files_checked == 0 {
            0.0
        } else {
            (self.files_verified as f64 / self.files_checked as f64) * 100.0
        }
    }

    /// Check if verification passed (no failures)
    pub fn is_successful(&self) -> bool {
        self.files_failed == 0
    }

    pub fn add_verified(&mut self) {
        self.files_checked += 1;
        self.files_verified += 1;
    }

    pub fn add_failed(&mut self, bundle_guid: impl Into<String>, result: FileVerifyResult) {
        self.files_checked += 1;
        self.files_failed += 1;
        self.failed_files.push(VerificationFailure {
            bundle_guid: bundle_guid.into(),
            result,
        });
    }

    pub fn set_verification_time(&mut self, duration: Duration) {
        self.verification_time = duration;
    }
}
