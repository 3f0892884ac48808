//! Cache statistics and disk usage
//!
//! Counts come from the record table; the on-disk footprint (temp files
//! and manifests included) comes from a directory scan.

use std::path::{Path, PathBuf};

use super::manager::CacheStore;

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Package root directory
    pub package_root: PathBuf,
    /// Number of recorded bundles
    pub cached_files_count: usize,
    /// Recorded bundle bytes
    pub total_cache_size: u64,
    /// Bytes on disk under the package root
    pub disk_usage: u64,
    /// Transfers running
    pub active_downloads: usize,
    /// Transfers waiting for a slot
    pub pending_downloads: usize,
}

impl CacheStats {
    /// Collect statistics for `store`
    pub fn collect(store: &CacheStore, active_downloads: usize, pending_downloads: usize) -> Self {
        let package_root = store.paths().package_root().to_path_buf();
        let (_, disk_usage) = scan_directory(&package_root);
        Self {
            package_root,
            cached_files_count: store.file_count(),
            total_cache_size: store.total_size(),
            disk_usage,
            active_downloads,
            pending_downloads,
        }
    }

    /// Format cache size in human-readable format
    pub fn format_cache_size(&self) -> String {
        format_bytes(self.total_cache_size)
    }

    pub fn format_disk_usage(&self) -> String {
        format_bytes(self.disk_usage)
    }
}

/// Recursively count files and bytes under `dir`
pub fn scan_directory(dir: &Path) -> (usize, u64) {
    let mut file_count = 0;
    let mut total_size = 0u64;

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let (sub_count, sub_size) = scan_directory(&path);
                file_count += sub_count;
                total_size += sub_size;
            } else if let Ok(metadata) = entry.metadata() {
                file_count += 1;
                total_size += metadata.len();
            }
        }
    }

    (file_count, total_size)
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024_u64.pow(4)), "1.00 TB");
    }

    #[test]
    fn test_scan_directory_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let subdir = temp_dir.path().join("BundleFiles/0c");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(temp_dir.path().join("root.json"), b"root").unwrap();
        std::fs::write(subdir.join("__data"), b"payload").unwrap();

        assert_eq!(scan_directory(temp_dir.path()), (2, 11));
    }

    #[test]
    fn test_scan_missing_directory() {
        assert_eq!(scan_directory(Path::new("/definitely/not/here")), (0, 0));
    }
}
