//! On-disk cache records
//!
//! Each cached bundle is a folder with a `__data` file and a 12-byte
//! `__info` file: the data file's CRC32 as a little-endian `u32` followed
//! by its size as a little-endian `i64`.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::error;

use super::verification::{verify_file, FileVerifyLevel, FileVerifyResult};
use crate::constants::cache::INFO_FILE_LEN;
use crate::errors::{CacheError, CacheResult};

/// Durable description of one cached bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFileElement {
    pub info_file_path: PathBuf,
    pub data_file_path: PathBuf,
    pub data_file_crc: u32,
    pub data_file_size: i64,
}

impl RecordFileElement {
    pub fn new(info_file_path: PathBuf, data_file_path: PathBuf, data_file_crc: u32, data_file_size: i64) -> Self {
        Self {
            info_file_path,
            data_file_path,
            data_file_crc,
            data_file_size,
        }
    }

    /// Load a record from an existing info file
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidInfoFile` when the info file is missing
    /// or not exactly 12 bytes
    pub fn load(info_file_path: PathBuf, data_file_path: PathBuf) -> CacheResult<Self> {
        let (crc, size) = read_info_file(&info_file_path)?;
        Ok(Self::new(info_file_path, data_file_path, crc, size))
    }

    /// Check the data file against the recorded CRC and size
    pub fn verify(&self, level: FileVerifyLevel) -> FileVerifyResult {
        if level != FileVerifyLevel::None && !self.info_file_path.exists() {
            return FileVerifyResult::InfoFileNotExisted;
        }
        let size = u64::try_from(self.data_file_size).unwrap_or(u64::MAX);
        verify_file(&self.data_file_path, size, self.data_file_crc, level)
    }

    /// Delete the record folder
    pub fn delete_folder(&self) -> bool {
        let Some(directory) = self.info_file_path.parent() else {
            return false;
        };
        if !directory.exists() {
            return false;
        }
        match std::fs::remove_dir_all(directory) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to delete cache file ! {}", e);
                false
            }
        }
    }
}

/// Write an info file for a data file
pub fn write_info_file(path: &Path, crc: u32, size: i64) -> io::Result<()> {
    let mut buffer = Vec::with_capacity(INFO_FILE_LEN);
    buffer.extend_from_slice(&crc.to_le_bytes());
    buffer.extend_from_slice(&size.to_le_bytes());

    let mut file = File::create(path)?;
    file.write_all(&buffer)?;
    file.flush()
}

/// Read the CRC and size stored in an info file
pub fn read_info_file(path: &Path) -> CacheResult<(u32, i64)> {
    let invalid = || CacheError::InvalidInfoFile {
        path: path.to_path_buf(),
    };
    let bytes = std::fs::read(path).map_err(|_| invalid())?;
    if bytes.len() != INFO_FILE_LEN {
        return Err(invalid());
    }

    let mut crc = [0u8; 4];
    crc.copy_from_slice(&bytes[..4]);
    let mut size = [0u8; 8];
    size.copy_from_slice(&bytes[4..]);
    Ok((u32::from_le_bytes(crc), i64::from_le_bytes(size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(dir: &Path, content: &[u8]) -> RecordFileElement {
        let folder = dir.join("0c/guid");
        std::fs::create_dir_all(&folder).unwrap();
        let data = folder.join("__data");
        let info = folder.join("__info");
        std::fs::write(&data, content).unwrap();
        write_info_file(&info, crc32fast::hash(content), content.len() as i64).unwrap();
        RecordFileElement::load(info, data).unwrap()
    }

    #[test]
    fn test_info_file_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("__info");
        write_info_file(&path, 0x0403_0201, 0x0c0b_0a09_0807_0605).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, (1u8..=12).collect::<Vec<_>>());
        assert_eq!(read_info_file(&path).unwrap(), (0x0403_0201, 0x0c0b_0a09_0807_0605));
    }

    #[test]
    fn test_truncated_info_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("__info");
        std::fs::write(&path, [1, 2, 3]).unwrap();
        assert!(matches!(
            read_info_file(&path),
            Err(CacheError::InvalidInfoFile { .. })
        ));
    }

    #[test]
    fn test_mutated_data_is_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let element = record(temp_dir.path(), b"original bytes");
        assert!(element.verify(FileVerifyLevel::High).is_succeed());

        // Same length, different content
        std::fs::write(&element.data_file_path, b"ORIGINAL BYTES").unwrap();
        assert_eq!(element.verify(FileVerifyLevel::High), FileVerifyResult::FileCrcError);
    }

    #[test]
    fn test_delete_folder() {
        let temp_dir = TempDir::new().unwrap();
        let element = record(temp_dir.path(), b"x");
        assert!(element.delete_folder());
        assert!(!element.data_file_path.exists());
        assert!(!element.delete_folder());
    }
}
