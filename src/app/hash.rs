//! Content hashes for bundle files
//!
//! [`Md5Hash`] stores a bundle's content hash as its raw 16 bytes and
//! serializes as a lowercase hex string. The hex form doubles as the bundle
//! GUID. CRC32 helpers sit alongside because every verification path needs
//! both.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::cache::HASH_BUFFER_SIZE;
use crate::errors::{ManifestError, ManifestResult};

/// MD5 content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5Hash([u8; 16]);

impl Md5Hash {
    /// Parse a 32-character hex string (case insensitive)
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::InvalidHash` for any other input
    pub fn from_hex(hex: &str) -> ManifestResult<Self> {
        let invalid = || ManifestError::InvalidHash {
            hash: hex.to_string(),
        };
        if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut bytes = [0u8; 16];
        for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(pair).map_err(|_| invalid())?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Md5Hash(bytes))
    }

    /// Lowercase 32-character hex form
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Md5Hash(bytes)
    }

    /// Hash an in-memory payload
    pub fn compute(data: &[u8]) -> Self {
        Md5Hash(md5::compute(data).0)
    }

    /// Hash a file without loading it whole
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut context = md5::Context::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            context.consume(&buffer[..read]);
        }
        Ok(Md5Hash(context.compute().0))
    }
}

/// CRC32 and length of a file, read in fixed-size chunks
pub fn file_crc_and_size(path: &Path) -> io::Result<(u32, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }
    Ok((hasher.finalize(), size))
}

impl fmt::Display for Md5Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Md5Hash {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Md5Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Md5Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_string = String::deserialize(deserializer)?;
        Self::from_hex(&hex_string).map_err(serde::de::Error::custom)
    }
}
