//! Host-provided collaborators for manifest bytes and file imports
//!
//! Manifest bytes pass through [`ManifestServices`] on the way to and from
//! storage, so hosts can compress or encrypt them without the engine
//! knowing the algorithm. Local files enter the cache through
//! [`CopyFileServices`].

use std::io;
use std::path::Path;

use tracing::debug;

/// Transforms manifest bytes for storage and back
pub trait ManifestServices {
    /// Bytes written by the builder, before upload
    fn process_manifest(&self, data: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Bytes read from storage, before parsing
    fn restore_manifest(&self, data: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// Identity transform
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainManifestServices;

impl ManifestServices for PlainManifestServices {
    fn process_manifest(&self, data: Vec<u8>) -> Result<Vec<u8>, String> {
        Ok(data)
    }

    fn restore_manifest(&self, data: Vec<u8>) -> Result<Vec<u8>, String> {
        Ok(data)
    }
}

/// Copies local files into the cache
pub trait CopyFileServices {
    fn copy_file(&self, source: &Path, destination: &Path) -> io::Result<u64>;
}

/// Plain file-system copy that creates the destination directory
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCopyFileServices;

impl CopyFileServices for DefaultCopyFileServices {
    fn copy_file(&self, source: &Path, destination: &Path) -> io::Result<u64> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Copying {} to {}", source.display(), destination.display());
        std::fs::copy(source, destination)
    }
}

/// Convert a `file://` URL to a local path, if it is one
pub fn local_file_path(url: &str) -> Option<std::path::PathBuf> {
    let parsed = url::Url::parse(url).ok()?;
    if parsed.scheme() == "file" {
        parsed.to_file_path().ok()
    } else {
        None
    }
}

/// Join a base URL and a file name with exactly one slash
pub fn join_url(base: &str, file_name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file_name.trim_start_matches('/'))
}

/// Convert a local path to a `file://` URL
pub fn file_url(path: &Path) -> Option<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    url::Url::from_file_path(absolute).ok().map(String::from)
}
