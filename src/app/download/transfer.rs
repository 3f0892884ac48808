//! Reference-counted transfers and their sources
//!
//! A transfer is the shared operation that actually moves one bundle into
//! a file system. Every logical request against the same bundle takes a
//! reference on the same transfer instead of starting a new one; releasing
//! the last reference lets the owner abort and drop it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::app::manifest::PackageBundle;
use crate::app::operation::Operation;

/// Transfer shared between its owner and the operations waiting on it
pub type SharedTransfer = Rc<RefCell<dyn Transfer>>;

/// A reference-counted download-and-store operation
pub trait Transfer: Operation {
    /// URL this transfer reads from
    fn url(&self) -> &str;

    /// Take a reference
    fn reference(&mut self);

    /// Drop a reference
    fn release(&mut self);

    fn ref_count(&self) -> i32;

    /// Bytes received, including any resumed prefix
    fn downloaded_bytes(&self) -> u64;

    fn download_progress(&self) -> f32;
}

/// Where bundle transfers come from
///
/// Implemented by each file system that can fetch bundles.
pub trait TransferSource {
    /// Authoritative existence check, consulted before any request
    fn exists(&self, bundle: &PackageBundle) -> bool;

    /// Return the transfer for `bundle`, referenced once for the caller
    ///
    /// A transfer already in flight for the same bundle is returned again
    /// with one more reference.
    fn begin_transfer(&self, bundle: &PackageBundle, url: &str) -> SharedTransfer;
}

/// Reference counter embedded in transfer implementations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefCount(i32);

impl RefCount {
    pub fn reference(&mut self) {
        self.0 += 1;
    }

    pub fn release(&mut self) {
        self.0 -= 1;
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    /// True once every reference has been released
    pub fn is_released(&self) -> bool {
        self.0 <= 0
    }
}
