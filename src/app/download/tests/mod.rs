//! Unit tests for the bundle retry policy

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use super::*;
use crate::app::manifest::PackageBundle;
use crate::app::operation::{Operation, OperationCore, OperationStatus, TickContext};

/// Transfer whose outcome is decided when it starts
struct ScriptedTransfer {
    core: OperationCore,
    url: String,
    succeed: bool,
    refs: RefCount,
}

impl Operation for ScriptedTransfer {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn on_start(&mut self) {}

    fn on_update(&mut self, _ctx: &TickContext) {
        if self.succeed {
            self.core.succeed();
        } else {
            let message = format!("[FileRequest] URL: {} - error: HTTP 503", self.url);
            self.core.fail(message);
        }
    }
}

impl Transfer for ScriptedTransfer {
    fn url(&self) -> &str {
        &self.url
    }

    fn reference(&mut self) {
        self.refs.reference();
    }

    fn release(&mut self) {
        self.refs.release();
    }

    fn ref_count(&self) -> i32 {
        self.refs.get()
    }

    fn downloaded_bytes(&self) -> u64 {
        0
    }

    fn download_progress(&self) -> f32 {
        0.0
    }
}

#[derive(Default)]
struct ScriptedSource {
    present: bool,
    succeed_on: Option<usize>,
    urls: RefCell<Vec<String>>,
    transfers: RefCell<Vec<Rc<RefCell<ScriptedTransfer>>>>,
}

impl TransferSource for ScriptedSource {
    fn exists(&self, _bundle: &PackageBundle) -> bool {
        self.present
    }

    fn begin_transfer(&self, _bundle: &PackageBundle, url: &str) -> SharedTransfer {
        let attempt = self.urls.borrow().len() + 1;
        self.urls.borrow_mut().push(url.to_string());
        let transfer = Rc::new(RefCell::new(ScriptedTransfer {
            core: OperationCore::new("ScriptedTransfer"),
            url: url.to_string(),
            succeed: self.succeed_on == Some(attempt),
            refs: RefCount::default(),
        }));
        {
            let mut op = transfer.borrow_mut();
            op.reference();
            op.start();
            op.update(&TickContext::default());
        }
        self.transfers.borrow_mut().push(transfer.clone());
        transfer
    }
}

fn bundle() -> PackageBundle {
    PackageBundle::new("ui.bundle", "0123456789abcdef0123456789abcdef", 7, 128)
}

fn drive(op: &mut BundleDownloadOperation, frames: usize) {
    let ctx = TickContext::new(Duration::from_millis(600));
    op.start();
    for _ in 0..frames {
        op.update(&ctx);
        if op.is_done() {
            break;
        }
    }
}

#[test]
fn test_retry_alternates_urls_and_keeps_last_error() {
    let source = Rc::new(ScriptedSource::default());
    let options = DownloadFileOptions::new("u1", "u2").with_failed_try_again(2);
    let mut op = BundleDownloadOperation::new(source.clone(), bundle(), options);

    drive(&mut op, 50);

    assert_eq!(*source.urls.borrow(), vec!["u1", "u2", "u1"]);
    assert_eq!(op.status(), OperationStatus::Failed);
    assert_eq!(op.error(), "[FileRequest] URL: u1 - error: HTTP 503");
    assert_eq!(op.request_count(), 3);
}

#[test]
fn test_retry_stops_on_success() {
    let source = Rc::new(ScriptedSource {
        succeed_on: Some(2),
        ..Default::default()
    });
    let options = DownloadFileOptions::new("u1", "u2").with_failed_try_again(5);
    let mut op = BundleDownloadOperation::new(source.clone(), bundle(), options);

    drive(&mut op, 50);

    assert_eq!(*source.urls.borrow(), vec!["u1", "u2"]);
    assert_eq!(op.status(), OperationStatus::Succeed);
    assert_eq!(op.progress(), 1.0);
}

#[test]
fn test_retry_waits_before_next_attempt() {
    let source = Rc::new(ScriptedSource::default());
    let options = DownloadFileOptions::new("u1", "u2").with_failed_try_again(1);
    let mut op = BundleDownloadOperation::new(source.clone(), bundle(), options);
    op.start();

    op.update(&TickContext::new(Duration::from_millis(400)));
    assert_eq!(source.urls.borrow().len(), 1);
    op.update(&TickContext::new(Duration::from_millis(400)));
    op.update(&TickContext::new(Duration::from_millis(400)));
    assert_eq!(source.urls.borrow().len(), 1);

    // Timer passes one second on the third try-again frame
    op.update(&TickContext::new(Duration::from_millis(400)));
    assert_eq!(source.urls.borrow().len(), 2);
}

#[test]
fn test_existing_bundle_short_circuits() {
    let source = Rc::new(ScriptedSource {
        present: true,
        ..Default::default()
    });
    let options = DownloadFileOptions::new("u1", "u2");
    let mut op = BundleDownloadOperation::new(source.clone(), bundle(), options);

    drive(&mut op, 1);

    assert_eq!(op.status(), OperationStatus::Succeed);
    assert!(source.urls.borrow().is_empty());
}

#[test]
fn test_invalid_options_fail_without_request() {
    let source = Rc::new(ScriptedSource::default());
    let options = DownloadFileOptions::new("u1", "");
    let mut op = BundleDownloadOperation::new(source.clone(), bundle(), options);

    drive(&mut op, 5);

    assert_eq!(op.error(), "Download file options is invalid !");
    assert!(source.urls.borrow().is_empty());
}

#[test]
fn test_wait_mode_does_not_retry() {
    let source = Rc::new(ScriptedSource::default());
    let options = DownloadFileOptions::new("u1", "u2").with_failed_try_again(3);
    let mut op = BundleDownloadOperation::new(source.clone(), bundle(), options);

    let ctx = TickContext::new(Duration::ZERO).with_wait_poll_interval(Duration::ZERO);
    op.wait_for_async_complete(&ctx);

    assert_eq!(op.status(), OperationStatus::Failed);
    assert_eq!(*source.urls.borrow(), vec!["u1"]);
}

#[test]
fn test_abort_releases_transfer_reference() {
    let source = Rc::new(ScriptedSource::default());
    let options = DownloadFileOptions::new("u1", "u2").with_failed_try_again(3);
    let mut op = BundleDownloadOperation::new(source.clone(), bundle(), options);
    op.start();
    op.update(&TickContext::new(Duration::from_millis(10)));

    op.abort();

    assert_eq!(op.error(), "user abort");
    let transfers = source.transfers.borrow();
    assert_eq!(transfers[0].borrow().ref_count(), 0);
}
