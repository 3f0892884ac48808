//! Integration tests for fetching published packages into the disk cache
//!
//! These tests publish a package from a directory, serve the published
//! files from the in-memory backend and bring a cache-backed package up
//! against it the way the host binary does.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use bundle_fetcher::app::download::{BundleDownloadOperation, RequestKind};
use bundle_fetcher::app::filesystem::BundleStore;
use bundle_fetcher::app::manifest::PlainManifestServices;
use bundle_fetcher::app::{
    CacheFileSystem, CacheFileSystemConfig, FileSystem, ManifestBuilder, MemoryBackend, Operation,
    OperationStatus, OperationSystem, PackageManifest, ResourceConfig, ResourcePackage,
};
use tempfile::TempDir;

const MAIN_URL: &str = "http://main.test/pkg";
const FALLBACK_URL: &str = "http://fallback.test/pkg";
const FRAME: Duration = Duration::from_millis(100);

/// Source files of the published package
const FILES: &[(&str, &[u8])] = &[
    ("ui/menu.prefab", b"menu prefab payload"),
    ("ui/icons.atlas", b"icon atlas payload"),
    ("music/theme.ogg", b"theme music payload"),
];

struct Published {
    _source: TempDir,
    output: TempDir,
    manifest: PackageManifest,
}

fn publish() -> Published {
    let source = TempDir::new().unwrap();
    for (name, data) in FILES {
        let path = source.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }
    let output = TempDir::new().unwrap();
    let builder = ManifestBuilder::new("DefaultPackage", "v1").with_tag("ui/", "ui");
    let manifest = builder.build(source.path()).unwrap();
    builder
        .publish(&manifest, source.path(), output.path(), &PlainManifestServices)
        .unwrap();
    Published {
        _source: source,
        output,
        manifest,
    }
}

/// Serve every published file under `base_url`
fn serve(backend: &MemoryBackend, published: &Path, base_url: &str) {
    for entry in std::fs::read_dir(published).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        backend.insert(format!("{}/{}", base_url, name), std::fs::read(&path).unwrap());
    }
}

struct Client {
    operations: Rc<OperationSystem>,
    file_system: Rc<CacheFileSystem>,
    package: ResourcePackage,
}

fn client(cache_root: &Path, backend: &Rc<MemoryBackend>, failed_try_again: u32) -> Client {
    let operations = Rc::new(OperationSystem::default());
    let config = CacheFileSystemConfig::new("DefaultPackage", cache_root.to_path_buf())
        .with_remote(MAIN_URL, FALLBACK_URL)
        .with_failed_try_again(failed_try_again);
    let file_system =
        Rc::new(CacheFileSystem::new(config, backend.clone(), operations.clone()).unwrap());
    let package =
        ResourcePackage::new(file_system.clone(), operations.clone(), ResourceConfig::default())
            .unwrap();
    let client = Client {
        operations,
        file_system,
        package,
    };
    let initialize = client.package.initialize();
    assert_eq!(run(&client.operations, &initialize, 10), OperationStatus::Succeed);
    client
}

fn run<T: Operation + ?Sized>(
    operations: &OperationSystem,
    operation: &Rc<RefCell<T>>,
    max_frames: usize,
) -> OperationStatus {
    for _ in 0..max_frames {
        if operation.borrow().is_done() {
            break;
        }
        operations.update(FRAME);
    }
    let status = operation.borrow().status();
    status
}

/// Resolve the latest version and activate its manifest
fn bring_up(client: &Client) {
    let version = client.package.request_package_version(false, None);
    assert_eq!(run(&client.operations, &version, 10), OperationStatus::Succeed);
    assert_eq!(version.borrow().package_version(), "v1");

    let update = client.package.update_package_manifest("v1", None);
    assert_eq!(run(&client.operations, &update, 10), OperationStatus::Succeed);
}

fn start_downloads(client: &Client, tags: &[String]) -> Vec<Rc<RefCell<BundleDownloadOperation>>> {
    client
        .package
        .bundles_to_download(tags)
        .iter()
        .map(|bundle| {
            let options = client.file_system.download_options(bundle);
            let operation = client.file_system.clone().download_file(bundle, options);
            client.operations.start_operation(operation.clone());
            operation
        })
        .collect()
}

fn run_all(client: &Client, downloads: &[Rc<RefCell<BundleDownloadOperation>>], max_frames: usize) {
    for _ in 0..max_frames {
        if downloads.iter().all(|operation| operation.borrow().is_done()) {
            break;
        }
        client.operations.update(FRAME);
    }
}

#[test]
fn test_fetch_published_package() {
    let published = publish();
    let backend = Rc::new(MemoryBackend::new());
    serve(&backend, published.output.path(), MAIN_URL);
    let cache = TempDir::new().unwrap();
    let client = client(cache.path(), &backend, 0);

    bring_up(&client);
    assert_eq!(client.package.bundles_to_download(&[]).len(), FILES.len());
    assert_eq!(client.package.bundles_to_download(&["ui".to_string()]).len(), 2);

    let downloads = start_downloads(&client, &[]);
    run_all(&client, &downloads, 50);
    for operation in &downloads {
        assert_eq!(operation.borrow().status(), OperationStatus::Succeed);
    }

    assert_eq!(client.file_system.file_count(), FILES.len());
    assert!(client.package.bundles_to_download(&[]).is_empty());
    assert_eq!(backend.request_count(RequestKind::File), FILES.len());
    assert!(client.file_system.verify_all().is_successful());
    assert_eq!(
        client.file_system.stats().total_cache_size,
        published.manifest.total_size()
    );
}

#[test]
fn test_tagged_fetch_only_downloads_tagged_bundles() {
    let published = publish();
    let backend = Rc::new(MemoryBackend::new());
    serve(&backend, published.output.path(), MAIN_URL);
    let cache = TempDir::new().unwrap();
    let client = client(cache.path(), &backend, 0);
    bring_up(&client);

    let downloads = start_downloads(&client, &["ui".to_string()]);
    run_all(&client, &downloads, 50);

    assert_eq!(client.file_system.file_count(), 2);
    let remaining = client.package.bundles_to_download(&[]);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].bundle_name, "music/theme.ogg");
}

#[test]
fn test_duplicate_requests_share_one_download() {
    let published = publish();
    let backend = Rc::new(MemoryBackend::new().with_latency(3));
    serve(&backend, published.output.path(), MAIN_URL);
    let cache = TempDir::new().unwrap();
    let client = client(cache.path(), &backend, 0);

    let bundle = published.manifest.bundle_list[0].clone();
    let downloads: Vec<_> = (0..3)
        .map(|_| {
            let options = client.file_system.download_options(&bundle);
            let operation = client.file_system.clone().download_file(&bundle, options);
            client.operations.start_operation(operation.clone());
            operation
        })
        .collect();
    run_all(&client, &downloads, 50);

    for operation in &downloads {
        assert_eq!(operation.borrow().status(), OperationStatus::Succeed);
    }
    let bundle_url = format!("{}/{}", MAIN_URL, bundle.file_name());
    let attempts = backend
        .requested_urls()
        .iter()
        .filter(|url| **url == bundle_url)
        .count();
    assert_eq!(attempts, 1);
}

#[test]
fn test_retries_alternate_main_and_fallback() {
    let published = publish();
    let backend = Rc::new(MemoryBackend::new());
    let cache = TempDir::new().unwrap();
    let client = client(cache.path(), &backend, 2);

    // Nothing is served: every attempt fails with 404
    let bundle = published.manifest.bundle_list[0].clone();
    let options = client.file_system.download_options(&bundle);
    let operation = client.file_system.clone().download_file(&bundle, options);
    client.operations.start_operation(operation.clone());
    assert_eq!(run(&client.operations, &operation, 100), OperationStatus::Failed);

    let main = format!("{}/{}", MAIN_URL, bundle.file_name());
    let fallback = format!("{}/{}", FALLBACK_URL, bundle.file_name());
    assert_eq!(backend.requested_urls(), vec![main.clone(), fallback, main.clone()]);
    assert_eq!(operation.borrow().request_count(), 3);

    // The reported error is the one of the last attempt
    let error = operation.borrow().error().to_string();
    assert!(error.starts_with(&format!("[FileRequest] URL: {}", main)), "{}", error);
    assert_eq!(client.file_system.file_count(), 0);
}

#[test]
fn test_fallback_server_recovers_failed_main() {
    let published = publish();
    let backend = Rc::new(MemoryBackend::new());
    serve(&backend, published.output.path(), FALLBACK_URL);
    let cache = TempDir::new().unwrap();
    let client = client(cache.path(), &backend, 1);

    let bundle = published.manifest.bundle_list[0].clone();
    backend.fail_url(format!("{}/{}", MAIN_URL, bundle.file_name()), 503, "service unavailable");
    let options = client.file_system.download_options(&bundle);
    let operation = client.file_system.clone().download_file(&bundle, options);
    client.operations.start_operation(operation.clone());

    assert_eq!(run(&client.operations, &operation, 100), OperationStatus::Succeed);
    assert_eq!(operation.borrow().request_count(), 2);
    assert!(client.file_system.exists(&bundle));
}

#[test]
fn test_second_session_reuses_cache_and_manifest() {
    let published = publish();
    let backend = Rc::new(MemoryBackend::new());
    serve(&backend, published.output.path(), MAIN_URL);
    let cache = TempDir::new().unwrap();

    {
        let first = client(cache.path(), &backend, 0);
        bring_up(&first);
        let downloads = start_downloads(&first, &[]);
        run_all(&first, &downloads, 50);
        first.package.destroy();
    }
    let requests_before = backend.requested_urls().len();

    let second = client(cache.path(), &backend, 0);
    assert_eq!(second.file_system.file_count(), FILES.len());

    // The cached manifest is used without a request
    let update = second.package.update_package_manifest("v1", None);
    assert_eq!(run(&second.operations, &update, 10), OperationStatus::Succeed);
    assert!(second.package.bundles_to_download(&[]).is_empty());
    assert_eq!(backend.requested_urls().len(), requests_before);
}
