//! Integration tests for loading assets and bounded media caches
//!
//! Assets are loaded through a package whose cache file system downloads
//! missing bundles from the in-memory backend; loaders and providers are
//! collected once the last handle is gone.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bundle_fetcher::app::lru::{MediaKey, MediaUnloader};
use bundle_fetcher::app::manifest::PlainManifestServices;
use bundle_fetcher::app::{
    CacheFileSystem, CacheFileSystemConfig, FileSystem, LruCache, ManifestBuilder, MediaKind,
    MediaLruCache, MemoryBackend, Operation, OperationStatus, OperationSystem, ResourceConfig,
    ResourcePackage,
};
use tempfile::TempDir;

const BASE_URL: &str = "http://cdn.test/pkg";
const FRAME: Duration = Duration::from_millis(100);

struct Fixture {
    _dirs: Vec<TempDir>,
    operations: Rc<OperationSystem>,
    backend: Rc<MemoryBackend>,
    file_system: Rc<CacheFileSystem>,
    package: ResourcePackage,
}

impl Fixture {
    fn frames(&self, count: usize) {
        for _ in 0..count {
            self.operations.update(FRAME);
        }
    }

    fn run<T: Operation + ?Sized>(&self, operation: &Rc<RefCell<T>>) -> OperationStatus {
        for _ in 0..50 {
            if operation.borrow().is_done() {
                break;
            }
            self.operations.update(FRAME);
        }
        let status = operation.borrow().status();
        status
    }
}

/// Publish a small package, serve it and bring a cache-backed package up
fn fixture() -> Fixture {
    let source = TempDir::new().unwrap();
    std::fs::create_dir_all(source.path().join("ui")).unwrap();
    std::fs::write(source.path().join("ui/menu.prefab"), b"menu prefab").unwrap();
    std::fs::write(source.path().join("ui/logo.png"), b"logo image").unwrap();
    let output = TempDir::new().unwrap();
    let builder = ManifestBuilder::new("DefaultPackage", "v1");
    let manifest = builder.build(source.path()).unwrap();
    builder
        .publish(&manifest, source.path(), output.path(), &PlainManifestServices)
        .unwrap();

    let backend = Rc::new(MemoryBackend::new());
    for entry in std::fs::read_dir(output.path()).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        backend.insert(format!("{}/{}", BASE_URL, name), std::fs::read(&path).unwrap());
    }

    let cache = TempDir::new().unwrap();
    let operations = Rc::new(OperationSystem::default());
    let config = CacheFileSystemConfig::new("DefaultPackage", cache.path().to_path_buf())
        .with_remote(BASE_URL, BASE_URL)
        .with_failed_try_again(0);
    let file_system =
        Rc::new(CacheFileSystem::new(config, backend.clone(), operations.clone()).unwrap());
    let package =
        ResourcePackage::new(file_system.clone(), operations.clone(), ResourceConfig::default())
            .unwrap();

    let fixture = Fixture {
        _dirs: vec![source, output, cache],
        operations,
        backend,
        file_system,
        package,
    };
    assert_eq!(fixture.run(&fixture.package.initialize()), OperationStatus::Succeed);
    let update = fixture.package.update_package_manifest("v1", None);
    assert_eq!(fixture.run(&update), OperationStatus::Succeed);
    fixture
}

#[test]
fn test_load_downloads_missing_bundle() {
    let fixture = fixture();
    assert_eq!(fixture.file_system.file_count(), 0);

    let handle = fixture.package.resources().load_asset("ui/menu.prefab", 0).unwrap();
    for _ in 0..50 {
        if handle.is_done() {
            break;
        }
        fixture.frames(1);
    }

    assert_eq!(handle.status(), OperationStatus::Succeed);
    assert_eq!(handle.asset().unwrap().bytes, b"menu prefab");
    assert_eq!(fixture.file_system.file_count(), 1);
    assert!(!fixture.backend.requested_urls().is_empty());
}

#[test]
fn test_loaders_collected_after_handles_dropped() {
    let fixture = fixture();
    let resources = fixture.package.resources();

    let first = resources.load_asset("ui/menu.prefab", 0).unwrap();
    let second = resources.load_asset("ui/menu.prefab", 0).unwrap();
    let logo = resources.load_raw_file("ui/logo.png", 0).unwrap();
    fixture.frames(20);
    assert!(first.is_done() && second.is_done() && logo.is_done());
    assert_eq!(resources.loader_count(), 2);

    // A live handle keeps its loader
    drop(first);
    let unload = resources.unload_unused_assets();
    assert_eq!(fixture.run(&unload), OperationStatus::Succeed);
    assert_eq!(resources.loader_count(), 2);

    drop(second);
    drop(logo);
    let unload = resources.unload_unused_assets();
    assert_eq!(fixture.run(&unload), OperationStatus::Succeed);
    assert_eq!(resources.loader_count(), 0);
    assert_eq!(resources.provider_count(), 0);
    assert!(!resources.has_any_loader());

    // Collected bundles stay in the disk cache
    assert_eq!(fixture.file_system.file_count(), 2);
}

#[test]
fn test_generic_lru_evicts_least_recently_used() {
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = evicted.clone();
    let cache = LruCache::<String, String>::new(2)
        .unwrap()
        .with_removal_handler(move |key: &String, _value: &String| {
            sink.lock().unwrap().push(key.clone());
        });

    cache.add("a".to_string(), "1".to_string());
    cache.add("b".to_string(), "2".to_string());
    assert_eq!(cache.get(&"a".to_string()).as_deref(), Some("1"));
    cache.add("c".to_string(), "3".to_string());

    assert_eq!(*evicted.lock().unwrap(), vec!["b".to_string()]);
    assert_eq!(cache.get_keys(), vec!["c".to_string(), "a".to_string()]);
    assert!(!cache.contains(&"b".to_string()));
}

#[test]
fn test_lru_rejects_zero_capacity() {
    let error = LruCache::<String, u32>::new(0).unwrap_err();
    assert_eq!(error.to_string(), "Capacity must be greater than zero.");
}

#[derive(Default)]
struct RecordingUnloader {
    unloaded: Mutex<Vec<String>>,
}

impl MediaUnloader for RecordingUnloader {
    fn force_unload(&self, asset_name: &str) {
        self.unloaded.lock().unwrap().push(asset_name.to_string());
    }
}

#[test]
fn test_media_cache_unloads_by_kind() {
    let audio = Arc::new(RecordingUnloader::default());
    let video = Arc::new(RecordingUnloader::default());
    let cache = MediaLruCache::new(2, audio.clone(), video.clone()).unwrap();

    cache.add(MediaKind::Audio, "a", "audio/a.ogg");
    cache.add(MediaKind::Video, "b", "video/b.mp4");
    assert!(cache.get(MediaKind::Audio, "a").is_some());
    cache.add(MediaKind::Audio, "c", "audio/c.ogg");

    assert_eq!(*video.unloaded.lock().unwrap(), vec!["video/b.mp4"]);
    assert!(audio.unloaded.lock().unwrap().is_empty());
    assert_eq!(
        cache.get_keys(),
        vec![
            MediaKey::new(MediaKind::Audio, "c"),
            MediaKey::new(MediaKind::Audio, "a"),
        ]
    );
}
