//! Resource manager tests over an editor file system

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::app::download::MemoryBackend;
use crate::app::filesystem::editor::EDITOR_PACKAGE_VERSION;
use crate::app::filesystem::{EditorFileSystem, EditorFileSystemConfig, FileSystem};
use crate::app::manifest::{ActiveManifest, ManifestBuilder, PackageAsset, PackageManifest};
use crate::app::operation::{Operation, OperationStatus, OperationSystem};
use crate::errors::ResourceError;

struct Fixture {
    dir: TempDir,
    operations: Rc<OperationSystem>,
    manifest: ActiveManifest,
    manager: ResourceManager,
}

impl Fixture {
    fn tick(&self, frames: usize) {
        for _ in 0..frames {
            self.operations.update(Duration::from_millis(100));
        }
    }
}

/// hero.prefab depends on shared.tex; hero_alias.mat lives in the hero bundle
fn package_manifest(root: &std::path::Path) -> PackageManifest {
    let built = ManifestBuilder::new("DefaultPackage", EDITOR_PACKAGE_VERSION)
        .build(root)
        .unwrap();
    let id = |name: &str| {
        built
            .bundle_list
            .iter()
            .position(|bundle| bundle.bundle_name == name)
            .unwrap()
    };
    let (hero, shared) = (id("hero.prefab"), id("shared.tex"));

    let mut assets = built.asset_list.clone();
    for asset in assets.iter_mut().filter(|asset| asset.asset_path == "hero.prefab") {
        asset.depend_bundle_ids = vec![shared];
    }
    assets.push(PackageAsset {
        address: String::new(),
        asset_path: "hero_alias.mat".to_string(),
        asset_guid: "hero-alias".to_string(),
        asset_tags: Vec::new(),
        bundle_id: hero,
        depend_bundle_ids: Vec::new(),
    });
    PackageManifest::new("DefaultPackage", EDITOR_PACKAGE_VERSION, built.bundle_list.clone(), assets)
        .unwrap()
}

fn fixture_with(config: ResourceConfig, virtual_speed: Option<u64>) -> Fixture {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("sfx")).unwrap();
    std::fs::write(dir.path().join("hero.prefab"), b"hero").unwrap();
    std::fs::write(dir.path().join("shared.tex"), b"shared").unwrap();
    std::fs::write(dir.path().join("forest.scene"), b"forest").unwrap();
    std::fs::write(dir.path().join("sfx/hit.ogg"), b"hit").unwrap();

    let mut fs_config = EditorFileSystemConfig::new(dir.path());
    if let Some(speed) = virtual_speed {
        fs_config = fs_config.with_virtual_download(speed);
    }
    let operations = Rc::new(OperationSystem::default());
    let fs = Rc::new(EditorFileSystem::new(
        "DefaultPackage",
        fs_config,
        Rc::new(MemoryBackend::new()),
        operations.clone(),
    ));
    let init = fs.clone().initialize();
    operations.start_operation(init.clone());
    operations.update(Duration::from_millis(16));
    assert_eq!(init.borrow().status(), OperationStatus::Succeed);

    let manifest: ActiveManifest = Rc::new(RefCell::new(Some(Rc::new(package_manifest(dir.path())))));
    let manager = ResourceManager::new(
        "DefaultPackage",
        config,
        fs,
        manifest.clone(),
        operations.clone(),
    )
    .unwrap();
    Fixture {
        dir,
        operations,
        manifest,
        manager,
    }
}

fn fixture() -> Fixture {
    fixture_with(ResourceConfig::default(), None)
}

#[test]
fn test_same_asset_shares_provider_and_loaders() {
    let fixture = fixture();
    let first = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    let second = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    assert_eq!(fixture.manager.provider_count(), 1);
    assert_eq!(fixture.manager.loader_count(), 2);

    fixture.tick(3);
    assert_eq!(first.status(), OperationStatus::Succeed);
    assert_eq!(first.asset().unwrap().bytes, b"hero");
    assert_eq!(second.asset().unwrap(), first.asset().unwrap());
    assert_eq!(fixture.manager.loader_ref_count("hero.prefab"), Some(1));
    assert_eq!(fixture.manager.loader_state("hero.prefab"), Some(LoaderState::Loaded));

    let _raw = fixture.manager.load_raw_file("hero.prefab", 0).unwrap();
    assert_eq!(fixture.manager.provider_count(), 2);
    assert_eq!(fixture.manager.loader_count(), 2);
    assert_eq!(fixture.manager.loader_ref_count("hero.prefab"), Some(2));
}

#[test]
fn test_handles_pin_loaders_until_dropped() {
    let fixture = fixture();
    let handle = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    fixture.tick(3);

    let unload = fixture.manager.unload_unused_assets();
    fixture.tick(3);
    assert!(unload.borrow().is_done());
    assert_eq!(fixture.manager.loader_count(), 2);
    assert_eq!(fixture.manager.provider_count(), 1);

    drop(handle);
    let unload = fixture.manager.unload_unused_assets();
    fixture.tick(3);
    assert_eq!(unload.borrow().status(), OperationStatus::Succeed);
    assert_eq!(fixture.manager.loader_count(), 0);
    assert_eq!(fixture.manager.provider_count(), 0);
    assert!(!fixture.manager.has_any_loader());
}

#[test]
fn test_locked_loads_fail() {
    let fixture = fixture();
    fixture.manager.lock_load_operation(true);
    assert!(fixture.manager.is_load_locked());

    let handle = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    fixture.tick(1);
    assert_eq!(handle.status(), OperationStatus::Failed);
    assert_eq!(handle.error(), "The load operation locked !");
    assert_eq!(fixture.manager.provider_count(), 0);

    fixture.manager.lock_load_operation(false);
    let handle = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    fixture.tick(1);
    assert_eq!(handle.status(), OperationStatus::Succeed);
}

#[test]
fn test_unknown_asset_fails_handle() {
    let fixture = fixture();
    let handle = fixture.manager.load_asset("missing.prefab", 0).unwrap();
    fixture.tick(1);
    assert_eq!(handle.status(), OperationStatus::Failed);
    assert!(handle.error().contains("missing.prefab"));
    assert!(matches!(handle.asset(), Err(ResourceError::AssetNotFound { .. })));
    assert_eq!(fixture.manager.loader_count(), 0);
}

#[test]
fn test_load_without_manifest_fails_handle() {
    let fixture = fixture();
    *fixture.manifest.borrow_mut() = None;
    let handle = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    fixture.tick(1);
    assert_eq!(handle.error(), "No active manifest for package DefaultPackage");
}

#[test]
fn test_scenes_get_own_providers() {
    let fixture = fixture();
    let first = fixture.manager.load_scene("forest.scene", 0).unwrap();
    let second = fixture.manager.load_scene("forest.scene", 0).unwrap();
    assert_eq!(fixture.manager.provider_count(), 2);
    assert_eq!(fixture.manager.loader_count(), 1);

    fixture.tick(2);
    let scene = first.scene().unwrap();
    assert_eq!(scene.scene_name, "forest");
    assert_eq!(scene.bytes, b"forest");
    assert!(second.is_done());
    assert_eq!(fixture.manager.loader_ref_count("forest.scene"), Some(2));
}

#[test]
fn test_sub_assets_include_dependencies() {
    let fixture = fixture();
    let handle = fixture.manager.load_sub_assets("hero.prefab", 0).unwrap();
    fixture.tick(2);

    let assets = handle.sub_assets().unwrap();
    assert_eq!(assets.len(), 2);
    assert_eq!(assets[0].asset_path, "hero.prefab");
    assert_eq!(assets[0].bytes, b"hero");
    assert_eq!(assets[1].asset_path, "shared.tex");
    assert_eq!(assets[1].bytes, b"shared");
}

#[test]
fn test_all_assets_share_main_bundle() {
    let fixture = fixture();
    let handle = fixture.manager.load_all_assets("hero.prefab", 0).unwrap();
    fixture.tick(2);

    let assets = handle.all_assets().unwrap();
    let paths: HashSet<&str> = assets.iter().map(|asset| asset.asset_path.as_str()).collect();
    assert_eq!(paths, HashSet::from(["hero.prefab", "hero_alias.mat"]));
    assert!(assets.iter().all(|asset| asset.bytes == b"hero"));
}

#[test]
fn test_raw_file_exposes_path() {
    let fixture = fixture();
    let handle = fixture.manager.load_raw_file("sfx/hit.ogg", 0).unwrap();
    fixture.tick(2);

    assert_eq!(
        handle.file_path().unwrap(),
        Some(fixture.dir.path().join("sfx/hit.ogg"))
    );
    assert_eq!(handle.read_bytes().unwrap(), b"hit");
}

#[test]
fn test_loading_concurrency_is_bounded() {
    let config = ResourceConfig::default().with_bundle_loading_max_concurrency(1);
    let fixture = fixture_with(config, Some(100_000));
    let handle = fixture.manager.load_asset("hero.prefab", 0).unwrap();

    fixture.tick(1);
    assert_eq!(fixture.manager.bundle_loading_count(), 1);
    assert!(!handle.is_done());

    for _ in 0..100 {
        if handle.is_done() {
            break;
        }
        fixture.tick(1);
        assert!(fixture.manager.bundle_loading_count() <= 1);
    }
    assert_eq!(handle.status(), OperationStatus::Succeed);
    assert_eq!(fixture.manager.bundle_loading_count(), 0);
}

#[test]
fn test_try_unload_unused_asset_keeps_others() {
    let fixture = fixture();
    let hero = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    let _forest = fixture.manager.load_scene("forest.scene", 0).unwrap();
    fixture.tick(2);
    assert_eq!(fixture.manager.loader_count(), 3);

    drop(hero);
    fixture.manager.try_unload_unused_asset("hero.prefab", 2).unwrap();
    assert_eq!(fixture.manager.loader_count(), 1);
    assert_eq!(fixture.manager.provider_count(), 1);
    assert!(fixture.manager.loader_state("forest.scene").is_some());

    assert!(matches!(
        fixture.manager.try_unload_unused_asset("missing.prefab", 1),
        Err(ResourceError::AssetNotFound { .. })
    ));
}

#[test]
fn test_unregistered_kind_is_rejected() {
    let fixture = fixture();
    let factory =
        HandleFactory::empty().register(HandleKind::Asset, |base| AnyHandle::Asset(AssetHandle::new(base)));
    let manager = fixture.manager.with_handle_factory(factory);

    assert!(manager.load_asset("hero.prefab", 0).is_ok());
    assert!(matches!(
        manager.load_scene("forest.scene", 0),
        Err(ResourceError::UnsupportedHandleKind { .. })
    ));
}

#[test]
fn test_download_status_covers_every_bundle() {
    let fixture = fixture();
    let handle = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    let before = handle.download_status();
    assert_eq!(before.total_bytes, 10);
    assert_eq!(before.downloaded_bytes, 0);
    assert!(!before.is_done);

    fixture.tick(2);
    let after = handle.download_status();
    assert_eq!(after.downloaded_bytes, 10);
    assert!(after.is_done);
    assert_eq!(after.progress, 1.0);
}

#[test]
fn test_wait_for_async_complete_without_ticking() {
    let fixture = fixture();
    let handle = fixture.manager.load_sub_assets("hero.prefab", 0).unwrap();
    handle
        .wait_for_async_complete(&fixture.operations.context(Duration::from_millis(16)))
        .unwrap();
    assert_eq!(handle.status(), OperationStatus::Succeed);
    assert_eq!(handle.sub_assets().unwrap().len(), 2);
}

#[test]
fn test_unload_all_assets_invalidates_handles() {
    let fixture = fixture();
    let handle = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    fixture.tick(2);
    assert!(handle.is_valid());

    fixture.manager.unload_all_assets();
    assert!(!handle.is_valid());
    assert_eq!(fixture.manager.loader_count(), 0);
    assert_eq!(fixture.manager.provider_count(), 0);
}

#[test]
fn test_destroying_running_provider_reports_user_abort() {
    let fixture = fixture_with(ResourceConfig::default(), Some(10));
    let handle = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    fixture.tick(1);
    assert!(!handle.is_done());

    let error = Rc::new(RefCell::new(None));
    let sink = error.clone();
    handle.on_completed(move |outcome| {
        *sink.borrow_mut() = Some(outcome.error.clone());
    });

    fixture.manager.unload_all_assets();
    fixture.tick(1);
    assert_eq!(error.borrow().as_deref(), Some("User abort !"));
    assert_eq!(fixture.manager.bundle_loading_count(), 0);
}

#[test]
fn test_completion_callback_reads_its_handle() {
    let fixture = fixture();
    let handle = Rc::new(fixture.manager.load_asset("hero.prefab", 0).unwrap());

    let seen = Rc::new(RefCell::new(None));
    let (sink, observed) = (seen.clone(), handle.clone());
    handle.on_completed(move |_| {
        *sink.borrow_mut() = Some((observed.status(), observed.asset().unwrap().bytes));
    });
    fixture.tick(3);

    assert_eq!(
        seen.borrow().clone(),
        Some((OperationStatus::Succeed, b"hero".to_vec()))
    );
}

#[test]
fn test_callback_on_finished_handle_reads_it_immediately() {
    let fixture = fixture();
    let handle = Rc::new(fixture.manager.load_asset("hero.prefab", 0).unwrap());
    fixture.tick(3);
    assert!(handle.is_done());

    let seen = Rc::new(RefCell::new(None));
    let (sink, observed) = (seen.clone(), handle.clone());
    handle.on_completed(move |outcome| {
        *sink.borrow_mut() = Some((outcome.status, observed.error(), observed.asset().is_ok()));
    });

    assert_eq!(
        seen.borrow().clone(),
        Some((OperationStatus::Succeed, String::new(), true))
    );
}

#[test]
fn test_wait_delivers_callbacks_that_read_the_handle() {
    let fixture = fixture();
    let handle = Rc::new(fixture.manager.load_sub_assets("hero.prefab", 0).unwrap());
    let count = Rc::new(RefCell::new(0));
    let (sink, observed) = (count.clone(), handle.clone());
    handle.on_completed(move |_| {
        *sink.borrow_mut() = observed.sub_assets().unwrap().len();
    });

    handle
        .wait_for_async_complete(&fixture.operations.context(Duration::from_millis(16)))
        .unwrap();
    assert_eq!(*count.borrow(), 2);
}

#[test]
fn test_dependency_outlives_referencing_bundle_for_one_iteration() {
    let fixture = fixture();
    let hero = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    fixture.tick(3);
    assert_eq!(fixture.manager.loader_count(), 2);
    drop(hero);

    let unload = fixture.manager.unload_unused_assets_with(1);
    fixture.tick(1);
    assert_eq!(unload.borrow().status(), OperationStatus::Succeed);
    assert_eq!(fixture.manager.loader_count(), 1);
    assert!(fixture.manager.loader_state("hero.prefab").is_none());
    assert_eq!(fixture.manager.loader_state("shared.tex"), Some(LoaderState::Loaded));

    let unload = fixture.manager.unload_unused_assets_with(1);
    fixture.tick(1);
    assert_eq!(unload.borrow().status(), OperationStatus::Succeed);
    assert_eq!(fixture.manager.loader_count(), 0);
}

#[test]
fn test_referenced_dependency_is_kept_while_referrer_lives() {
    let fixture = fixture();
    let hero = fixture.manager.load_asset("hero.prefab", 0).unwrap();
    let shared = fixture.manager.load_asset("shared.tex", 0).unwrap();
    fixture.tick(3);
    drop(shared);

    let unload = fixture.manager.unload_unused_assets();
    fixture.tick(1);
    assert!(unload.borrow().is_done());
    assert_eq!(fixture.manager.loader_count(), 2);
    assert!(hero.asset().is_ok());
}
