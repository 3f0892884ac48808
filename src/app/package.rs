//! One resource package: file system, active manifest and loaded assets
//!
//! The package owns the pieces a host needs to bring a package up and use
//! it: initialize the file system, request the latest version, switch the
//! active manifest and load assets through the resource manager.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use crate::app::filesystem::FileSystem;
use crate::app::manifest::{
    ActiveManifest, PackageBundle, PackageManifest, RequestPackageVersionOperation,
    UpdatePackageManifestOperation,
};
use crate::app::operation::{OperationSystem, SharedOperation};
use crate::app::resource::{ResourceConfig, ResourceManager};
use crate::errors::ConfigResult;

/// A package and the operations that act on it
pub struct ResourcePackage {
    package_name: String,
    file_system: Rc<dyn FileSystem>,
    operations: Rc<OperationSystem>,
    manifest: ActiveManifest,
    resources: ResourceManager,
}

impl ResourcePackage {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an invalid resource config
    pub fn new(
        file_system: Rc<dyn FileSystem>,
        operations: Rc<OperationSystem>,
        config: ResourceConfig,
    ) -> ConfigResult<Self> {
        let package_name = file_system.package_name().to_string();
        let manifest: ActiveManifest = Rc::new(RefCell::new(None));
        let resources = ResourceManager::new(
            package_name.clone(),
            config,
            file_system.clone(),
            manifest.clone(),
            operations.clone(),
        )?;
        Ok(Self {
            package_name,
            file_system,
            operations,
            manifest,
            resources,
        })
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn file_system(&self) -> &Rc<dyn FileSystem> {
        &self.file_system
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Start initializing the file system
    pub fn initialize(&self) -> SharedOperation {
        info!("Initializing package {} on {}", self.package_name, self.file_system.name());
        let operation = self.file_system.clone().initialize();
        self.operations.start_operation(operation.clone());
        operation
    }

    pub fn request_package_version(
        &self,
        append_time_ticks: bool,
        timeout: Option<Duration>,
    ) -> Rc<RefCell<RequestPackageVersionOperation>> {
        let operation = Rc::new(RefCell::new(RequestPackageVersionOperation::new(
            self.file_system.clone(),
            append_time_ticks,
            timeout,
        )));
        self.operations.start_operation(operation.clone());
        operation
    }

    /// Load `package_version` and make it the active manifest on success
    pub fn update_package_manifest(
        &self,
        package_version: &str,
        timeout: Option<Duration>,
    ) -> Rc<RefCell<UpdatePackageManifestOperation>> {
        let operation = Rc::new(RefCell::new(UpdatePackageManifestOperation::new(
            self.file_system.clone(),
            self.manifest.clone(),
            package_version,
            timeout,
        )));
        self.operations.start_operation(operation.clone());
        operation
    }

    pub fn active_manifest(&self) -> Option<Rc<PackageManifest>> {
        self.manifest.borrow().clone()
    }

    /// Version of the active manifest
    pub fn package_version(&self) -> Option<String> {
        self.active_manifest()
            .map(|manifest| manifest.package_version.clone())
    }

    /// Bundles of the active manifest that loading would download,
    /// limited to bundles carrying one of `tags` when any are given
    pub fn bundles_to_download(&self, tags: &[String]) -> Vec<PackageBundle> {
        let Some(manifest) = self.active_manifest() else {
            return Vec::new();
        };
        manifest
            .bundle_list
            .iter()
            .filter(|bundle| tags.is_empty() || bundle.has_tag(tags))
            .filter(|bundle| self.file_system.need_download(bundle))
            .cloned()
            .collect()
    }

    /// Clear cached files by mode, against the active manifest
    pub fn clear_cache_files(&self, clear_mode: &str, tags: Vec<String>) -> SharedOperation {
        let operation = self
            .file_system
            .clone()
            .clear_cache_files(self.active_manifest(), clear_mode, tags);
        self.operations.start_operation(operation.clone());
        operation
    }

    /// Unload everything and release the file system
    pub fn destroy(&self) {
        self.resources.unload_all_assets();
        self.file_system.dispose();
        info!("Package {} destroyed", self.package_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::download::MemoryBackend;
    use crate::app::filesystem::editor::EDITOR_PACKAGE_VERSION;
    use crate::app::filesystem::{EditorFileSystem, EditorFileSystemConfig};
    use crate::app::operation::{Operation, OperationStatus};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        operations: Rc<OperationSystem>,
        package: ResourcePackage,
    }

    fn fixture(virtual_speed: Option<u64>) -> Fixture {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("ui")).unwrap();
        std::fs::write(dir.path().join("ui/menu.prefab"), b"menu").unwrap();
        std::fs::write(dir.path().join("music.ogg"), b"music").unwrap();

        let mut config = EditorFileSystemConfig::new(dir.path());
        if let Some(speed) = virtual_speed {
            config = config.with_virtual_download(speed);
        }
        let operations = Rc::new(OperationSystem::default());
        let file_system = Rc::new(EditorFileSystem::new(
            "DefaultPackage",
            config,
            Rc::new(MemoryBackend::new()),
            operations.clone(),
        ));
        let package =
            ResourcePackage::new(file_system, operations.clone(), ResourceConfig::default()).unwrap();
        Fixture {
            _dir: dir,
            operations,
            package,
        }
    }

    fn run<T: Operation + ?Sized>(fixture: &Fixture, operation: &Rc<RefCell<T>>) -> OperationStatus {
        for _ in 0..20 {
            if operation.borrow().is_done() {
                break;
            }
            fixture.operations.update(Duration::from_millis(100));
        }
        let status = operation.borrow().status();
        status
    }

    fn bring_up(fixture: &Fixture) {
        assert_eq!(run(fixture, &fixture.package.initialize()), OperationStatus::Succeed);
        let version = fixture.package.request_package_version(false, None);
        assert_eq!(run(fixture, &version), OperationStatus::Succeed);
        let version = version.borrow().package_version().to_string();
        assert_eq!(version, EDITOR_PACKAGE_VERSION);

        let update = fixture.package.update_package_manifest(&version, None);
        assert_eq!(run(fixture, &update), OperationStatus::Succeed);
    }

    #[test]
    fn test_bring_up_and_load() {
        let fixture = fixture(None);
        assert!(fixture.package.active_manifest().is_none());
        bring_up(&fixture);
        assert_eq!(fixture.package.package_version().as_deref(), Some(EDITOR_PACKAGE_VERSION));

        let handle = fixture.package.resources().load_asset("ui/menu.prefab", 0).unwrap();
        for _ in 0..3 {
            fixture.operations.update(Duration::from_millis(100));
        }
        assert_eq!(handle.asset().unwrap().bytes, b"menu");
        assert!(fixture.package.bundles_to_download(&[]).is_empty());
    }

    #[test]
    fn test_bundles_to_download_in_virtual_mode() {
        let fixture = fixture(Some(1024));
        bring_up(&fixture);
        let pending = fixture.package.bundles_to_download(&[]);
        assert_eq!(pending.len(), 2);
        assert!(fixture
            .package
            .bundles_to_download(&["missing-tag".to_string()])
            .is_empty());
    }

    #[test]
    fn test_destroy_unloads_assets() {
        let fixture = fixture(None);
        bring_up(&fixture);
        let handle = fixture.package.resources().load_raw_file("music.ogg", 0).unwrap();
        fixture.operations.update(Duration::from_millis(100));
        assert_eq!(fixture.package.resources().loader_count(), 1);

        fixture.package.destroy();
        assert!(!handle.is_valid());
        assert_eq!(fixture.package.resources().loader_count(), 0);
    }
}
