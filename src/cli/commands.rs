//! Command handlers for Bundle Fetcher CLI
//!
//! This module implements the command handlers that connect CLI arguments
//! to the engine. Every handler that touches the cache builds a [`Host`],
//! brings a [`ResourcePackage`] up over a [`CacheFileSystem`] and drives
//! the resulting operations frame by frame.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::app::cache::format_bytes;
use crate::app::download::{DataRequestArgs, DownloadBackend, RequestStatus};
use crate::app::filesystem::{BundleStore, FileSystem};
use crate::app::manifest::PlainManifestServices;
use crate::app::operation::Operation;
use crate::app::{
    BundleDownloadOperation, CacheFileSystem, ClearMode, HttpBackend, ManifestBuilder, PackageBundle,
    ResourcePackage,
};
use crate::cli::{
    BuildArgs, CacheAction, CacheArgs, FetchArgs, FetchProgress, Host, HeadArgs, ProgressConfig,
    ProgressDisplay,
};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Number of bundles listed by a dry run before the listing is cut short
const DRY_RUN_LISTING: usize = 10;

/// Handle the build command
///
/// Scans the source directory, builds the manifest and writes the version
/// file, manifest, catalog and hashed bundle files to the output directory.
pub fn handle_build(args: BuildArgs, config: &AppConfig) -> Result<()> {
    args.validate().map_err(AppError::generic)?;
    let start_time = Instant::now();
    let package_name = config.cache.package_name.as_str();
    info!(
        "Building package {} version {} from {}",
        package_name,
        args.version,
        args.source.display()
    );

    let mut builder = ManifestBuilder::new(package_name, args.version.as_str());
    for (prefix, tag) in args.tag_rules().map_err(AppError::generic)? {
        builder = builder.with_tag(prefix, tag);
    }

    let manifest = builder.build(&args.source)?;
    if manifest.bundle_list.is_empty() {
        warn!("No files found in {}", args.source.display());
        println!("No files found in {}", args.source.display());
        return Ok(());
    }
    let published = builder.publish(&manifest, &args.source, &args.output, &PlainManifestServices)?;

    println!("📦 Package Build");
    println!("================");
    println!("Package: {}", manifest.package_name);
    println!("Version: {}", manifest.package_version);
    println!("Bundles: {}", manifest.bundle_list.len());
    println!("Assets: {}", manifest.asset_list.len());
    println!("Total size: {}", format_bytes(published.bundle_bytes));
    println!("Manifest: {}", published.manifest_path.display());
    println!("Version file: {}", published.version_path.display());
    println!("Catalog: {}", published.catalog_path.display());
    println!("Build time: {:.1}s", start_time.elapsed().as_secs_f64());
    println!();
    println!("✅ Package written to {}", args.output.display());
    Ok(())
}

/// Handle the fetch command
///
/// Resolves the package version, loads its manifest and downloads every
/// bundle that is not cached yet, showing byte progress.
pub fn handle_fetch(args: FetchArgs, config: &AppConfig) -> Result<()> {
    let start_time = Instant::now();
    let (main_url, fallback_url) = args
        .remote_urls(&config.cache.remote_main_url, &config.cache.remote_fallback_url)
        .ok_or_else(|| {
            AppError::generic("No remote URL configured. Pass --url or set cache.remote_main_url")
        })?;
    info!("Fetching from {} (fallback {})", main_url, fallback_url);

    let session = CacheSession::open(config, Some((main_url, fallback_url)), args.retries)?;
    let version = session.resolve_version(args.version.as_deref(), config.http.request_timeout)?;
    session.load_manifest(&version, config.http.request_timeout)?;

    let bundles = session.package.bundles_to_download(&args.tags);
    let total_bytes: u64 = bundles.iter().map(|bundle| bundle.file_size).sum();
    info!(
        "{} of version {}: {} bundles to download ({})",
        session.package.package_name(),
        version,
        bundles.len(),
        format_bytes(total_bytes)
    );

    if bundles.is_empty() {
        println!("✅ All bundles of version {} are already cached", version);
        session.package.destroy();
        return Ok(());
    }

    if args.dry_run {
        print_dry_run(&bundles, total_bytes);
        session.package.destroy();
        return Ok(());
    }

    let downloads: Vec<Rc<RefCell<BundleDownloadOperation>>> = bundles
        .iter()
        .map(|bundle| {
            let options = session.file_system.download_options(bundle);
            let operation = session.file_system.clone().download_file(bundle, options);
            session.host.operations().start_operation(operation.clone());
            operation
        })
        .collect();

    let mut display = ProgressDisplay::new(ProgressConfig::default());
    display.start(downloads.len(), total_bytes);
    let result = session.host.run_while(|| {
        let progress = sample_progress(&downloads);
        display.update(&progress);
        progress.bundles_done + progress.bundles_failed < downloads.len()
    });
    let progress = sample_progress(&downloads);
    display.finish(&progress);
    result?;

    let failures: Vec<(String, String)> = downloads
        .iter()
        .filter_map(|operation| {
            let operation = operation.borrow();
            (operation.status().is_done() && !operation.status().is_succeed())
                .then(|| (operation.bundle().bundle_name.clone(), operation.error().to_string()))
        })
        .collect();
    session.package.destroy();

    println!();
    println!("📊 Fetch Results");
    println!("================");
    println!("Version: {}", version);
    println!("Bundles downloaded: {}", progress.bundles_done);
    println!("Bundles failed: {}", progress.bundles_failed);
    println!("Bytes downloaded: {}", format_bytes(progress.bytes_done));
    println!("Total time: {:.1}s", start_time.elapsed().as_secs_f64());

    if failures.is_empty() {
        println!();
        println!("✅ All bundles downloaded and verified");
        return Ok(());
    }

    println!();
    println!("❌ Failed Bundles:");
    for (name, reason) in &failures {
        error!("Bundle {} failed: {}", name, reason);
        println!("  {} - {}", name, reason);
    }
    println!();
    println!("💡 Run the fetch command again to retry; finished bundles are kept in the cache.");
    Err(AppError::generic(format!(
        "{} of {} bundles failed to download",
        failures.len(),
        downloads.len()
    )))
}

fn print_dry_run(bundles: &[PackageBundle], total_bytes: u64) {
    println!(
        "Dry run - would download {} bundles ({}):",
        bundles.len(),
        format_bytes(total_bytes)
    );
    for (i, bundle) in bundles.iter().take(DRY_RUN_LISTING).enumerate() {
        println!(
            "  {}. {} ({}, {})",
            i + 1,
            bundle.bundle_name,
            bundle.file_hash,
            format_bytes(bundle.file_size)
        );
    }
    if bundles.len() > DRY_RUN_LISTING {
        println!("  ... and {} more bundles", bundles.len() - DRY_RUN_LISTING);
    }
}

/// Count finished bundles and bytes across the live downloads
fn sample_progress(downloads: &[Rc<RefCell<BundleDownloadOperation>>]) -> FetchProgress {
    let mut progress = FetchProgress::default();
    for operation in downloads {
        let operation = operation.borrow();
        match operation.status() {
            status if status.is_succeed() => {
                progress.bundles_done += 1;
                progress.bytes_done += operation.bundle().file_size;
            }
            status if status.is_done() => progress.bundles_failed += 1,
            _ => progress.bytes_done += operation.downloaded_bytes(),
        }
    }
    progress
}

/// Handle the head command
///
/// Sends a head request and prints the response metadata.
pub fn handle_head(args: HeadArgs, config: &AppConfig) -> Result<()> {
    let (_, http_config, operation_config, _) = config.to_runtime_config();
    let frame_interval = config.operation.frame_interval;
    let host = Host::new(operation_config, frame_interval)?;
    let backend = HttpBackend::new(&http_config, host.handle())?;

    info!("Requesting head of {}", args.url);
    let mut request =
        backend.create_head_request(DataRequestArgs::new(args.url.as_str()).with_timeout(Some(args.timeout())));
    request.send_request();
    let start_time = Instant::now();
    host.run_while(|| {
        request.poll_request(frame_interval);
        !request.is_done()
    })?;
    debug!("Head request finished in {:?}", start_time.elapsed());

    println!("🔍 Head: {}", args.url);
    println!("================");
    println!("Status: {:?}", request.status());
    println!("HTTP code: {}", request.http_code());

    if request.status() != RequestStatus::Succeed {
        let reason = request.error().to_string();
        request.dispose();
        println!();
        println!("❌ {}", reason);
        return Err(AppError::generic(reason));
    }

    if let Some(headers) = request.response_headers() {
        let length = headers.content_length();
        if length >= 0 {
            println!("Content length: {} ({})", length, format_bytes(length.unsigned_abs()));
        } else {
            println!("Content length: unknown");
        }
        println!("Content type: {}", headers.content_type().unwrap_or("-"));
        println!("ETag: {}", headers.etag().unwrap_or("-"));
        println!("Last modified: {}", headers.last_modified().unwrap_or("-"));
        println!("Headers received: {}", headers.len());
    }
    request.dispose();
    Ok(())
}

/// Handle cache management commands
pub fn handle_cache(args: CacheArgs, config: &AppConfig) -> Result<()> {
    match args.action {
        CacheAction::Info => handle_cache_info(config),
        CacheAction::Verify => handle_cache_verify(config),
        CacheAction::Clear {
            mode,
            tags,
            version,
            url,
        } => handle_cache_clear(config, &mode, tags, version, url),
    }
}

/// Show statistics of the package cache
fn handle_cache_info(config: &AppConfig) -> Result<()> {
    let session = CacheSession::open(config, None, None)?;
    let stats = session.file_system.stats();

    println!("📊 Cache Information");
    println!("====================");
    println!("Package: {}", session.package.package_name());
    println!("Location: {}", stats.package_root.display());
    println!("Cached bundles: {}", stats.cached_files_count);
    println!("Cached size: {}", stats.format_cache_size());
    println!("Disk usage: {}", stats.format_disk_usage());
    println!("Verify level: {:?}", session.file_system.config().verify_level);
    if stats.cached_files_count == 0 {
        println!();
        println!("ℹ️  Cache is empty. Run the fetch command to download bundles.");
    }
    session.package.destroy();
    Ok(())
}

/// Verify every cached bundle by size and CRC
fn handle_cache_verify(config: &AppConfig) -> Result<()> {
    let session = CacheSession::open(config, None, None)?;
    let report = session.file_system.verify_all();

    println!("🔍 Cache Verification");
    println!("====================");
    println!("Bundles verified: {}", report.files_checked);
    println!("Valid bundles: {}", report.files_verified);
    println!("Corrupted bundles: {}", report.files_failed);
    println!("Success rate: {:.1}%", report.success_rate());
    println!("Verification time: {:.2}s", report.verification_time.as_secs_f64());
    session.package.destroy();

    if report.is_successful() {
        println!();
        println!("✅ All cached bundles verified successfully!");
        return Ok(());
    }

    println!();
    println!("⚠️  Corrupted Bundles:");
    for failure in &report.failed_files {
        println!("  {} ({})", failure.bundle_guid, failure.result);
    }
    println!();
    println!("💡 Run the cache clear command or fetch again to replace them.");
    Err(AppError::generic(format!(
        "Cache verification found {} corrupted bundles",
        report.files_failed
    )))
}

/// Remove cached files by clear mode
fn handle_cache_clear(
    config: &AppConfig,
    mode: &str,
    tags: Vec<String>,
    version: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let clear_mode: ClearMode = mode.parse()?;
    let remote = url
        .filter(|url| !url.is_empty())
        .map(|url| (url.clone(), url))
        .or_else(|| {
            let main = config.cache.remote_main_url.clone();
            let fallback = if config.cache.remote_fallback_url.is_empty() {
                main.clone()
            } else {
                config.cache.remote_fallback_url.clone()
            };
            (!main.is_empty()).then_some((main, fallback))
        });
    let has_remote = remote.is_some();
    let session = CacheSession::open(config, remote, None)?;

    if clear_mode.requires_manifest() {
        if version.is_none() && !has_remote {
            return Err(AppError::generic(format!(
                "{} needs the active manifest. Pass --package-version or --url",
                clear_mode
            )));
        }
        let version = session.resolve_version(version.as_deref(), config.http.request_timeout)?;
        session.load_manifest(&version, config.http.request_timeout)?;
    }

    let before = session.file_system.file_count();
    let stats_before = session.file_system.stats();
    let operation = session.package.clear_cache_files(clear_mode.as_str(), tags);
    session.host.complete(&operation)?;
    let stats_after = session.file_system.stats();
    session.package.destroy();

    println!("🧹 Cache Clear");
    println!("==============");
    println!("Mode: {}", clear_mode);
    println!("Bundles removed: {}", before.saturating_sub(stats_after.cached_files_count));
    println!(
        "Disk space freed: {}",
        format_bytes(stats_before.disk_usage.saturating_sub(stats_after.disk_usage))
    );
    println!("Bundles remaining: {}", stats_after.cached_files_count);
    println!();
    println!("✅ Cache cleared");
    Ok(())
}

/// A host with one package brought up over the disk cache
struct CacheSession {
    file_system: Rc<CacheFileSystem>,
    package: ResourcePackage,
    // Declared last: drops after the transfers that run on its runtime
    host: Host,
}

impl CacheSession {
    /// Build the host and package, and initialize the cache
    fn open(config: &AppConfig, remote: Option<(String, String)>, retries: Option<u32>) -> Result<Self> {
        config.validate()?;
        let (mut cache_config, http_config, operation_config, resource_config) = config.to_runtime_config();
        if let Some((main_url, fallback_url)) = remote {
            cache_config = cache_config.with_remote(main_url, fallback_url);
        }
        if let Some(retries) = retries {
            cache_config = cache_config.with_failed_try_again(retries);
        }

        let host = Host::new(operation_config, config.operation.frame_interval)?;
        let backend: Rc<dyn DownloadBackend> = Rc::new(HttpBackend::new(&http_config, host.handle())?);
        let file_system = Rc::new(CacheFileSystem::new(
            cache_config,
            backend,
            host.operations().clone(),
        )?);
        let package = ResourcePackage::new(file_system.clone(), host.operations().clone(), resource_config)?;

        let start_time = Instant::now();
        host.complete(&package.initialize())?;
        info!(
            "Cache initialized with {} bundles in {:?}",
            file_system.file_count(),
            start_time.elapsed()
        );
        Ok(Self {
            file_system,
            package,
            host,
        })
    }

    /// Use `requested` or ask the server for the latest version
    fn resolve_version(&self, requested: Option<&str>, timeout: Duration) -> Result<String> {
        if let Some(version) = requested.filter(|version| !version.is_empty()) {
            return Ok(version.to_string());
        }
        let operation = self.package.request_package_version(true, Some(timeout));
        self.host.complete(&operation)?;
        let version = operation.borrow().package_version().to_string();
        info!("Latest package version: {}", version);
        Ok(version)
    }

    /// Load `version` and make it the active manifest
    fn load_manifest(&self, version: &str, timeout: Duration) -> Result<()> {
        let operation = self.package.update_package_manifest(version, Some(timeout));
        self.host.complete(&operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::download::{DownloadFileOptions, SharedTransfer, TransferSource};
    use crate::app::operation::OperationSystem;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn build_args(source: PathBuf, output: PathBuf) -> BuildArgs {
        BuildArgs {
            source,
            output,
            version: "v1".to_string(),
            tags: vec!["ui/=ui".to_string()],
        }
    }

    #[test]
    fn test_handle_build_publishes_package() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::create_dir_all(source.path().join("ui")).unwrap();
        std::fs::write(source.path().join("ui/menu.prefab"), b"menu").unwrap();
        std::fs::write(source.path().join("music.ogg"), b"music").unwrap();

        let mut config = AppConfig::default();
        config.cache.package_name = "BuildPackage".to_string();
        handle_build(
            build_args(source.path().to_path_buf(), output.path().to_path_buf()),
            &config,
        )
        .unwrap();

        let version = std::fs::read_to_string(output.path().join("BuildPackage.version")).unwrap();
        assert_eq!(version, "v1");
        assert!(output.path().join("BuildPackage_v1.json").exists());
        assert!(output.path().join("BuildPackage.catalog.json").exists());
    }

    #[test]
    fn test_handle_build_rejects_bad_tag_rule() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut args = build_args(source.path().to_path_buf(), output.path().to_path_buf());
        args.tags = vec!["no-separator".to_string()];
        assert!(handle_build(args, &AppConfig::default()).is_err());
    }

    #[test]
    fn test_handle_fetch_requires_remote_url() {
        let args = FetchArgs {
            url: None,
            fallback_url: None,
            version: None,
            tags: Vec::new(),
            retries: None,
            dry_run: true,
        };
        let error = handle_fetch(args, &AppConfig::default()).unwrap_err();
        assert!(error.to_string().contains("No remote URL configured"));
    }

    #[test]
    fn test_cache_clear_rejects_unknown_mode() {
        let args = CacheArgs {
            action: CacheAction::Clear {
                mode: "Everything".to_string(),
                tags: Vec::new(),
                version: None,
                url: None,
            },
        };
        let error = handle_cache(args, &AppConfig::default()).unwrap_err();
        assert!(error.to_string().contains("Invalid clear mode : Everything"));
    }

    struct FixedSource {
        present: bool,
    }

    impl TransferSource for FixedSource {
        fn exists(&self, _bundle: &PackageBundle) -> bool {
            self.present
        }

        fn begin_transfer(&self, bundle: &PackageBundle, _url: &str) -> SharedTransfer {
            panic!("unexpected transfer for {}", bundle.bundle_name)
        }
    }

    fn download(present: bool, options: DownloadFileOptions) -> Rc<RefCell<BundleDownloadOperation>> {
        let bundle = PackageBundle::new("a.bin", "0123456789abcdef0123456789abcdef", 0, 4);
        Rc::new(RefCell::new(BundleDownloadOperation::new(
            Rc::new(FixedSource { present }),
            bundle,
            options,
        )))
    }

    #[test]
    fn test_sample_progress_counts_states() {
        let operations = OperationSystem::default();
        let cached = download(true, DownloadFileOptions::new("u1", "u2"));
        let invalid = download(false, DownloadFileOptions::new("", ""));
        let pending = download(false, DownloadFileOptions::new("u1", "u2"));
        operations.start_operation(cached.clone());
        operations.start_operation(invalid.clone());
        operations.update(Duration::from_millis(16));

        let progress = sample_progress(&[cached, invalid, pending]);
        assert_eq!(progress.bundles_done, 1);
        assert_eq!(progress.bundles_failed, 1);
        assert_eq!(progress.bytes_done, 4);
    }
}
