//! Bundle Fetcher CLI application
//!
//! Command-line host for the bundle engine: builds packages from
//! directories, fetches them into the disk cache and manages the cache.

use std::process;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

// Import CLI modules through the library (module is public but not re-exported)
use bundle_fetcher::cli::{handle_build, handle_cache, handle_fetch, handle_head, Cli, Commands};
use bundle_fetcher::config::AppConfig;

fn main() {
    let result = run();

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Main application logic
fn run() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    if cli.global.config.is_none() {
        if let Err(e) = AppConfig::initialize_first_run() {
            eprintln!("Warning: could not create default configuration: {}", e);
        }
    }
    let mut config = AppConfig::load(cli.global.config.clone()).context("Failed to load configuration")?;
    if let Some(cache_dir) = &cli.global.cache_dir {
        config.cache.cache_root = Some(cache_dir.clone());
    }
    if let Some(package) = &cli.global.package {
        config.cache.package_name = package.clone();
    }

    init_logging(&cli, &config);
    info!("Bundle Fetcher v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Build(args) => {
            info!("Executing build command");
            handle_build(args, &config).context("Build failed")
        }
        Commands::Fetch(args) => {
            info!("Executing fetch command");
            handle_fetch(args, &config).context("Fetch failed")
        }
        Commands::Head(args) => {
            info!("Executing head command");
            handle_head(args, &config).context("Head request failed")
        }
        Commands::Cache(args) => {
            info!("Executing cache command");
            handle_cache(args, &config).context("Cache command failed")
        }
    }
}

/// Initialize logging from the CLI verbosity flags, falling back to the
/// configured level
fn init_logging(cli: &Cli, config: &AppConfig) {
    let flags_given = cli.global.quiet || cli.global.verbose || cli.global.very_verbose;
    let log_level = if flags_given {
        cli.log_level().to_string()
    } else {
        config.logging.level.clone()
    };

    let mut filter = EnvFilter::from_default_env();
    let directive = format!("bundle_fetcher={}", log_level);
    let invalid_directive = match directive.parse::<Directive>() {
        Ok(directive) => {
            filter = filter.add_directive(directive);
            None
        }
        Err(e) => Some(e),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config.logging.colored_output)
        .with_level(cli.global.very_verbose) // Show levels only in very verbose mode
        .init();

    if let Some(e) = invalid_directive {
        warn!("Ignoring log level '{}': {}", log_level, e);
    }
    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
