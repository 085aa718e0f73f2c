//! Registry Harvester main entry point
//!
//! This is the command-line interface for the registry record harvester.

use clap::Parser;
use registry_harvester::config::{load_config_with_hash, Config};
use registry_harvester::crawler::{Coordinator, IdSource, FIRST_DATA_ROW};
use registry_harvester::ledger::{Ledger, PersistentLedger};
use registry_harvester::output::{load_statistics, print_run_report, print_statistics};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Registry Harvester: resumable scraping of CAPTCHA-gated registry records
///
/// Registry Harvester visits one page per record id, solves the CAPTCHA in
/// front of it, and appends the extracted record to a CSV file. Failed ids
/// are retried in a time-boxed second pass and recorded for the next run.
/// Re-running with the same configuration only touches ids not yet attempted.
#[derive(Parser, Debug)]
#[command(name = "registry-harvester")]
#[command(version = "1.0.0")]
#[command(about = "Resumable scraper for CAPTCHA-gated registry records", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be queued without processing anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the ledger files and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Read ids from a column of this CSV file instead of the configuration
    #[arg(long, value_name = "FILE", conflicts_with = "failures_only")]
    ids_file: Option<PathBuf>,

    /// Column of --ids-file holding the ids
    #[arg(long, default_value = "id")]
    id_column: String,

    /// Spreadsheet row of --ids-file to start from (row 1 is the header)
    #[arg(long, default_value_t = FIRST_DATA_ROW)]
    start_row: usize,

    /// Queue no new ids, only retry the failures recorded by earlier runs
    #[arg(long)]
    failures_only: bool,

    /// Do not load earlier failures into the retry queue
    #[arg(long, conflicts_with = "failures_only")]
    no_preload: bool,

    /// Ask for visible page sessions
    #[arg(long)]
    headed: bool,
}

impl Cli {
    fn id_source(&self) -> IdSource {
        if self.failures_only {
            IdSource::FailuresOnly
        } else if let Some(path) = &self.ids_file {
            IdSource::IdsFile {
                path: path.clone(),
                column: self.id_column.clone(),
                start_row: self.start_row,
            }
        } else {
            IdSource::Configured
        }
    }

    fn apply_overrides(&self, config: &mut Config) {
        if self.headed {
            config.browser.headless = false;
        }
        if self.no_preload {
            config.workers.preload_failures = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    cli.apply_overrides(&mut config);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, cli.id_source()).await?;
    } else if cli.stats {
        handle_stats(&config).await?;
    } else {
        handle_harvest(config, cli.id_source()).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("registry_harvester=info,warn"),
            1 => EnvFilter::new("registry_harvester=debug,info"),
            2 => EnvFilter::new("registry_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be queued
async fn handle_dry_run(
    config: &Config,
    source: IdSource,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Registry Harvester Dry Run ===\n");

    println!("Run:");
    println!("  Id kind: {:?}", config.run.id_kind);
    println!("  Locator template: {}", config.run.locator_template);
    println!("  Source: {:?}", source);

    println!("\nWorkers:");
    println!("  Normal: {}", config.workers.normal);
    println!("  Retry: {}", config.workers.retry);
    println!("  Retry backoff: {}ms", config.workers.retry_backoff_ms);
    println!(
        "  Retry phase timeout: {}s",
        config.workers.retry_phase_timeout_secs
    );

    println!("\nCaptcha:");
    if config.captcha.enabled {
        println!("  Image: {}", config.captcha.image_selector);
        println!("  Max attempts: {}", config.captcha.max_attempts);
        println!("  OCR command: {}", config.captcha.ocr_command.join(" "));
    } else {
        println!("  Disabled");
    }

    println!("\nOutput:");
    println!("  Records: {}", config.output.success_path);
    println!("  Failures: {}", config.output.failure_path);
    println!("  Id column: {}", config.output.id_column);

    println!("\nFields ({}):", config.extract.fields.len());
    for field in &config.extract.fields {
        match &field.attribute {
            Some(attribute) => println!("  - {} <- {} @{}", field.name, field.selector, attribute),
            None => println!("  - {} <- {}", field.name, field.selector),
        }
    }
    if let Some(stamp) = &config.extract.timestamp_field {
        println!("  - {} <- extraction time", stamp);
    }

    let ledger = PersistentLedger::from_config(config).await?;
    let candidates = source.resolve(config).await?;
    let attempted = ledger.load_attempted_ids().await?;
    let succeeded = ledger.load_success_ids().await?;
    let new_ids = candidates
        .iter()
        .filter(|id| !attempted.contains(*id))
        .count();
    let retries = if config.workers.preload_failures || source.is_failures_only() {
        ledger
            .load_failures()
            .await?
            .into_iter()
            .filter(|id| !succeeded.contains(id))
            .collect::<HashSet<_>>()
            .len()
    } else {
        0
    };

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would queue {} new ids ({} already attempted) and retry {} earlier failures",
        new_ids,
        candidates.len() - new_ids,
        retries
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the ledger files
async fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Records: {}", config.output.success_path);
    println!("Failures: {}\n", config.output.failure_path);

    let ledger = PersistentLedger::from_config(config).await?;
    let stats = load_statistics(&ledger).await?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, source: IdSource) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Workers: {} normal, {} retry; fields: {}",
        config.workers.normal,
        config.workers.retry,
        config.extract.fields.len()
    );

    let coordinator = Coordinator::new(config).await?;

    // Ctrl-C stops the run gracefully; unfinished ids stay eligible for the next run
    let stop = coordinator.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing items in progress");
            stop.cancel();
        }
    });

    match coordinator.run(source).await {
        Ok(report) => {
            tracing::info!("Harvest completed");
            print_run_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
