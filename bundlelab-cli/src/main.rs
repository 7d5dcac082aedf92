//! BundleLab CLI: ingest, list, clean and inspect data bundles.
//!
//! Commands:
//! - `ingest` runs a bundle's ingest routine and publishes a new snapshot
//! - `bundles` lists registered bundles with their ingestions, newest first
//! - `clean` removes snapshots by age or count
//! - `show` loads a snapshot and prints a summary

mod logging;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bundlelab_core::config::LogFormat;
use bundlelab_core::progress::StdoutProgress;
use bundlelab_core::{
    clean, ingest_with_progress, ingestions_for_bundle, load, most_recent_ingestion,
    register_builtin_bundles, register_configured_bundles, BundleData, BundleLabConfig,
    BundleRegistry, CleanReport, Environment, IngestOptions, Timestamp,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "bundlelab",
    about = "BundleLab CLI: versioned market-data bundles"
)]
struct Cli {
    /// Bundle root. Overrides the config file and BUNDLELAB_ROOT.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// TOML config declaring the root, logging and extra bundles.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for bundle operations (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Human,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Human => LogFormat::Human,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a new snapshot of a bundle.
    Ingest {
        bundle: String,

        /// Ingestion timestamp. Defaults to now.
        #[arg(long)]
        timestamp: Option<Timestamp>,

        /// Print per-symbol progress while ingesting.
        #[arg(long, default_value_t = false)]
        show_progress: bool,
    },
    /// List registered bundles and their ingestions.
    Bundles,
    /// Remove snapshots of a bundle. Exactly one mode is required.
    Clean {
        bundle: String,

        /// Remove snapshots strictly older than this timestamp.
        #[arg(long)]
        before: Option<Timestamp>,

        /// Remove snapshots strictly newer than this timestamp.
        #[arg(long)]
        after: Option<Timestamp>,

        /// Keep only the N most recent snapshots.
        #[arg(long)]
        keep_last: Option<usize>,
    },
    /// Load a snapshot and print a summary.
    Show {
        bundle: String,

        /// Exact ingestion timestamp. Defaults to the most recent.
        #[arg(long, conflicts_with = "as_of")]
        timestamp: Option<Timestamp>,

        /// Most recent ingestion at or before this timestamp.
        #[arg(long)]
        as_of: Option<Timestamp>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BundleLabConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BundleLabConfig::default(),
    };
    if let Some(level) = cli.log_level.clone() {
        config.log.level = Some(level);
    }
    if let Some(format) = cli.log_format {
        config.log.format = format.into();
    }
    logging::init_logging(&config.log);

    let root = config.resolve_root(cli.root.as_deref());
    let (registry, env) = setup(&config, &root)?;

    match cli.command {
        Commands::Ingest {
            bundle,
            timestamp,
            show_progress,
        } => run_ingest(&registry, &env, &bundle, timestamp, show_progress),
        Commands::Bundles => run_bundles(&registry, &env),
        Commands::Clean {
            bundle,
            before,
            after,
            keep_last,
        } => run_clean(&registry, &env, &bundle, before, after, keep_last),
        Commands::Show {
            bundle,
            timestamp,
            as_of,
        } => run_show(&registry, &env, &bundle, timestamp, as_of),
    }
}

/// Registry with the built-in and configured bundles, and an environment
/// rooted at `root` that sees the process variables.
fn setup(config: &BundleLabConfig, root: &Path) -> Result<(BundleRegistry, Environment)> {
    let registry = BundleRegistry::new();
    register_builtin_bundles(&registry)?;
    let configured = register_configured_bundles(&registry, config)?;
    debug!(root = %root.display(), configured, "bundle registry ready");
    Ok((registry, Environment::from_process(root)))
}

fn run_ingest(
    registry: &BundleRegistry,
    env: &Environment,
    bundle: &str,
    timestamp: Option<Timestamp>,
    show_progress: bool,
) -> Result<()> {
    let options = IngestOptions {
        timestamp,
        show_progress,
    };
    let published = ingest_with_progress(registry, env, bundle, options, &StdoutProgress)?;
    println!(
        "Ingested {bundle} at {published} -> {}",
        env.snapshot_path(bundle, published).display()
    );
    Ok(())
}

fn run_bundles(registry: &BundleRegistry, env: &Environment) -> Result<()> {
    for line in bundle_listing(registry, env)? {
        println!("{line}");
    }
    Ok(())
}

/// One line per bundle and ingestion, e.g. `csvdir 2024-01-05 12:00:00.000000`.
fn bundle_listing(registry: &BundleRegistry, env: &Environment) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for name in registry.bundles() {
        let ingestions = ingestions_for_bundle(registry, env, &name)?;
        if ingestions.is_empty() {
            lines.push(format!("{name} <no ingestions>"));
        }
        for ts in ingestions {
            lines.push(format!("{name} {ts}"));
        }
    }
    Ok(lines)
}

fn run_clean(
    registry: &BundleRegistry,
    env: &Environment,
    bundle: &str,
    before: Option<Timestamp>,
    after: Option<Timestamp>,
    keep_last: Option<usize>,
) -> Result<()> {
    let report = clean(registry, env, bundle, before, after, keep_last)?;
    for line in clean_summary(bundle, &report) {
        println!("{line}");
    }
    if !report.is_complete() {
        bail!(
            "{} snapshot(s) of '{bundle}' could not be removed",
            report.failed.len()
        );
    }
    Ok(())
}

fn clean_summary(bundle: &str, report: &CleanReport) -> Vec<String> {
    if report.removed.is_empty() && report.failed.is_empty() {
        return vec![format!("Nothing to clean for {bundle}.")];
    }
    let mut lines: Vec<String> = report
        .removed
        .iter()
        .map(|ts| format!("Removed: {bundle} {ts}"))
        .collect();
    for failure in &report.failed {
        lines.push(format!(
            "Failed:  {bundle} {} ({})",
            failure.timestamp, failure.error
        ));
    }
    lines
}

fn run_show(
    registry: &BundleRegistry,
    env: &Environment,
    bundle: &str,
    timestamp: Option<Timestamp>,
    as_of: Option<Timestamp>,
) -> Result<()> {
    let timestamp = match as_of {
        Some(as_of) => Some(
            most_recent_ingestion(registry, env, bundle, as_of)?
                .with_context(|| format!("no ingestion of '{bundle}' at or before {as_of}"))?,
        ),
        None => timestamp,
    };
    let data = load(registry, env, bundle, timestamp)?;
    println!();
    for line in snapshot_summary(&data) {
        println!("{line}");
    }
    println!();
    Ok(())
}

fn snapshot_summary(data: &BundleData) -> Vec<String> {
    let manifest = data.manifest();
    let daily = data.daily_bar_reader();
    let minute = data.minute_bar_reader();
    let adjustments = data.adjustment_reader().adjustments();
    vec![
        format!("=== {} @ {} ===", data.bundle(), data.timestamp()),
        format!("Path:           {}", data.path().display()),
        format!("Source:         {} ({})", manifest.source, manifest.storage),
        format!(
            "Sessions:       {} to {} ({})",
            manifest.start_session, manifest.end_session, manifest.calendar
        ),
        format!("Assets:         {}", data.asset_reader().assets().len()),
        format!(
            "Daily bars:     {} across {} sids",
            daily.bar_count(),
            daily.sids().len()
        ),
        format!(
            "Minute bars:    {} across {} sids",
            minute.bar_count(),
            minute.sids().len()
        ),
        format!(
            "Adjustments:    {} splits, {} mergers, {} dividends",
            adjustments.splits.len(),
            adjustments.mergers.len(),
            adjustments.dividends.len()
        ),
        format!("Size on disk:   {}", format_size(dir_size(data.path()))),
    ]
}

/// Total size of the files under `path`, recursively.
fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => size += dir_size(&entry.path()),
                Ok(_) => size += entry.metadata().map(|m| m.len()).unwrap_or(0),
                Err(_) => {}
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
