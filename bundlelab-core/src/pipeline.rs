//! Ingestion pipeline: stage, run the bundle's routine, publish atomically.
//!
//! Each ingestion writes into its own staging directory
//! `{root}/{bundle}/.staging-XXXXXX`. Only after every store has been closed
//! and the manifest written is the staging directory renamed to its final
//! name `{root}/{bundle}/{encode(timestamp)}`. That rename is the only step
//! that makes a snapshot visible.
//!
//! A snapshot always contains `manifest.json`, so it is never an empty
//! directory. `rename(2)` refuses to replace a non-empty directory, which makes
//! the final path claimable exactly once: of two ingestions racing on the same
//! timestamp, the loser gets [`BundleError::IngestionExists`] and its staging
//! directory is discarded.
//!
//! Ingestions of one bundle share its download cache. Each holds the cache
//! lock shared while it runs; the cache is removed after a publish only if
//! the exclusive lock can be taken, i.e. by the last ingestion to finish.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::artifact::{
    AdjustmentWriter, ArtifactKind, AssetMetadataWriter, BarFrequency, BarWriter,
};
use crate::calendar::SessionRange;
use crate::environment::Environment;
use crate::error::{BundleError, IngestError, StoreError};
use crate::lock::CacheLock;
use crate::progress::{IngestProgress, NoProgress};
use crate::registry::{BundleRegistry, BundleSpec};
use crate::timestamp::Timestamp;

/// Name of the snapshot manifest inside every published snapshot.
pub const MANIFEST_FILE: &str = "manifest.json";

const STAGING_PREFIX: &str = ".staging-";

/// A data source's ingest operation.
///
/// Implementations fetch and transform provider data and push it through the
/// writers exposed by [`IngestContext`]. They must not close the writers; the
/// pipeline does that after a successful return.
pub trait IngestRoutine: Send + Sync {
    /// Short source identifier recorded in the manifest.
    fn source_name(&self) -> &str {
        "custom"
    }

    fn ingest(&self, ctx: &mut IngestContext<'_>) -> Result<(), IngestError>;
}

impl<F> IngestRoutine for F
where
    F: Fn(&mut IngestContext<'_>) -> Result<(), IngestError> + Send + Sync,
{
    fn ingest(&self, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        self(ctx)
    }
}

/// Wrap a closure as a shareable routine.
pub fn routine_fn<F>(f: F) -> Arc<dyn IngestRoutine>
where
    F: Fn(&mut IngestContext<'_>) -> Result<(), IngestError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a routine gets to work with: writers bound to the staging directory,
/// the environment, the resolved session range and the download cache.
pub struct IngestContext<'a> {
    bundle: &'a str,
    environment: &'a Environment,
    sessions: SessionRange,
    timestamp: Timestamp,
    cache_dir: PathBuf,
    output_dir: PathBuf,
    show_progress: bool,
    progress: &'a dyn IngestProgress,
    asset_writer: Box<dyn AssetMetadataWriter>,
    daily_bar_writer: Box<dyn BarWriter>,
    minute_bar_writer: Box<dyn BarWriter>,
    adjustment_writer: Box<dyn AdjustmentWriter>,
}

impl<'a> IngestContext<'a> {
    pub fn bundle(&self) -> &str {
        self.bundle
    }

    pub fn environment(&self) -> &Environment {
        self.environment
    }

    pub fn sessions(&self) -> &SessionRange {
        &self.sessions
    }

    pub fn start_session(&self) -> NaiveDate {
        self.sessions.start()
    }

    pub fn end_session(&self) -> NaiveDate {
        self.sessions.end()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Per-bundle download cache, shared with concurrent ingestions of the
    /// same bundle. Survives failed ingestions.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The staging directory. Routines normally only touch it through the
    /// writers.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn show_progress(&self) -> bool {
        self.show_progress
    }

    pub fn progress(&self) -> &dyn IngestProgress {
        self.progress
    }

    pub fn asset_writer(&mut self) -> &mut dyn AssetMetadataWriter {
        self.asset_writer.as_mut()
    }

    pub fn bar_writer(&mut self, frequency: BarFrequency) -> &mut dyn BarWriter {
        match frequency {
            BarFrequency::Daily => self.daily_bar_writer.as_mut(),
            BarFrequency::Minute => self.minute_bar_writer.as_mut(),
        }
    }

    pub fn daily_bar_writer(&mut self) -> &mut dyn BarWriter {
        self.bar_writer(BarFrequency::Daily)
    }

    pub fn minute_bar_writer(&mut self) -> &mut dyn BarWriter {
        self.bar_writer(BarFrequency::Minute)
    }

    pub fn adjustment_writer(&mut self) -> &mut dyn AdjustmentWriter {
        self.adjustment_writer.as_mut()
    }

    fn close_writers(self) -> Result<(), StoreError> {
        self.asset_writer.close()?;
        self.daily_bar_writer.close()?;
        self.minute_bar_writer.close()?;
        self.adjustment_writer.close()
    }
}

/// Options of a single `ingest` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Logical time of the snapshot; `None` means now.
    pub timestamp: Option<Timestamp>,
    pub show_progress: bool,
}

impl IngestOptions {
    pub fn at(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            show_progress: false,
        }
    }
}

/// `manifest.json`: what a snapshot is and how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub bundle: String,
    pub timestamp: Timestamp,
    pub source: String,
    pub storage: String,
    pub calendar: String,
    pub start_session: NaiveDate,
    pub end_session: NaiveDate,
    pub minutes_per_day: u32,
    pub artifacts: Vec<ArtifactKind>,
    pub created_at: NaiveDateTime,
}

impl SnapshotManifest {
    fn new(spec: &BundleSpec, timestamp: Timestamp, sessions: &SessionRange) -> Self {
        Self {
            bundle: spec.name().to_string(),
            timestamp,
            source: spec.routine().source_name().to_string(),
            storage: spec.storage_format().name().to_string(),
            calendar: sessions.calendar().name().to_string(),
            start_session: sessions.start(),
            end_session: sessions.end(),
            minutes_per_day: sessions.minutes_per_day(),
            artifacts: ArtifactKind::ALL.to_vec(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Read the manifest of the snapshot at `dir`.
    pub fn read(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(MANIFEST_FILE);
        let content = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(serde_json::from_slice(&content)?)
    }

    fn write(&self, dir: &Path) -> Result<(), BundleError> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|e| BundleError::Ingest {
            bundle: self.bundle.clone(),
            source: IngestError::Store(e.into()),
        })?;
        fs::write(&path, json).map_err(|e| BundleError::io(path, e))
    }
}

/// Ingest bundle `name` without progress reporting.
///
/// Returns the timestamp of the published snapshot.
pub fn ingest(
    registry: &BundleRegistry,
    env: &Environment,
    name: &str,
    options: IngestOptions,
) -> Result<Timestamp, BundleError> {
    ingest_with_progress(registry, env, name, options, &NoProgress)
}

/// Ingest bundle `name`, reporting progress to `progress` when
/// `options.show_progress` is set.
///
/// On failure nothing becomes visible under the bundle root: the staging
/// directory is removed and existing snapshots are untouched. Errors from the
/// routine come back unchanged inside [`BundleError::Ingest`].
pub fn ingest_with_progress(
    registry: &BundleRegistry,
    env: &Environment,
    name: &str,
    options: IngestOptions,
    progress: &dyn IngestProgress,
) -> Result<Timestamp, BundleError> {
    let spec = registry.get(name)?;
    let timestamp = options.timestamp.unwrap_or_else(Timestamp::now);

    let calendar = env.calendars().get(spec.calendar_name())?;
    let sessions = SessionRange::resolve(
        calendar,
        spec.default_start(),
        spec.default_end(),
        spec.minutes(),
    )?;

    let final_path = env.snapshot_path(name, timestamp);
    if final_path.exists() {
        return Err(BundleError::IngestionExists {
            bundle: name.to_string(),
            timestamp,
        });
    }

    let bundle_root = env.bundle_root(name);
    fs::create_dir_all(&bundle_root).map_err(|e| BundleError::io(&bundle_root, e))?;
    let cache_dir = env.cache_dir(name);
    let cache_lock = CacheLock::shared(&env.cache_lock_path(name))?;
    fs::create_dir_all(&cache_dir).map_err(|e| BundleError::io(&cache_dir, e))?;

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&bundle_root)
        .map_err(|e| BundleError::io(&bundle_root, e))?;

    info!(
        bundle = name,
        %timestamp,
        source = spec.routine().source_name(),
        start = %sessions.start(),
        end = %sessions.end(),
        "ingest started"
    );

    let progress: &dyn IngestProgress = if options.show_progress {
        progress
    } else {
        &NoProgress
    };
    if let Err(e) = stage(&spec, env, &sessions, timestamp, &cache_dir, &staging, options, progress) {
        discard(staging, name);
        return Err(e);
    }

    if let Err(e) = publish(staging.path(), &final_path) {
        discard(staging, name);
        return Err(match e {
            PublishError::Taken => BundleError::IngestionExists {
                bundle: name.to_string(),
                timestamp,
            },
            PublishError::Io(e) => BundleError::io(&final_path, e),
        });
    }
    // The staging path is gone after the rename; dropping the handle is a no-op.
    drop(staging);
    drop(cache_lock);
    release_cache(env, name);

    info!(bundle = name, %timestamp, path = %final_path.display(), "ingest published");
    Ok(timestamp)
}

/// Run the routine in the staging directory and finalize every store.
#[allow(clippy::too_many_arguments)]
fn stage(
    spec: &BundleSpec,
    env: &Environment,
    sessions: &SessionRange,
    timestamp: Timestamp,
    cache_dir: &Path,
    staging: &TempDir,
    options: IngestOptions,
    progress: &dyn IngestProgress,
) -> Result<(), BundleError> {
    let out = staging.path();
    let storage = spec.storage_format();
    let store_failed = |e: StoreError| BundleError::Ingest {
        bundle: spec.name().to_string(),
        source: IngestError::Store(e),
    };

    let mut ctx = IngestContext {
        bundle: spec.name(),
        environment: env,
        sessions: sessions.clone(),
        timestamp,
        cache_dir: cache_dir.to_path_buf(),
        output_dir: out.to_path_buf(),
        show_progress: options.show_progress,
        progress,
        asset_writer: storage
            .asset_writer(&out.join(ArtifactKind::AssetMetadata.dir_name()))
            .map_err(store_failed)?,
        daily_bar_writer: storage
            .bar_writer(
                &out.join(ArtifactKind::DailyBars.dir_name()),
                BarFrequency::Daily,
                sessions,
            )
            .map_err(store_failed)?,
        minute_bar_writer: storage
            .bar_writer(
                &out.join(ArtifactKind::MinuteBars.dir_name()),
                BarFrequency::Minute,
                sessions,
            )
            .map_err(store_failed)?,
        adjustment_writer: storage
            .adjustment_writer(&out.join(ArtifactKind::Adjustments.dir_name()))
            .map_err(store_failed)?,
    };

    spec.routine()
        .ingest(&mut ctx)
        .map_err(|source| BundleError::Ingest {
            bundle: spec.name().to_string(),
            source,
        })?;

    ctx.close_writers().map_err(store_failed)?;
    SnapshotManifest::new(spec, timestamp, sessions).write(out)
}

enum PublishError {
    Taken,
    Io(io::Error),
}

/// Move the fully written staging directory to its final name.
fn publish(staging: &Path, final_path: &Path) -> Result<(), PublishError> {
    if final_path.exists() {
        return Err(PublishError::Taken);
    }
    match fs::rename(staging, final_path) {
        Ok(()) => Ok(()),
        // A concurrent ingestion claimed the path first; the rename refused
        // to replace its non-empty snapshot.
        Err(_) if final_path.exists() => Err(PublishError::Taken),
        Err(e) => Err(PublishError::Io(e)),
    }
}

/// Remove the download cache of `bundle` unless another ingestion still
/// holds it; the last one to finish removes it.
fn release_cache(env: &Environment, bundle: &str) {
    let cache_dir = env.cache_dir(bundle);
    match CacheLock::try_exclusive(&env.cache_lock_path(bundle)) {
        Ok(Some(_guard)) => match fs::remove_dir_all(&cache_dir) {
            Ok(()) => debug!(bundle, path = %cache_dir.display(), "cache removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(bundle, path = %cache_dir.display(), "failed to remove cache: {e}"),
        },
        Ok(None) => debug!(bundle, "cache in use by another ingestion, kept"),
        Err(e) => warn!(bundle, "failed to lock cache: {e}"),
    }
}

/// Remove a staging directory. Safe on a half-removed or vanished directory.
fn discard(staging: TempDir, bundle: &str) {
    let path = staging.path().to_path_buf();
    match staging.close() {
        Ok(()) => debug!(bundle, path = %path.display(), "staging discarded"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(bundle, path = %path.display(), "failed to discard staging: {e}"),
    }
}
