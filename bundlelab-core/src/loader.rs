//! Loader: open a published snapshot read-only.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::artifact::{
    AdjustmentReader, ArtifactKind, AssetMetadataReader, BarFrequency, BarReader,
};
use crate::catalog::ingestions_for_bundle;
use crate::environment::Environment;
use crate::error::{BundleError, StoreError};
use crate::pipeline::{SnapshotManifest, MANIFEST_FILE};
use crate::registry::BundleRegistry;
use crate::timestamp::Timestamp;

/// A loaded snapshot: the four stores, read-only.
pub struct BundleData {
    bundle: String,
    timestamp: Timestamp,
    path: PathBuf,
    manifest: SnapshotManifest,
    asset_reader: Box<dyn AssetMetadataReader>,
    daily_bar_reader: Box<dyn BarReader>,
    minute_bar_reader: Box<dyn BarReader>,
    adjustment_reader: Box<dyn AdjustmentReader>,
}

impl BundleData {
    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Directory of the snapshot.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }

    pub fn asset_reader(&self) -> &dyn AssetMetadataReader {
        self.asset_reader.as_ref()
    }

    pub fn bar_reader(&self, frequency: BarFrequency) -> &dyn BarReader {
        match frequency {
            BarFrequency::Daily => self.daily_bar_reader.as_ref(),
            BarFrequency::Minute => self.minute_bar_reader.as_ref(),
        }
    }

    pub fn daily_bar_reader(&self) -> &dyn BarReader {
        self.bar_reader(BarFrequency::Daily)
    }

    pub fn minute_bar_reader(&self) -> &dyn BarReader {
        self.bar_reader(BarFrequency::Minute)
    }

    pub fn adjustment_reader(&self) -> &dyn AdjustmentReader {
        self.adjustment_reader.as_ref()
    }
}

impl fmt::Debug for BundleData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleData")
            .field("bundle", &self.bundle)
            .field("timestamp", &self.timestamp)
            .field("path", &self.path)
            .field("assets", &self.asset_reader.assets().len())
            .field("daily_bars", &self.daily_bar_reader.bar_count())
            .field("minute_bars", &self.minute_bar_reader.bar_count())
            .field("adjustments", &self.adjustment_reader.adjustments().len())
            .finish()
    }
}

/// Load snapshot `timestamp` of bundle `name`, or its newest snapshot when
/// `timestamp` is `None`.
///
/// An explicit timestamp must match a snapshot exactly. Every store is
/// opened; if one fails the whole load fails with
/// [`BundleError::CorruptIngestion`] naming that store.
pub fn load(
    registry: &BundleRegistry,
    env: &Environment,
    name: &str,
    timestamp: Option<Timestamp>,
) -> Result<BundleData, BundleError> {
    let spec = registry.get(name)?;
    let timestamp = match timestamp {
        Some(ts) => ts,
        None => ingestions_for_bundle(registry, env, name)?
            .into_iter()
            .next()
            .ok_or_else(|| BundleError::MissingIngestion {
                bundle: name.to_string(),
                timestamp: None,
            })?,
    };

    let path = env.snapshot_path(name, timestamp);
    if !path.is_dir() {
        return Err(missing(name, timestamp));
    }

    let opener = SnapshotOpener {
        bundle: name,
        timestamp,
        path: &path,
    };

    let manifest = SnapshotManifest::read(&path)
        .map_err(|e| opener.failure(MANIFEST_FILE, &e.to_string()))?;
    let storage = spec.storage_format();
    if manifest.storage != storage.name() {
        return Err(opener.failure(
            MANIFEST_FILE,
            &format!(
                "snapshot written with storage '{}', bundle uses '{}'",
                manifest.storage,
                storage.name()
            ),
        ));
    }

    let asset_reader = opener.open(ArtifactKind::AssetMetadata, |dir| {
        storage.open_asset_reader(dir)
    })?;
    let daily_bar_reader = opener.open(ArtifactKind::DailyBars, |dir| {
        storage.open_bar_reader(dir, BarFrequency::Daily)
    })?;
    let minute_bar_reader = opener.open(ArtifactKind::MinuteBars, |dir| {
        storage.open_bar_reader(dir, BarFrequency::Minute)
    })?;
    let adjustment_reader = opener.open(ArtifactKind::Adjustments, |dir| {
        storage.open_adjustment_reader(dir)
    })?;

    Ok(BundleData {
        bundle: name.to_string(),
        timestamp,
        path,
        manifest,
        asset_reader,
        daily_bar_reader,
        minute_bar_reader,
        adjustment_reader,
    })
}

fn missing(bundle: &str, timestamp: Timestamp) -> BundleError {
    BundleError::MissingIngestion {
        bundle: bundle.to_string(),
        timestamp: Some(timestamp),
    }
}

struct SnapshotOpener<'a> {
    bundle: &'a str,
    timestamp: Timestamp,
    path: &'a Path,
}

impl SnapshotOpener<'_> {
    fn open<R: ?Sized>(
        &self,
        kind: ArtifactKind,
        open: impl FnOnce(&Path) -> Result<Box<R>, StoreError>,
    ) -> Result<Box<R>, BundleError> {
        open(&self.path.join(kind.dir_name()))
            .map_err(|e| self.failure(kind.dir_name(), &e.to_string()))
    }

    /// A snapshot removed by a concurrent `clean` is missing, not corrupt.
    fn failure(&self, artifact: &str, reason: &str) -> BundleError {
        if !self.path.is_dir() {
            return missing(self.bundle, self.timestamp);
        }
        BundleError::CorruptIngestion {
            bundle: self.bundle.to_string(),
            timestamp: self.timestamp,
            artifact: artifact.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::pipeline::{ingest, routine_fn, IngestOptions};
    use crate::registry::BundleSpec;

    fn setup() -> (tempfile::TempDir, Environment, BundleRegistry) {
        let root = tempfile::tempdir().unwrap();
        let env = Environment::new(root.path());
        let registry = BundleRegistry::new();
        registry
            .register(BundleSpec::new("alpha", routine_fn(|_| Ok(()))))
            .unwrap();
        (root, env, registry)
    }

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix(secs).unwrap()
    }

    #[test]
    fn zero_ingestions_is_missing() {
        let (_root, env, registry) = setup();
        assert!(matches!(
            load(&registry, &env, "alpha", None),
            Err(BundleError::MissingIngestion { timestamp: None, .. })
        ));
    }

    #[test]
    fn explicit_timestamp_must_match_exactly() {
        let (_root, env, registry) = setup();
        ingest(&registry, &env, "alpha", IngestOptions::at(ts(100))).unwrap();
        assert!(matches!(
            load(&registry, &env, "alpha", Some(ts(101))),
            Err(BundleError::MissingIngestion { timestamp: Some(t), .. }) if t == ts(101)
        ));
        let data = load(&registry, &env, "alpha", Some(ts(100))).unwrap();
        assert_eq!(data.timestamp(), ts(100));
        assert_eq!(data.manifest().bundle, "alpha");
        assert!(data.asset_reader().assets().is_empty());
        assert_eq!(data.daily_bar_reader().bar_count(), 0);
    }

    #[test]
    fn damaged_store_is_corrupt() {
        let (_root, env, registry) = setup();
        ingest(&registry, &env, "alpha", IngestOptions::at(ts(100))).unwrap();
        let snapshot = env.snapshot_path("alpha", ts(100));
        fs::remove_dir_all(snapshot.join(ArtifactKind::MinuteBars.dir_name())).unwrap();

        match load(&registry, &env, "alpha", None) {
            Err(BundleError::CorruptIngestion {
                artifact, timestamp, ..
            }) => {
                assert_eq!(artifact, "minute_bars");
                assert_eq!(timestamp, ts(100));
            }
            other => panic!("expected CorruptIngestion, got {other:?}"),
        }
    }

    #[test]
    fn missing_manifest_is_corrupt() {
        let (_root, env, registry) = setup();
        ingest(&registry, &env, "alpha", IngestOptions::at(ts(100))).unwrap();
        fs::remove_file(env.snapshot_path("alpha", ts(100)).join(MANIFEST_FILE)).unwrap();
        assert!(matches!(
            load(&registry, &env, "alpha", None),
            Err(BundleError::CorruptIngestion { artifact, .. }) if artifact == MANIFEST_FILE
        ));
    }
}
