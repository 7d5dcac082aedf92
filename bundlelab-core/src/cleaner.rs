//! Cleaner: remove snapshots according to a retention policy.
//!
//! A snapshot is first renamed to a `.removing-` tombstone, which the catalog
//! never lists, and only then deleted. Readers therefore see a snapshot either
//! whole or not at all, even when the delete fails halfway.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::catalog::ingestions_for_bundle;
use crate::environment::Environment;
use crate::error::BundleError;
use crate::registry::BundleRegistry;
use crate::timestamp::Timestamp;

/// Prefix of a snapshot directory that is being deleted.
pub const TOMBSTONE_PREFIX: &str = ".removing-";

/// Which snapshots to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Remove snapshots strictly older than the timestamp.
    Before(Timestamp),
    /// Remove snapshots strictly newer than the timestamp.
    After(Timestamp),
    /// Keep the `n` newest snapshots, remove the rest.
    KeepLast(usize),
}

impl RetentionPolicy {
    /// Build a policy from optional modes. Exactly one must be given.
    pub fn from_options(
        before: Option<Timestamp>,
        after: Option<Timestamp>,
        keep_last: Option<usize>,
    ) -> Result<Self, BundleError> {
        match (before, after, keep_last) {
            (Some(t), None, None) => Ok(RetentionPolicy::Before(t)),
            (None, Some(t), None) => Ok(RetentionPolicy::After(t)),
            (None, None, Some(n)) => Ok(RetentionPolicy::KeepLast(n)),
            _ => Err(BundleError::AmbiguousCleanRequest {
                modes: usize::from(before.is_some())
                    + usize::from(after.is_some())
                    + usize::from(keep_last.is_some()),
            }),
        }
    }

    /// Snapshots to remove out of `newest_first`, which must be sorted newest
    /// first as returned by the catalog.
    pub fn select(&self, newest_first: &[Timestamp]) -> Vec<Timestamp> {
        match *self {
            RetentionPolicy::Before(t) => {
                newest_first.iter().copied().filter(|ts| *ts < t).collect()
            }
            RetentionPolicy::After(t) => {
                newest_first.iter().copied().filter(|ts| *ts > t).collect()
            }
            RetentionPolicy::KeepLast(n) => newest_first.iter().skip(n).copied().collect(),
        }
    }
}

/// A snapshot that could not be removed.
#[derive(Debug)]
pub struct CleanFailure {
    pub timestamp: Timestamp,
    pub path: PathBuf,
    pub error: io::Error,
}

/// Outcome of a `clean` call.
#[derive(Debug, Default)]
pub struct CleanReport {
    /// Snapshots that were actually removed.
    pub removed: BTreeSet<Timestamp>,
    pub failed: Vec<CleanFailure>,
}

impl CleanReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Remove snapshots of `name` selected by the given modes.
///
/// Exactly one of `before`, `after` and `keep_last` must be given, otherwise
/// [`BundleError::AmbiguousCleanRequest`].
pub fn clean(
    registry: &BundleRegistry,
    env: &Environment,
    name: &str,
    before: Option<Timestamp>,
    after: Option<Timestamp>,
    keep_last: Option<usize>,
) -> Result<CleanReport, BundleError> {
    let policy = RetentionPolicy::from_options(before, after, keep_last)?;
    clean_with_policy(registry, env, name, policy)
}

/// Remove snapshots of `name` selected by `policy`.
///
/// Each snapshot is removed independently; a failure is recorded in the
/// report and does not stop the others. A snapshot counts as removed once its
/// tombstone rename succeeds. A tombstone that cannot be deleted afterwards is
/// only logged.
pub fn clean_with_policy(
    registry: &BundleRegistry,
    env: &Environment,
    name: &str,
    policy: RetentionPolicy,
) -> Result<CleanReport, BundleError> {
    let snapshots = ingestions_for_bundle(registry, env, name)?;
    let bundle_root = env.bundle_root(name);
    let mut report = CleanReport::default();

    for timestamp in policy.select(&snapshots) {
        let path = env.snapshot_path(name, timestamp);
        let tombstone = bundle_root.join(format!("{TOMBSTONE_PREFIX}{}", timestamp.to_dirname()));
        match fs::rename(&path, &tombstone) {
            Ok(()) => {
                info!(bundle = name, %timestamp, "removed ingestion");
                report.removed.insert(timestamp);
                if let Err(e) = fs::remove_dir_all(&tombstone) {
                    warn!(bundle = name, path = %tombstone.display(), "failed to delete removed ingestion: {e}");
                }
            }
            // Already removed by someone else.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(bundle = name, %timestamp, "ingestion vanished before removal");
            }
            Err(error) => {
                warn!(bundle = name, %timestamp, path = %path.display(), "failed to remove ingestion: {error}");
                report.failed.push(CleanFailure {
                    timestamp,
                    path,
                    error,
                });
            }
        }
    }

    Ok(report)
}
