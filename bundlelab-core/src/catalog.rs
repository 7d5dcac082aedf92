//! Ingestion catalog: which snapshots of a bundle exist on disk.

use std::fs;
use std::io;

use tracing::debug;

use crate::codec;
use crate::environment::Environment;
use crate::error::BundleError;
use crate::registry::BundleRegistry;
use crate::timestamp::Timestamp;

/// Timestamps of every published snapshot of `name`, newest first.
///
/// Entries of the bundle root that are not directories or whose names do not
/// decode (staging leftovers, foreign files) are skipped. A bundle that was
/// never ingested has no snapshots; that is not an error.
pub fn ingestions_for_bundle(
    registry: &BundleRegistry,
    env: &Environment,
    name: &str,
) -> Result<Vec<Timestamp>, BundleError> {
    registry.get(name)?;

    let bundle_root = env.bundle_root(name);
    let entries = match fs::read_dir(&bundle_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BundleError::io(&bundle_root, e)),
    };

    let mut timestamps = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BundleError::io(&bundle_root, e))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            debug!(bundle = name, entry = ?entry.file_name(), "skipping non-UTF-8 entry");
            continue;
        };
        // A snapshot removed between read_dir and here is simply gone.
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            debug!(bundle = name, entry = file_name, "skipping non-directory entry");
            continue;
        }
        match codec::decode(file_name) {
            Ok(ts) => timestamps.push(ts),
            Err(e) => debug!(bundle = name, entry = file_name, "skipping entry: {e}"),
        }
    }

    timestamps.sort_unstable_by(|a, b| b.cmp(a));
    Ok(timestamps)
}

/// The newest snapshot of `name` taken at or before `as_of`.
pub fn most_recent_ingestion(
    registry: &BundleRegistry,
    env: &Environment,
    name: &str,
    as_of: Timestamp,
) -> Result<Option<Timestamp>, BundleError> {
    Ok(ingestions_for_bundle(registry, env, name)?
        .into_iter()
        .find(|ts| *ts <= as_of))
}
