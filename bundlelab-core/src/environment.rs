//! Ingestion environment: bundle root, variables and calendars.
//!
//! Layout under the root:
//! - `{root}/{bundle}/{encoded-timestamp}/`: published snapshots
//! - `{root}/{bundle}/.staging-*`: in-flight ingestions
//! - `{root}/.cache/{bundle}/`: per-bundle download cache
//! - `{root}/.cache/.{bundle}.lock`: advisory lock on that cache

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::calendar::CalendarRegistry;
use crate::error::IngestError;
use crate::timestamp::Timestamp;

/// Variable naming the bundle root when none is configured.
pub const ROOT_ENV_VAR: &str = "BUNDLELAB_ROOT";

const CACHE_DIR_NAME: &str = ".cache";

/// Everything an operation needs besides the registry.
#[derive(Debug, Clone)]
pub struct Environment {
    root: PathBuf,
    vars: BTreeMap<String, String>,
    calendars: CalendarRegistry,
}

impl Environment {
    /// Environment rooted at `root` with no variables and the default calendars.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            vars: BTreeMap::new(),
            calendars: CalendarRegistry::with_defaults(),
        }
    }

    /// Environment rooted at `root` that sees the process environment variables.
    pub fn from_process(root: impl Into<PathBuf>) -> Self {
        let mut env = Self::new(root);
        env.vars.extend(std::env::vars());
        env
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_calendars(mut self, calendars: CalendarRegistry) -> Self {
        self.calendars = calendars;
        self
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Like [`Environment::var`], but missing or blank values are an ingest error.
    pub fn require_var(&self, key: &str) -> Result<&str, IngestError> {
        match self.var(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(IngestError::MissingEnvironment(key.to_string())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every snapshot of `bundle`.
    pub fn bundle_root(&self, bundle: &str) -> PathBuf {
        self.root.join(bundle)
    }

    /// Final path of the snapshot of `bundle` taken at `ts`.
    pub fn snapshot_path(&self, bundle: &str, ts: Timestamp) -> PathBuf {
        self.bundle_root(bundle).join(ts.to_dirname())
    }

    /// Download cache of `bundle`; survives failed ingestions.
    pub fn cache_dir(&self, bundle: &str) -> PathBuf {
        self.root.join(CACHE_DIR_NAME).join(bundle)
    }

    /// Lock file guarding the download cache of `bundle`. Bundle names never
    /// start with `.`, so it cannot collide with another bundle's cache.
    pub fn cache_lock_path(&self, bundle: &str) -> PathBuf {
        self.root.join(CACHE_DIR_NAME).join(format!(".{bundle}.lock"))
    }

    pub fn calendars(&self) -> &CalendarRegistry {
        &self.calendars
    }
}

/// Bundle root used when neither the CLI nor the config names one:
/// `$BUNDLELAB_ROOT`, else `~/.bundlelab`.
pub fn default_root() -> PathBuf {
    if let Some(root) = std::env::var_os(ROOT_ENV_VAR).filter(|v| !v.is_empty()) {
        return PathBuf::from(root);
    }
    dirs::home_dir()
        .map(|home| home.join(".bundlelab"))
        .unwrap_or_else(|| PathBuf::from(".bundlelab"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_layout() {
        let env = Environment::new("/data/bundles");
        let ts = Timestamp::from_unix(0).unwrap();
        assert_eq!(env.bundle_root("alpha"), PathBuf::from("/data/bundles/alpha"));
        assert_eq!(
            env.snapshot_path("alpha", ts),
            PathBuf::from("/data/bundles/alpha/1970-01-01T00;00;00.000000")
        );
        assert_eq!(
            env.cache_dir("alpha"),
            PathBuf::from("/data/bundles/.cache/alpha")
        );
        assert_eq!(
            env.cache_lock_path("alpha"),
            PathBuf::from("/data/bundles/.cache/.alpha.lock")
        );
    }

    #[test]
    fn require_var_rejects_blank() {
        let env = Environment::new("/tmp").with_var("API_KEY", "  ");
        assert!(matches!(
            env.require_var("API_KEY"),
            Err(IngestError::MissingEnvironment(k)) if k == "API_KEY"
        ));
        let env = env.with_var("API_KEY", "secret");
        assert_eq!(env.require_var("API_KEY").unwrap(), "secret");
    }
}
