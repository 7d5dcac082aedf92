//! Bundle registry: bundle name → [`BundleSpec`].
//!
//! The registry is an ordinary value built once at startup and passed by
//! reference to every operation. Built-in sources join it through an explicit
//! call ([`crate::sources::register_builtin_bundles`]), never as a side effect
//! of linking a module.
//!
//! Re-registering a name replaces the previous spec: last registration wins.
//! Ingestions already running keep the `Arc<BundleSpec>` they resolved at
//! start, so they finish under the old spec.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::StorageFormat;
use crate::error::BundleError;
use crate::pipeline::IngestRoutine;
use crate::storage::ParquetStorage;

pub const DEFAULT_CALENDAR: &str = "NYSE";
pub const DEFAULT_MINUTES_PER_DAY: u32 = 390;

/// Who registered a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleOrigin {
    /// Registered by [`crate::sources::register_builtin_bundles`].
    BuiltIn,
    /// Registered by the application or its config file.
    User,
}

/// Everything needed to ingest a bundle.
#[derive(Clone)]
pub struct BundleSpec {
    name: String,
    routine: Arc<dyn IngestRoutine>,
    calendar_name: String,
    start_session: Option<NaiveDate>,
    end_session: Option<NaiveDate>,
    minutes_per_day: u32,
    storage: Arc<dyn StorageFormat>,
    origin: BundleOrigin,
}

impl BundleSpec {
    /// A user bundle on the `NYSE` calendar, stored with [`ParquetStorage`].
    pub fn new(name: impl Into<String>, routine: Arc<dyn IngestRoutine>) -> Self {
        Self {
            name: name.into(),
            routine,
            calendar_name: DEFAULT_CALENDAR.to_string(),
            start_session: None,
            end_session: None,
            minutes_per_day: DEFAULT_MINUTES_PER_DAY,
            storage: Arc::new(ParquetStorage),
            origin: BundleOrigin::User,
        }
    }

    pub fn calendar(mut self, calendar_name: impl Into<String>) -> Self {
        self.calendar_name = calendar_name.into();
        self
    }

    /// Default first session; `None` means the calendar's first session.
    pub fn start_session(mut self, start: Option<NaiveDate>) -> Self {
        self.start_session = start;
        self
    }

    /// Default last session; `None` means the calendar's last session.
    pub fn end_session(mut self, end: Option<NaiveDate>) -> Self {
        self.end_session = end;
        self
    }

    pub fn minutes_per_day(mut self, minutes: u32) -> Self {
        self.minutes_per_day = minutes;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageFormat>) -> Self {
        self.storage = storage;
        self
    }

    pub fn origin(mut self, origin: BundleOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn routine(&self) -> &dyn IngestRoutine {
        self.routine.as_ref()
    }

    pub fn calendar_name(&self) -> &str {
        &self.calendar_name
    }

    pub fn default_start(&self) -> Option<NaiveDate> {
        self.start_session
    }

    pub fn default_end(&self) -> Option<NaiveDate> {
        self.end_session
    }

    pub fn minutes(&self) -> u32 {
        self.minutes_per_day
    }

    pub fn storage_format(&self) -> &dyn StorageFormat {
        self.storage.as_ref()
    }

    pub fn bundle_origin(&self) -> BundleOrigin {
        self.origin
    }
}

impl fmt::Debug for BundleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleSpec")
            .field("name", &self.name)
            .field("source", &self.routine.source_name())
            .field("calendar_name", &self.calendar_name)
            .field("start_session", &self.start_session)
            .field("end_session", &self.end_session)
            .field("minutes_per_day", &self.minutes_per_day)
            .field("storage", &self.storage.name())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Bundle names become directory names, so they must be a single plain path
/// component.
pub fn validate_bundle_name(name: &str) -> Result<(), BundleError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.starts_with('.') {
        Some("name starts with '.'")
    } else if name.contains(['/', '\\', '\0']) {
        Some("name contains a path separator")
    } else if name.trim() != name {
        Some("name has surrounding whitespace")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(BundleError::InvalidBundleName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Process-wide table of registered bundles.
///
/// Every access holds one mutex for the duration of an in-memory map
/// operation only; no filesystem work happens under the lock.
#[derive(Default)]
pub struct BundleRegistry {
    bundles: Mutex<BTreeMap<String, Arc<BundleSpec>>>,
}

impl BundleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<BundleSpec>>> {
        self.bundles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `spec`, replacing any bundle with the same name.
    ///
    /// Returns the replaced spec, if any.
    pub fn register(&self, spec: BundleSpec) -> Result<Option<Arc<BundleSpec>>, BundleError> {
        validate_bundle_name(spec.name())?;
        let name = spec.name().to_string();
        let previous = self.lock().insert(name.clone(), Arc::new(spec));
        match &previous {
            Some(_) => warn!(bundle = %name, "overwriting bundle with name '{name}'"),
            None => debug!(bundle = %name, "registered bundle"),
        }
        Ok(previous)
    }

    /// Remove the bundle called `name`.
    pub fn unregister(&self, name: &str) -> Result<Arc<BundleSpec>, BundleError> {
        self.lock()
            .remove(name)
            .ok_or_else(|| BundleError::unknown_bundle(name))
    }

    /// Names of all registered bundles, copied out of the table.
    pub fn bundles(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<BundleSpec>, BundleError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| BundleError::unknown_bundle(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleRegistry")
            .field("bundles", &self.bundles())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::pipeline::IngestContext;

    fn noop() -> Arc<dyn IngestRoutine> {
        Arc::new(|_: &mut IngestContext<'_>| -> Result<(), IngestError> { Ok(()) })
    }

    #[test]
    fn register_then_unregister() {
        let registry = BundleRegistry::new();
        registry.register(BundleSpec::new("alpha", noop())).unwrap();
        assert!(registry.bundles().contains("alpha"));

        registry.unregister("alpha").unwrap();
        assert!(!registry.bundles().contains("alpha"));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_unknown_fails() {
        let registry = BundleRegistry::new();
        assert!(matches!(
            registry.unregister("ghost"),
            Err(BundleError::UnknownBundle { name }) if name == "ghost"
        ));
    }

    #[test]
    fn last_registration_wins() {
        let registry = BundleRegistry::new();
        let first = registry
            .register(BundleSpec::new("alpha", noop()).calendar("NYSE"))
            .unwrap();
        assert!(first.is_none());

        let replaced = registry
            .register(BundleSpec::new("alpha", noop()).calendar("24/7"))
            .unwrap()
            .expect("second registration replaces the first");
        assert_eq!(replaced.calendar_name(), "NYSE");
        assert_eq!(registry.get("alpha").unwrap().calendar_name(), "24/7");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn bundles_is_a_copy() {
        let registry = BundleRegistry::new();
        registry.register(BundleSpec::new("alpha", noop())).unwrap();
        let names = registry.bundles();
        registry.register(BundleSpec::new("beta", noop())).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(registry.bundles().len(), 2);
    }

    #[test]
    fn rejects_unsafe_names() {
        let registry = BundleRegistry::new();
        for name in ["", ".cache", "a/b", "a\\b", " alpha"] {
            assert!(
                matches!(
                    registry.register(BundleSpec::new(name, noop())),
                    Err(BundleError::InvalidBundleName { .. })
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn spec_defaults() {
        let spec = BundleSpec::new("alpha", noop());
        assert_eq!(spec.calendar_name(), DEFAULT_CALENDAR);
        assert_eq!(spec.minutes(), DEFAULT_MINUTES_PER_DAY);
        assert_eq!(spec.bundle_origin(), BundleOrigin::User);
        assert_eq!(spec.storage_format().name(), "parquet");
        assert!(spec.default_start().is_none());
    }
}
