//! Built-in data sources.
//!
//! Nothing here registers itself; callers opt in with
//! [`register_builtin_bundles`].

pub mod csvdir;
pub mod yahoo;

use std::sync::Arc;

use crate::error::BundleError;
use crate::registry::{BundleOrigin, BundleRegistry, BundleSpec};

pub use csvdir::{CsvDirSource, CSVDIR_ENV_VAR};
pub use yahoo::{YahooSource, YAHOO_SYMBOLS_ENV_VAR};

/// Register the `csvdir` and `yahoo` bundles, both configured through
/// environment variables at ingest time.
pub fn register_builtin_bundles(registry: &BundleRegistry) -> Result<(), BundleError> {
    registry.register(
        BundleSpec::new("csvdir", Arc::new(CsvDirSource::from_env())).origin(BundleOrigin::BuiltIn),
    )?;
    registry.register(
        BundleSpec::new("yahoo", Arc::new(YahooSource::from_env())).origin(BundleOrigin::BuiltIn),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::environment::Environment;
    use crate::loader::load;
    use crate::pipeline::{ingest, IngestOptions};
    use crate::timestamp::Timestamp;

    #[test]
    fn builtins_are_explicit() {
        let registry = BundleRegistry::new();
        assert!(registry.is_empty());
        register_builtin_bundles(&registry).unwrap();
        let names: Vec<String> = registry.bundles().into_iter().collect();
        assert_eq!(names, vec!["csvdir".to_string(), "yahoo".to_string()]);
        assert_eq!(
            registry.get("yahoo").unwrap().bundle_origin(),
            BundleOrigin::BuiltIn
        );
        assert_eq!(registry.get("csvdir").unwrap().routine().source_name(), "csvdir");
    }

    #[test]
    fn yahoo_ingests_from_cached_responses() {
        let root = tempfile::tempdir().unwrap();
        let env = Environment::new(root.path()).with_var(YAHOO_SYMBOLS_ENV_VAR, "aapl");
        let registry = BundleRegistry::new();
        register_builtin_bundles(&registry).unwrap();

        let cache = env.cache_dir("yahoo");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("AAPL.json"), yahoo::tests::AAPL_CHART).unwrap();

        let ts = Timestamp::from_unix(1_704_400_000).unwrap();
        ingest(&registry, &env, "yahoo", IngestOptions::at(ts)).unwrap();
        assert!(!cache.exists());

        let data = load(&registry, &env, "yahoo", None).unwrap();
        assert_eq!(data.manifest().source, "yahoo");
        let aapl = data.asset_reader().lookup_symbol("AAPL").unwrap();
        assert_eq!(aapl.exchange, "NMS");
        assert_eq!(data.daily_bar_reader().load(aapl.sid).unwrap().len(), 2);
        assert_eq!(data.adjustment_reader().dividends_for(aapl.sid).len(), 1);
        assert_eq!(data.adjustment_reader().splits_for(aapl.sid)[0].ratio, 0.5);
    }
}
