//! Integration tests for the built-in `csvdir` source.

use std::fs;
use std::path::Path;

use bundlelab_core::config::{register_configured_bundles, BundleLabConfig};
use bundlelab_core::sources::CSVDIR_ENV_VAR;
use bundlelab_core::{
    ingest, load, register_builtin_bundles, BundleError, BundleRegistry, Environment,
    IngestError, IngestOptions, Timestamp,
};
use chrono::NaiveDate;

fn write_fixture(dir: &Path) {
    fs::create_dir_all(dir.join("daily")).unwrap();
    fs::create_dir_all(dir.join("minute")).unwrap();
    fs::write(
        dir.join("daily/MSFT.csv"),
        "date,open,high,low,close,volume,dividend,split\n\
         2024-01-02,370.0,375.0,366.5,370.9,25258600,0.0,1.0\n\
         2024-01-03,369.0,373.3,368.5,370.6,23083500,0.0,1.0\n\
         2024-01-04,370.7,373.1,367.2,368.0,20901500,0.75,1.0\n",
    )
    .unwrap();
    fs::write(
        dir.join("daily/AAPL.csv"),
        "date,open,high,low,close,volume,dividend,split\n\
         2024-01-02,187.2,188.4,183.9,185.6,82488700,0.0,1.0\n\
         2024-01-03,184.2,185.9,183.4,184.3,58414500,0.0,4.0\n\
         2024-01-06,184.2,185.9,183.4,184.3,58414500,0.0,1.0\n",
    )
    .unwrap();
    fs::write(
        dir.join("minute/AAPL.csv"),
        "date,open,high,low,close,volume\n\
         2024-01-02 14:30:00,187.2,187.5,187.0,187.4,120000\n\
         2024-01-02 14:31:00,187.4,187.9,187.3,187.8,95000\n",
    )
    .unwrap();
}

#[test]
fn csvdir_bundle_ingests_and_loads() {
    let csv = tempfile::tempdir().unwrap();
    write_fixture(csv.path());

    let root = tempfile::tempdir().unwrap();
    let env = Environment::new(root.path())
        .with_var(CSVDIR_ENV_VAR, csv.path().to_string_lossy().into_owned());
    let registry = BundleRegistry::new();
    register_builtin_bundles(&registry).unwrap();

    let ts = Timestamp::from_unix(1_704_500_000).unwrap();
    ingest(&registry, &env, "csvdir", IngestOptions::at(ts)).unwrap();
    let data = load(&registry, &env, "csvdir", None).unwrap();
    assert_eq!(data.manifest().source, "csvdir");

    // Sids follow sorted symbols.
    let assets = data.asset_reader();
    assert_eq!(assets.lookup_symbol("AAPL").unwrap().sid, 0);
    assert_eq!(assets.lookup_symbol("MSFT").unwrap().sid, 1);
    assert_eq!(
        assets.retrieve(1).unwrap().end_date,
        NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()
    );

    // The Saturday row is dropped.
    let daily = data.daily_bar_reader();
    assert_eq!(daily.sids(), &[0, 1]);
    assert_eq!(daily.load(0).unwrap().len(), 2);
    assert_eq!(daily.load(1).unwrap().len(), 3);
    assert_eq!(daily.bar_count(), 5);

    let minute = data.minute_bar_reader();
    assert_eq!(minute.sids(), &[0]);
    assert_eq!(minute.load(0).unwrap()[1].close, 187.8);

    let adjustments = data.adjustment_reader();
    assert_eq!(adjustments.splits_for(0)[0].ratio, 0.25);
    assert_eq!(adjustments.dividends_for(1)[0].amount, 0.75);
    assert!(adjustments.dividends_for(0).is_empty());
}

#[test]
fn malformed_csv_fails_without_snapshot() {
    let csv = tempfile::tempdir().unwrap();
    fs::create_dir_all(csv.path().join("daily")).unwrap();
    fs::write(
        csv.path().join("daily/BAD.csv"),
        "date,open,high,low,close,volume\n2024-01-02,abc,1,1,1,1\n",
    )
    .unwrap();

    let root = tempfile::tempdir().unwrap();
    let env = Environment::new(root.path());
    let config = BundleLabConfig::from_toml(&format!(
        "[[bundle]]\nname = \"bad\"\nsource = \"csvdir\"\npath = {:?}\n",
        csv.path().to_string_lossy()
    ))
    .unwrap();
    let registry = BundleRegistry::new();
    register_configured_bundles(&registry, &config).unwrap();

    let err = ingest(&registry, &env, "bad", IngestOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        BundleError::Ingest {
            source: IngestError::Csv(_),
            ..
        }
    ));
    assert!(bundlelab_core::ingestions_for_bundle(&registry, &env, "bad")
        .unwrap()
        .is_empty());
}
