//! Concurrent operations on one bundle root.

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use bundlelab_core::{
    ingest, ingestions_for_bundle, load, routine_fn, BundleError, BundleRegistry, BundleSpec,
    Environment, IngestOptions, Timestamp,
};

const RACERS: usize = 4;

fn ts(secs: i64) -> Timestamp {
    Timestamp::from_unix(secs).unwrap()
}

/// A bundle whose routine blocks until `RACERS` ingestions are staged.
fn racing_registry() -> BundleRegistry {
    let barrier = Arc::new(Barrier::new(RACERS));
    let registry = BundleRegistry::new();
    registry
        .register(BundleSpec::new(
            "alpha",
            routine_fn(move |_| {
                barrier.wait();
                Ok(())
            }),
        ))
        .unwrap();
    registry
}

#[test]
fn same_timestamp_publishes_exactly_once() {
    let root = tempfile::tempdir().unwrap();
    let env = Environment::new(root.path());
    let registry = racing_registry();
    let target = ts(100);

    let results: Vec<Result<Timestamp, BundleError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..RACERS)
            .map(|_| s.spawn(|| ingest(&registry, &env, "alpha", IngestOptions::at(target))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "results: {results:?}");
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, BundleError::IngestionExists { timestamp, .. } if *timestamp == target),
                "unexpected error: {e}"
            );
        }
    }

    assert_eq!(
        ingestions_for_bundle(&registry, &env, "alpha").unwrap(),
        vec![target]
    );
    // The winner's snapshot is intact and no staging directory survives.
    load(&registry, &env, "alpha", Some(target)).unwrap();
    let entries: Vec<String> = fs::read_dir(env.bundle_root("alpha"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec![target.to_dirname()]);
}

#[test]
fn distinct_timestamps_do_not_interfere() {
    let root = tempfile::tempdir().unwrap();
    let env = Environment::new(root.path());
    let registry = racing_registry();

    thread::scope(|s| {
        let handles: Vec<_> = (0..RACERS)
            .map(|i| {
                let (registry, env) = (&registry, &env);
                s.spawn(move || {
                    ingest(registry, env, "alpha", IngestOptions::at(ts(100 * (i as i64 + 1))))
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
    });

    assert_eq!(
        ingestions_for_bundle(&registry, &env, "alpha").unwrap(),
        vec![ts(400), ts(300), ts(200), ts(100)]
    );
}

#[test]
fn cache_survives_until_the_last_ingestion_publishes() {
    let root = tempfile::tempdir().unwrap();
    let env = Environment::new(root.path());
    let barrier = Arc::new(Barrier::new(2));
    let registry = BundleRegistry::new();
    registry
        .register(BundleSpec::new(
            "alpha",
            routine_fn(move |ctx| {
                let own = ctx.cache_dir().join(format!("{}.json", ctx.timestamp().to_dirname()));
                fs::write(own, "{}")?;
                barrier.wait();
                if ctx.timestamp() == ts(200) {
                    // Keep downloading after the other ingestion has published.
                    let other = ctx.environment().snapshot_path("alpha", ts(100));
                    let deadline = Instant::now() + Duration::from_secs(10);
                    while !other.exists() {
                        assert!(Instant::now() < deadline, "ts(100) never published");
                        thread::sleep(Duration::from_millis(10));
                    }
                    fs::write(ctx.cache_dir().join("AAPL.json"), "{}")?;
                }
                Ok(())
            }),
        ))
        .unwrap();

    let results: Vec<Result<Timestamp, BundleError>> = thread::scope(|s| {
        let handles: Vec<_> = [ts(100), ts(200)]
            .into_iter()
            .map(|at| {
                let (registry, env) = (&registry, &env);
                s.spawn(move || ingest(registry, env, "alpha", IngestOptions::at(at)))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.iter().all(Result::is_ok), "results: {results:?}");
    assert_eq!(
        ingestions_for_bundle(&registry, &env, "alpha").unwrap(),
        vec![ts(200), ts(100)]
    );
    // The last ingestion to finish cleans up.
    assert!(!env.cache_dir("alpha").exists());
}

#[test]
fn registry_is_shared_across_threads() {
    let registry = BundleRegistry::new();
    thread::scope(|s| {
        for i in 0..8 {
            let registry = &registry;
            s.spawn(move || {
                let name = format!("bundle{i}");
                registry
                    .register(BundleSpec::new(name.clone(), routine_fn(|_| Ok(()))))
                    .unwrap();
                assert!(registry.bundles().contains(&name));
            });
        }
    });
    assert_eq!(registry.len(), 8);
}
