//! BundleLab Core: named market-data bundles and their on-disk snapshots.
//!
//! This crate manages the lifecycle of data bundles:
//! - Registry of bundle names to ingest routines, calendars and storage formats
//! - Ingestion pipeline that stages a snapshot privately and publishes it with
//!   one atomic rename
//! - Catalog of published snapshots, keyed by encoded ingestion timestamp
//! - Read-only loader and retention-based cleaner
//! - Built-in `csvdir` and `yahoo` sources, TOML configuration
//!
//! Every operation takes the [`BundleRegistry`] and [`Environment`] it works
//! on explicitly; there is no global state.

pub mod artifact;
pub mod calendar;
pub mod catalog;
pub mod cleaner;
pub mod codec;
pub mod config;
pub mod environment;
pub mod error;
pub mod loader;
mod lock;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod sources;
pub mod storage;
pub mod timestamp;

pub use catalog::{ingestions_for_bundle, most_recent_ingestion};
pub use cleaner::{clean, clean_with_policy, CleanReport, RetentionPolicy};
pub use config::{register_configured_bundles, BundleLabConfig};
pub use environment::Environment;
pub use error::{BundleError, IngestError, StoreError};
pub use loader::{load, BundleData};
pub use pipeline::{
    ingest, ingest_with_progress, routine_fn, IngestContext, IngestOptions, IngestRoutine,
    SnapshotManifest,
};
pub use registry::{BundleOrigin, BundleRegistry, BundleSpec};
pub use sources::register_builtin_bundles;
pub use timestamp::Timestamp;
