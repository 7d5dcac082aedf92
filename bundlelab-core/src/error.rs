//! Structured error types for bundle operations.
//!
//! Three layers, each displayable in both CLI and library contexts:
//! - [`StoreError`]: an artifact writer or reader failed.
//! - [`IngestError`]: an ingest routine failed. It travels unchanged inside
//!   [`BundleError::Ingest`].
//! - [`BundleError`]: everything the registry, pipeline, catalog, loader and
//!   cleaner surface to callers.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::timestamp::Timestamp;

/// Errors from the registry, pipeline, catalog, loader and cleaner.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("no bundle registered with the name '{name}'")]
    UnknownBundle { name: String },

    #[error("no ingestion of bundle '{bundle}' {}", describe_requested(.timestamp))]
    MissingIngestion {
        bundle: String,
        timestamp: Option<Timestamp>,
    },

    #[error("ingestion {timestamp} of bundle '{bundle}' is corrupt: artifact '{artifact}' failed to open: {reason}")]
    CorruptIngestion {
        bundle: String,
        timestamp: Timestamp,
        artifact: String,
        reason: String,
    },

    #[error("'{0}' is not an ingestion directory name")]
    InvalidDirname(String),

    #[error("clean requires exactly one of --before, --after or --keep-last ({modes} given)")]
    AmbiguousCleanRequest { modes: usize },

    #[error("invalid bundle name '{name}': {reason}")]
    InvalidBundleName { name: String, reason: &'static str },

    #[error("no calendar registered with the name '{0}'")]
    UnknownCalendar(String),

    #[error("calendar '{calendar}' has no sessions between {start} and {end}")]
    EmptySessionRange {
        calendar: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("timestamp out of supported range: {0}")]
    TimestampOutOfRange(String),

    #[error("ingestion {timestamp} of bundle '{bundle}' already exists")]
    IngestionExists { bundle: String, timestamp: Timestamp },

    #[error("ingest of bundle '{bundle}' failed: {source}")]
    Ingest {
        bundle: String,
        #[source]
        source: IngestError,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl BundleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BundleError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unknown_bundle(name: &str) -> Self {
        BundleError::UnknownBundle {
            name: name.to_string(),
        }
    }
}

fn describe_requested(timestamp: &Option<Timestamp>) -> String {
    match timestamp {
        Some(ts) => format!("at {ts}"),
        None => "exists (run `ingest` first)".to_string(),
    }
}

/// Errors an ingest routine may return.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("missing environment variable '{0}'")]
    MissingEnvironment(String),

    #[error("{0}")]
    Source(String),
}

/// Errors from artifact writers and readers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store metadata missing at {}", .0.display())]
    MissingSidecar(PathBuf),

    #[error("store holds '{found}' data, expected '{expected}'")]
    KindMismatch { expected: String, found: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = BundleError> = std::result::Result<T, E>;
