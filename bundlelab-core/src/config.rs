//! TOML configuration: bundle root, logging and user bundle declarations.
//!
//! ```toml
//! root = "/data/bundles"
//!
//! [log]
//! level = "debug"
//! format = "json"
//!
//! [[bundle]]
//! name = "prices"
//! source = "csvdir"
//! path = "/data/csv"
//! calendar = "NYSE"
//! start_session = "2015-01-02"
//!
//! [[bundle]]
//! name = "megacaps"
//! source = "yahoo"
//! symbols = ["AAPL", "MSFT"]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::environment::default_root;
use crate::error::BundleError;
use crate::pipeline::IngestRoutine;
use crate::registry::{BundleOrigin, BundleRegistry, BundleSpec, DEFAULT_CALENDAR};
use crate::sources::{CsvDirSource, YahooSource};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive for the bundle library, e.g. `info` or `debug`.
    pub level: Option<String>,
    pub format: LogFormat,
}

/// Data source of a configured bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Csvdir,
    Yahoo,
}

/// One `[[bundle]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    pub name: String,
    pub source: SourceKind,
    #[serde(default)]
    pub calendar: Option<String>,
    #[serde(default)]
    pub start_session: Option<NaiveDate>,
    #[serde(default)]
    pub end_session: Option<NaiveDate>,
    #[serde(default)]
    pub minutes_per_day: Option<u32>,
    /// CSV directory (`csvdir` only). Falls back to `$CSVDIR`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Symbols to fetch (`yahoo` only). Falls back to `$YAHOO_SYMBOLS`.
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
}

impl BundleConfig {
    fn routine(&self) -> Result<Arc<dyn IngestRoutine>, BundleError> {
        match self.source {
            SourceKind::Csvdir => {
                if self.symbols.is_some() {
                    return Err(self.invalid("'symbols' only applies to yahoo bundles"));
                }
                Ok(Arc::new(match &self.path {
                    Some(path) => CsvDirSource::new(path),
                    None => CsvDirSource::from_env(),
                }))
            }
            SourceKind::Yahoo => {
                if self.path.is_some() {
                    return Err(self.invalid("'path' only applies to csvdir bundles"));
                }
                Ok(Arc::new(match &self.symbols {
                    Some(symbols) => YahooSource::new(symbols.iter().cloned()),
                    None => YahooSource::from_env(),
                }))
            }
        }
    }

    fn invalid(&self, reason: &str) -> BundleError {
        BundleError::Config(format!("bundle '{}': {reason}", self.name))
    }

    /// The registry entry this declaration describes.
    pub fn to_spec(&self) -> Result<BundleSpec, BundleError> {
        if let (Some(start), Some(end)) = (self.start_session, self.end_session) {
            if start > end {
                return Err(self.invalid("start_session is after end_session"));
            }
        }
        let mut spec = BundleSpec::new(self.name.clone(), self.routine()?)
            .calendar(self.calendar.as_deref().unwrap_or(DEFAULT_CALENDAR))
            .start_session(self.start_session)
            .end_session(self.end_session)
            .origin(BundleOrigin::User);
        if let Some(minutes) = self.minutes_per_day {
            if minutes == 0 {
                return Err(self.invalid("minutes_per_day must be positive"));
            }
            spec = spec.minutes_per_day(minutes);
        }
        Ok(spec)
    }
}

/// The complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleLabConfig {
    pub root: Option<PathBuf>,
    pub log: LogConfig,
    #[serde(rename = "bundle")]
    pub bundles: Vec<BundleConfig>,
}

impl BundleLabConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, BundleError> {
        let content = std::fs::read_to_string(path).map_err(|e| BundleError::io(path, e))?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, BundleError> {
        toml::from_str(content).map_err(|e| BundleError::Config(format!("parse config TOML: {e}")))
    }

    pub fn to_toml(&self) -> Result<String, BundleError> {
        toml::to_string_pretty(self).map_err(|e| BundleError::Config(format!("serialize config: {e}")))
    }

    /// Bundle root: `cli_root`, else the config's `root`, else
    /// [`default_root`].
    pub fn resolve_root(&self, cli_root: Option<&Path>) -> PathBuf {
        cli_root
            .map(Path::to_path_buf)
            .or_else(|| self.root.clone())
            .unwrap_or_else(default_root)
    }
}

/// Register every `[[bundle]]` of `config` as a user bundle.
///
/// Declarations are validated up front; on error nothing is registered.
pub fn register_configured_bundles(
    registry: &BundleRegistry,
    config: &BundleLabConfig,
) -> Result<usize, BundleError> {
    let specs = config
        .bundles
        .iter()
        .map(BundleConfig::to_spec)
        .collect::<Result<Vec<_>, _>>()?;
    for spec in &specs {
        crate::registry::validate_bundle_name(spec.name())?;
    }
    let count = specs.len();
    for spec in specs {
        registry.register(spec)?;
    }
    Ok(count)
}
