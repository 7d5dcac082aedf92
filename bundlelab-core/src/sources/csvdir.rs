//! `csvdir` source: one CSV file per symbol and frequency.
//!
//! Layout: `{dir}/daily/{SYMBOL}.csv` and `{dir}/minute/{SYMBOL}.csv`, with
//! columns `date,open,high,low,close,volume[,dividend,split]`. Either
//! subdirectory may be absent. Sids are assigned by sorted symbol, starting
//! at 0. Bars outside the ingestion's sessions are dropped.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::debug;

use crate::artifact::{Adjustments, Asset, Bar, BarFrequency, Dividend, Split};
use crate::calendar::SessionRange;
use crate::error::IngestError;
use crate::pipeline::{IngestContext, IngestRoutine};

/// Variable naming the CSV directory when the source has none configured.
pub const CSVDIR_ENV_VAR: &str = "CSVDIR";

const EXCHANGE: &str = "CSVDIR";

/// Ingest routine reading a directory of per-symbol CSV files.
#[derive(Debug, Clone, Default)]
pub struct CsvDirSource {
    dir: Option<PathBuf>,
}

impl CsvDirSource {
    /// Read from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Read from the directory named by `$CSVDIR` at ingest time.
    pub fn from_env() -> Self {
        Self { dir: None }
    }

    fn resolve_dir(&self, ctx: &IngestContext<'_>) -> Result<PathBuf, IngestError> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from(ctx.environment().require_var(CSVDIR_ENV_VAR)?),
        };
        if !dir.is_dir() {
            return Err(IngestError::Source(format!(
                "csv directory {} does not exist",
                dir.display()
            )));
        }
        Ok(dir)
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    dividend: Option<f64>,
    #[serde(default)]
    split: Option<f64>,
}

#[derive(Debug, Clone)]
struct CsvFile {
    frequency: BarFrequency,
    symbol: String,
    path: PathBuf,
}

#[derive(Debug)]
struct ParsedFile {
    frequency: BarFrequency,
    symbol: String,
    bars: Vec<Bar>,
    dividends: Vec<(NaiveDate, f64)>,
    splits: Vec<(NaiveDate, f64)>,
    dropped: usize,
}

fn subdir(frequency: BarFrequency) -> &'static str {
    match frequency {
        BarFrequency::Daily => "daily",
        BarFrequency::Minute => "minute",
    }
}

/// Every `*.csv` under the frequency subdirectories, sorted by path.
fn discover(dir: &Path) -> Result<Vec<CsvFile>, IngestError> {
    let mut files = Vec::new();
    for frequency in [BarFrequency::Daily, BarFrequency::Minute] {
        let sub = dir.join(subdir(frequency));
        if !sub.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&sub)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(symbol) = path.file_stem().and_then(|s| s.to_str()) {
                files.push(CsvFile {
                    frequency,
                    symbol: symbol.to_string(),
                    path: path.clone(),
                });
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::default()))
}

fn parse_file(file: &CsvFile, sessions: &SessionRange) -> Result<ParsedFile, IngestError> {
    let mut reader = csv::Reader::from_path(&file.path)?;
    let mut parsed = ParsedFile {
        frequency: file.frequency,
        symbol: file.symbol.clone(),
        bars: Vec::new(),
        dividends: Vec::new(),
        splits: Vec::new(),
        dropped: 0,
    };

    for row in reader.deserialize() {
        let row: CsvRow = row?;
        let mut dt = parse_datetime(&row.date).ok_or_else(|| {
            IngestError::Source(format!(
                "{}: unparsable date '{}'",
                file.path.display(),
                row.date
            ))
        })?;
        if file.frequency == BarFrequency::Daily {
            dt = dt.date().and_time(NaiveTime::default());
        }
        if !sessions.contains_session(dt.date()) {
            parsed.dropped += 1;
            continue;
        }

        if let Some(amount) = row.dividend.filter(|a| *a > 0.0) {
            parsed.dividends.push((dt.date(), amount));
        }
        if let Some(split) = row.split.filter(|s| *s != 1.0 && *s > 0.0) {
            parsed.splits.push((dt.date(), 1.0 / split));
        }
        parsed.bars.push(Bar {
            dt,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.max(0.0).round() as u64,
        });
    }

    parsed.bars.sort_by_key(|b| b.dt);
    parsed.bars.dedup_by_key(|b| b.dt);
    Ok(parsed)
}

impl IngestRoutine for CsvDirSource {
    fn source_name(&self) -> &str {
        "csvdir"
    }

    fn ingest(&self, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let dir = self.resolve_dir(ctx)?;
        let files = discover(&dir)?;
        if files.is_empty() {
            return Err(IngestError::Source(format!(
                "no csv files under {}/daily or {}/minute",
                dir.display(),
                dir.display()
            )));
        }

        let symbols: BTreeSet<&str> = files.iter().map(|f| f.symbol.as_str()).collect();
        let symbols: Vec<String> = symbols.into_iter().map(str::to_string).collect();
        let sid_of = |symbol: &str| -> Result<u32, IngestError> {
            let index = symbols
                .binary_search_by(|s| s.as_str().cmp(symbol))
                .map_err(|_| IngestError::Source(format!("unknown symbol {symbol}")))?;
            u32::try_from(index).map_err(|_| IngestError::Source("too many symbols".into()))
        };

        let sessions = ctx.sessions().clone();
        let parsed: Vec<ParsedFile> = files
            .par_iter()
            .map(|file| parse_file(file, &sessions))
            .collect::<Result<_, _>>()?;

        let bundle = ctx.bundle().to_string();
        ctx.progress().on_start(&bundle, parsed.len());

        let mut spans: Vec<Option<(NaiveDate, NaiveDate)>> = vec![None; symbols.len()];
        let mut adjustments = Adjustments::default();
        for (done, file) in parsed.iter().enumerate() {
            let sid = sid_of(&file.symbol)?;
            if file.dropped > 0 {
                debug!(
                    symbol = %file.symbol,
                    dropped = file.dropped,
                    "dropped rows outside the session range"
                );
            }
            ctx.bar_writer(file.frequency).write(sid, &file.bars)?;

            if let (Some(first), Some(last)) = (file.bars.first(), file.bars.last()) {
                let span = &mut spans[sid as usize];
                let (lo, hi) = span.get_or_insert((first.dt.date(), last.dt.date()));
                *lo = (*lo).min(first.dt.date());
                *hi = (*hi).max(last.dt.date());
            }
            adjustments.dividends.extend(file.dividends.iter().map(|(date, amount)| Dividend {
                sid,
                ex_date: *date,
                record_date: None,
                declared_date: None,
                pay_date: None,
                amount: *amount,
            }));
            adjustments.splits.extend(file.splits.iter().map(|(date, ratio)| Split {
                sid,
                effective_date: *date,
                ratio: *ratio,
            }));

            let item = format!("{}/{}", subdir(file.frequency), file.symbol);
            ctx.progress().on_advance(&bundle, &item, done + 1, parsed.len());
        }

        let assets: Vec<Asset> = symbols
            .iter()
            .zip(&spans)
            .enumerate()
            .map(|(sid, (symbol, span))| {
                let (start_date, end_date) =
                    span.unwrap_or((sessions.start(), sessions.end()));
                Asset {
                    sid: sid as u32,
                    symbol: symbol.clone(),
                    asset_name: symbol.clone(),
                    exchange: EXCHANGE.to_string(),
                    start_date,
                    end_date,
                    auto_close_date: end_date.succ_opt(),
                }
            })
            .collect();

        ctx.asset_writer().write(&assets)?;
        ctx.adjustment_writer().write(&adjustments)?;
        ctx.progress().on_finish(&bundle, parsed.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarRegistry;
    use std::sync::Arc;

    fn sessions() -> SessionRange {
        let calendar = CalendarRegistry::with_defaults().get("NYSE").unwrap();
        SessionRange::resolve(calendar, None, None, 390).unwrap()
    }

    #[test]
    fn parses_dates_in_several_shapes() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(parse_datetime("2024-01-02"), Some(d.and_time(NaiveTime::default())));
        assert_eq!(
            parse_datetime("2024-01-02 14:31:00"),
            d.and_hms_opt(14, 31, 0)
        );
        assert_eq!(parse_datetime("2024-01-02T14:31:00"), d.and_hms_opt(14, 31, 0));
        assert_eq!(parse_datetime("01/02/2024"), None);
    }

    #[test]
    fn parse_file_drops_weekends_and_reads_adjustments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AAPL.csv");
        fs::write(
            &path,
            "date,open,high,low,close,volume,dividend,split\n\
             2024-01-03,11,12,10,11.5,2000,0.24,1.0\n\
             2024-01-02,10,11,9,10.5,1000,0.0,2.0\n\
             2024-01-06,10,11,9,10.5,1000,0.0,1.0\n",
        )
        .unwrap();

        let parsed = parse_file(
            &CsvFile {
                frequency: BarFrequency::Daily,
                symbol: "AAPL".into(),
                path,
            },
            &sessions(),
        )
        .unwrap();

        assert_eq!(parsed.bars.len(), 2);
        assert!(parsed.bars[0].dt < parsed.bars[1].dt);
        assert_eq!(parsed.dropped, 1);
        assert_eq!(parsed.dividends, vec![(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), 0.24)]);
        assert_eq!(parsed.splits, vec![(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 0.5)]);
    }

    #[test]
    fn discover_finds_both_frequencies() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("daily")).unwrap();
        fs::create_dir_all(dir.path().join("minute")).unwrap();
        fs::write(dir.path().join("daily/MSFT.csv"), "").unwrap();
        fs::write(dir.path().join("daily/notes.txt"), "").unwrap();
        fs::write(dir.path().join("minute/MSFT.csv"), "").unwrap();

        let files = discover(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.symbol == "MSFT"));
        assert_eq!(files[0].frequency, BarFrequency::Daily);
    }

    #[test]
    fn missing_variable_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let env = crate::environment::Environment::new(root.path());
        let registry = crate::registry::BundleRegistry::new();
        registry
            .register(crate::registry::BundleSpec::new(
                "csv",
                Arc::new(CsvDirSource::from_env()),
            ))
            .unwrap();

        let err = crate::pipeline::ingest(&registry, &env, "csv", Default::default()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::BundleError::Ingest {
                source: IngestError::MissingEnvironment(ref var),
                ..
            } if var == CSVDIR_ENV_VAR
        ));
    }
}
