//! Parquet bar store, one file per sid: `{dir}/sid={SID}.parquet`.
//!
//! Writers validate every bar against the ingestion's session range before it
//! reaches disk. Readers check the sidecar on open and validate each file
//! (schema, non-empty) when a sid is loaded.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime};
use polars::prelude::*;

use super::{ensure_dir, read_meta, write_meta, StoreMeta};
use crate::artifact::{Bar, BarFrequency, BarReader, BarWriter};
use crate::calendar::SessionRange;
use crate::error::StoreError;

const COLUMNS: [&str; 6] = ["dt", "open", "high", "low", "close", "volume"];

fn sid_path(dir: &Path, sid: u32) -> PathBuf {
    dir.join(format!("sid={sid}.parquet"))
}

fn parse_sid_file(name: &str) -> Option<u32> {
    name.strip_prefix("sid=")?
        .strip_suffix(".parquet")?
        .parse()
        .ok()
}

pub struct ParquetBarWriter {
    dir: PathBuf,
    frequency: BarFrequency,
    sessions: SessionRange,
    written: BTreeSet<u32>,
    bar_count: usize,
    hasher: blake3::Hasher,
}

impl ParquetBarWriter {
    pub fn create(
        dir: &Path,
        frequency: BarFrequency,
        sessions: SessionRange,
    ) -> Result<Self, StoreError> {
        ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            frequency,
            sessions,
            written: BTreeSet::new(),
            bar_count: 0,
            hasher: blake3::Hasher::new(),
        })
    }

    fn validate(&self, sid: u32, bars: &[Bar]) -> Result<(), StoreError> {
        for pair in bars.windows(2) {
            if pair[0].dt >= pair[1].dt {
                return Err(StoreError::Validation(format!(
                    "bars for sid {sid} not strictly ascending at {}",
                    pair[1].dt
                )));
            }
        }

        let mut per_session: BTreeMap<NaiveDate, u32> = BTreeMap::new();
        for bar in bars {
            let date = bar.dt.date();
            if !self.sessions.contains_session(date) {
                return Err(StoreError::Validation(format!(
                    "bar for sid {sid} at {} is not a {} session in {}..={}",
                    bar.dt,
                    self.sessions.calendar().name(),
                    self.sessions.start(),
                    self.sessions.end()
                )));
            }
            match self.frequency {
                BarFrequency::Daily => {
                    if bar.dt.time() != NaiveTime::default() {
                        return Err(StoreError::Validation(format!(
                            "daily bar for sid {sid} at {} is not at midnight",
                            bar.dt
                        )));
                    }
                }
                BarFrequency::Minute => {
                    let count = per_session.entry(date).or_default();
                    *count += 1;
                    if *count > self.sessions.minutes_per_day() {
                        return Err(StoreError::Validation(format!(
                            "sid {sid} has more than {} minute bars on {date}",
                            self.sessions.minutes_per_day()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl BarWriter for ParquetBarWriter {
    fn frequency(&self) -> BarFrequency {
        self.frequency
    }

    fn write(&mut self, sid: u32, bars: &[Bar]) -> Result<(), StoreError> {
        if bars.is_empty() {
            return Ok(());
        }
        if self.written.contains(&sid) {
            return Err(StoreError::Validation(format!(
                "bars for sid {sid} were already written"
            )));
        }
        self.validate(sid, bars)?;

        let df = bars_to_dataframe(bars)?;
        write_parquet(&df, &sid_path(&self.dir, sid))?;

        self.hasher.update(&sid.to_le_bytes());
        self.hasher.update(&serde_json::to_vec(bars)?);
        self.written.insert(sid);
        self.bar_count += bars.len();
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        let mut meta = StoreMeta::new(self.frequency.kind(), self.bar_count, &self.hasher);
        meta.sids = self.written.into_iter().collect();
        write_meta(&self.dir, &meta)
    }
}

/// Read-only view of a closed bar store.
#[derive(Debug)]
pub struct ParquetBarReader {
    dir: PathBuf,
    frequency: BarFrequency,
    sids: Vec<u32>,
    bar_count: usize,
}

impl ParquetBarReader {
    /// Open the store in `dir`. Fails if the sidecar is missing or a sid it
    /// lists has no file.
    pub fn open(dir: &Path, frequency: BarFrequency) -> Result<Self, StoreError> {
        let meta = read_meta(dir, frequency.kind())?;

        let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
        let mut on_disk = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            if let Some(sid) = entry.file_name().to_str().and_then(parse_sid_file) {
                on_disk.insert(sid);
            }
        }
        if let Some(missing) = meta.sids.iter().find(|sid| !on_disk.contains(sid)) {
            return Err(StoreError::Validation(format!(
                "bar file for sid {missing} is missing"
            )));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            frequency,
            sids: meta.sids,
            bar_count: meta.record_count,
        })
    }
}

impl BarReader for ParquetBarReader {
    fn frequency(&self) -> BarFrequency {
        self.frequency
    }

    fn sids(&self) -> &[u32] {
        &self.sids
    }

    fn bar_count(&self) -> usize {
        self.bar_count
    }

    fn load(&self, sid: u32) -> Result<Vec<Bar>, StoreError> {
        if self.sids.binary_search(&sid).is_err() {
            return Ok(Vec::new());
        }
        load_and_validate_parquet(&sid_path(&self.dir, sid))
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, StoreError> {
    let dts: Vec<i64> = bars
        .iter()
        .map(|b| b.dt.and_utc().timestamp_micros())
        .collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("dt".into(), dts),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<Bar>, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read {}: {e}", path.display())))?;

    if df.height() == 0 {
        return Err(StoreError::Validation(format!(
            "empty parquet file {}",
            path.display()
        )));
    }
    for col_name in &COLUMNS {
        if df.column(col_name).is_err() {
            return Err(StoreError::Validation(format!(
                "missing column '{col_name}' in {}",
                path.display()
            )));
        }
    }

    dataframe_to_bars(&df)
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, StoreError> {
    let map_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));
    let type_err =
        |col: &str, e: PolarsError| StoreError::Parquet(format!("{col} column type: {e}"));

    let dt_ca = df
        .column("dt")
        .map_err(map_err)?
        .i64()
        .map_err(|e| type_err("dt", e))?;
    let open_ca = df
        .column("open")
        .map_err(map_err)?
        .f64()
        .map_err(|e| type_err("open", e))?;
    let high_ca = df
        .column("high")
        .map_err(map_err)?
        .f64()
        .map_err(|e| type_err("high", e))?;
    let low_ca = df
        .column("low")
        .map_err(map_err)?
        .f64()
        .map_err(|e| type_err("low", e))?;
    let close_ca = df
        .column("close")
        .map_err(map_err)?
        .f64()
        .map_err(|e| type_err("close", e))?;
    let vol_ca = df
        .column("volume")
        .map_err(map_err)?
        .u64()
        .map_err(|e| type_err("volume", e))?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let micros = dt_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null dt at row {i}")))?;
        let dt = DateTime::from_timestamp_micros(micros)
            .map(|d| d.naive_utc())
            .ok_or_else(|| StoreError::Parquet(format!("dt out of range at row {i}")))?;

        bars.push(Bar {
            dt,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
        });
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{CalendarRegistry, TradingCalendar};
    use std::sync::Arc;

    fn nyse_range(minutes_per_day: u32) -> SessionRange {
        let cal: Arc<dyn TradingCalendar> = CalendarRegistry::with_defaults().get("NYSE").unwrap();
        SessionRange::resolve(
            cal,
            NaiveDate::from_ymd_opt(2024, 1, 1),
            NaiveDate::from_ymd_opt(2024, 12, 31),
            minutes_per_day,
        )
        .unwrap()
    }

    fn daily_bar(y: i32, m: u32, d: u32, close: f64) -> Bar {
        Bar {
            dt: NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1000,
        }
    }

    #[test]
    fn write_and_load_daily_bars() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer: Box<dyn BarWriter> = Box::new(
            ParquetBarWriter::create(dir.path(), BarFrequency::Daily, nyse_range(390)).unwrap(),
        );
        writer
            .write(7, &[daily_bar(2024, 1, 2, 101.0), daily_bar(2024, 1, 3, 102.0)])
            .unwrap();
        writer.close().unwrap();

        let reader = ParquetBarReader::open(dir.path(), BarFrequency::Daily).unwrap();
        assert_eq!(reader.sids(), &[7]);
        assert_eq!(reader.bar_count(), 2);
        let bars = reader.load(7).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0], daily_bar(2024, 1, 2, 101.0));
        assert_eq!(bars[1].close, 102.0);
        assert!(reader.load(8).unwrap().is_empty());
    }

    #[test]
    fn weekend_daily_bar_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            ParquetBarWriter::create(dir.path(), BarFrequency::Daily, nyse_range(390)).unwrap();
        // 2024-01-06 is a Saturday
        let err = writer.write(1, &[daily_bar(2024, 1, 6, 100.0)]).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn out_of_order_bars_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            ParquetBarWriter::create(dir.path(), BarFrequency::Daily, nyse_range(390)).unwrap();
        let err = writer
            .write(1, &[daily_bar(2024, 1, 3, 100.0), daily_bar(2024, 1, 2, 100.0)])
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn minute_bars_capped_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            ParquetBarWriter::create(dir.path(), BarFrequency::Minute, nyse_range(2)).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let minute = |m: u32| Bar {
            dt: day.and_hms_opt(14, 30 + m, 0).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1,
        };
        writer.write(1, &[minute(0), minute(1)]).unwrap();
        let err = writer.write(2, &[minute(0), minute(1), minute(2)]).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn deleted_sid_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer: Box<dyn BarWriter> = Box::new(
            ParquetBarWriter::create(dir.path(), BarFrequency::Daily, nyse_range(390)).unwrap(),
        );
        writer.write(3, &[daily_bar(2024, 1, 2, 10.0)]).unwrap();
        writer.close().unwrap();

        fs::remove_file(sid_path(dir.path(), 3)).unwrap();
        let err = ParquetBarReader::open(dir.path(), BarFrequency::Daily).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn sid_file_names_parse() {
        assert_eq!(parse_sid_file("sid=42.parquet"), Some(42));
        assert_eq!(parse_sid_file("sid=x.parquet"), None);
        assert_eq!(parse_sid_file("meta.json"), None);
    }
}
