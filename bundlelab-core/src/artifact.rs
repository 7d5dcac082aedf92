//! Snapshot artifacts: record types, writer/reader capabilities, storage formats.
//!
//! A snapshot holds four stores, one per [`ArtifactKind`]. Their on-disk format
//! belongs to a [`StorageFormat`]; the pipeline and loader only see the writer
//! and reader traits defined here.

use std::fmt;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::calendar::SessionRange;
use crate::error::StoreError;

/// The four stores of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    AssetMetadata,
    DailyBars,
    MinuteBars,
    Adjustments,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::AssetMetadata,
        ArtifactKind::DailyBars,
        ArtifactKind::MinuteBars,
        ArtifactKind::Adjustments,
    ];

    /// Subdirectory of the snapshot holding this store.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::AssetMetadata => "assets",
            ArtifactKind::DailyBars => "daily_bars",
            ArtifactKind::MinuteBars => "minute_bars",
            ArtifactKind::Adjustments => "adjustments",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Bar resolution of a bar store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarFrequency {
    Daily,
    Minute,
}

impl BarFrequency {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            BarFrequency::Daily => ArtifactKind::DailyBars,
            BarFrequency::Minute => ArtifactKind::MinuteBars,
        }
    }
}

/// Metadata for one tradable asset, keyed by `sid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub sid: u32,
    pub symbol: String,
    pub asset_name: String,
    pub exchange: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_close_date: Option<NaiveDate>,
}

/// One OHLCV bar. Daily bars are stamped at midnight of their session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub dt: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub sid: u32,
    pub effective_date: NaiveDate,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merger {
    pub sid: u32,
    pub effective_date: NaiveDate,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    pub sid: u32,
    pub ex_date: NaiveDate,
    #[serde(default)]
    pub record_date: Option<NaiveDate>,
    #[serde(default)]
    pub declared_date: Option<NaiveDate>,
    #[serde(default)]
    pub pay_date: Option<NaiveDate>,
    pub amount: f64,
}

/// Corporate actions of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    #[serde(default)]
    pub splits: Vec<Split>,
    #[serde(default)]
    pub mergers: Vec<Merger>,
    #[serde(default)]
    pub dividends: Vec<Dividend>,
}

impl Adjustments {
    pub fn len(&self) -> usize {
        self.splits.len() + self.mergers.len() + self.dividends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend(&mut self, other: Adjustments) {
        self.splits.extend(other.splits);
        self.mergers.extend(other.mergers);
        self.dividends.extend(other.dividends);
    }
}

// ── Writers ──────────────────────────────────────────────────────────
//
// Writers are bound to a directory inside the staging area. `close` finalizes
// the store; an unclosed store is not loadable.

pub trait AssetMetadataWriter: Send {
    fn write(&mut self, assets: &[Asset]) -> Result<(), StoreError>;

    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

pub trait BarWriter: Send {
    fn frequency(&self) -> BarFrequency;

    /// Append bars for `sid`. Bars must be ascending by `dt`.
    fn write(&mut self, sid: u32, bars: &[Bar]) -> Result<(), StoreError>;

    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

pub trait AdjustmentWriter: Send {
    fn write(&mut self, adjustments: &Adjustments) -> Result<(), StoreError>;

    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

// ── Readers ──────────────────────────────────────────────────────────
//
// Readers only take `&self`; nothing reachable from them can modify a
// published snapshot.

pub trait AssetMetadataReader: Send + Sync {
    fn assets(&self) -> &[Asset];

    fn retrieve(&self, sid: u32) -> Option<&Asset> {
        self.assets().iter().find(|a| a.sid == sid)
    }

    fn lookup_symbol(&self, symbol: &str) -> Option<&Asset> {
        self.assets().iter().find(|a| a.symbol == symbol)
    }
}

pub trait BarReader: Send + Sync {
    fn frequency(&self) -> BarFrequency;

    /// Sids with bars in this store, ascending.
    fn sids(&self) -> &[u32];

    /// Total number of bars across all sids.
    fn bar_count(&self) -> usize;

    /// Bars for `sid`, ascending by `dt`. Unknown sids yield no bars.
    fn load(&self, sid: u32) -> Result<Vec<Bar>, StoreError>;
}

pub trait AdjustmentReader: Send + Sync {
    fn adjustments(&self) -> &Adjustments;

    fn splits_for(&self, sid: u32) -> Vec<&Split> {
        self.adjustments().splits.iter().filter(|s| s.sid == sid).collect()
    }

    fn mergers_for(&self, sid: u32) -> Vec<&Merger> {
        self.adjustments().mergers.iter().filter(|m| m.sid == sid).collect()
    }

    fn dividends_for(&self, sid: u32) -> Vec<&Dividend> {
        self.adjustments()
            .dividends
            .iter()
            .filter(|d| d.sid == sid)
            .collect()
    }
}

/// Writer/reader factory set for the four stores of a snapshot.
///
/// Writers are created on directories inside the staging area; readers are
/// opened on directories of a published snapshot.
pub trait StorageFormat: Send + Sync {
    fn name(&self) -> &str;

    fn asset_writer(&self, dir: &Path) -> Result<Box<dyn AssetMetadataWriter>, StoreError>;

    fn bar_writer(
        &self,
        dir: &Path,
        frequency: BarFrequency,
        sessions: &SessionRange,
    ) -> Result<Box<dyn BarWriter>, StoreError>;

    fn adjustment_writer(&self, dir: &Path) -> Result<Box<dyn AdjustmentWriter>, StoreError>;

    fn open_asset_reader(&self, dir: &Path) -> Result<Box<dyn AssetMetadataReader>, StoreError>;

    fn open_bar_reader(
        &self,
        dir: &Path,
        frequency: BarFrequency,
    ) -> Result<Box<dyn BarReader>, StoreError>;

    fn open_adjustment_reader(&self, dir: &Path)
        -> Result<Box<dyn AdjustmentReader>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_dirs_are_distinct() {
        let mut names: Vec<&str> = ArtifactKind::ALL.iter().map(|k| k.dir_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn frequency_maps_to_bar_kinds() {
        assert_eq!(BarFrequency::Daily.kind(), ArtifactKind::DailyBars);
        assert_eq!(BarFrequency::Minute.kind(), ArtifactKind::MinuteBars);
    }

    #[test]
    fn adjustments_extend_and_count() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut adj = Adjustments::default();
        assert!(adj.is_empty());
        adj.extend(Adjustments {
            splits: vec![Split {
                sid: 1,
                effective_date: d,
                ratio: 0.5,
            }],
            mergers: vec![],
            dividends: vec![Dividend {
                sid: 2,
                ex_date: d,
                record_date: None,
                declared_date: None,
                pay_date: None,
                amount: 0.25,
            }],
        });
        assert_eq!(adj.len(), 2);
    }
}
