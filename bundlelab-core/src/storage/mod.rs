//! Default storage format: Parquet bar stores, JSON asset and adjustment stores.
//!
//! Layout of a snapshot written with [`ParquetStorage`]:
//! - `assets/assets.json`
//! - `daily_bars/sid={SID}.parquet`, `minute_bars/sid={SID}.parquet`
//! - `adjustments/adjustments.json`
//!
//! Every store directory also holds a `meta.json` sidecar (kind, record count,
//! BLAKE3 hash of the records). The sidecar is written by `close`, so a store
//! whose writer never closed cannot be opened.

pub mod adjustments;
pub mod assets;
pub mod bars;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::artifact::{
    AdjustmentReader, AdjustmentWriter, ArtifactKind, AssetMetadataReader, AssetMetadataWriter,
    BarFrequency, BarReader, BarWriter, StorageFormat,
};
use crate::calendar::SessionRange;
use crate::error::StoreError;

pub use adjustments::{JsonAdjustmentReader, JsonAdjustmentWriter};
pub use assets::{JsonAssetReader, JsonAssetWriter};
pub use bars::{ParquetBarReader, ParquetBarWriter};

/// Name of the per-store sidecar file.
pub const META_FILE: &str = "meta.json";

/// Current on-disk format version of [`ParquetStorage`] stores.
pub const FORMAT_VERSION: u32 = 1;

/// Sidecar describing a closed store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub kind: ArtifactKind,
    pub format_version: u32,
    pub record_count: usize,
    pub data_hash: String,
    pub written_at: NaiveDateTime,
    /// Sids with a bar file (bar stores only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sids: Vec<u32>,
}

impl StoreMeta {
    fn new(kind: ArtifactKind, record_count: usize, hasher: &blake3::Hasher) -> Self {
        Self {
            kind,
            format_version: FORMAT_VERSION,
            record_count,
            data_hash: hasher.finalize().to_hex().to_string(),
            written_at: chrono::Utc::now().naive_utc(),
            sids: Vec::new(),
        }
    }
}

fn meta_path(dir: &Path) -> PathBuf {
    dir.join(META_FILE)
}

pub(crate) fn write_meta(dir: &Path, meta: &StoreMeta) -> Result<(), StoreError> {
    write_json(&meta_path(dir), meta)
}

/// Read and check the sidecar of the store in `dir`.
pub fn read_meta(dir: &Path, expected: ArtifactKind) -> Result<StoreMeta, StoreError> {
    let path = meta_path(dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::MissingSidecar(path))
        }
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    let meta: StoreMeta = serde_json::from_str(&content)?;
    if meta.kind != expected {
        return Err(StoreError::KindMismatch {
            expected: expected.to_string(),
            found: meta.kind.to_string(),
        });
    }
    if meta.format_version > FORMAT_VERSION {
        return Err(StoreError::Validation(format!(
            "store format version {} is newer than supported version {FORMAT_VERSION}",
            meta.format_version
        )));
    }
    Ok(meta)
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json).map_err(|e| StoreError::io(path, e))
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    Ok(serde_json::from_slice(&content)?)
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))
}

/// The default [`StorageFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetStorage;

impl StorageFormat for ParquetStorage {
    fn name(&self) -> &str {
        "parquet"
    }

    fn asset_writer(&self, dir: &Path) -> Result<Box<dyn AssetMetadataWriter>, StoreError> {
        Ok(Box::new(JsonAssetWriter::create(dir)?))
    }

    fn bar_writer(
        &self,
        dir: &Path,
        frequency: BarFrequency,
        sessions: &SessionRange,
    ) -> Result<Box<dyn BarWriter>, StoreError> {
        Ok(Box::new(ParquetBarWriter::create(
            dir,
            frequency,
            sessions.clone(),
        )?))
    }

    fn adjustment_writer(&self, dir: &Path) -> Result<Box<dyn AdjustmentWriter>, StoreError> {
        Ok(Box::new(JsonAdjustmentWriter::create(dir)?))
    }

    fn open_asset_reader(&self, dir: &Path) -> Result<Box<dyn AssetMetadataReader>, StoreError> {
        Ok(Box::new(JsonAssetReader::open(dir)?))
    }

    fn open_bar_reader(
        &self,
        dir: &Path,
        frequency: BarFrequency,
    ) -> Result<Box<dyn BarReader>, StoreError> {
        Ok(Box::new(ParquetBarReader::open(dir, frequency)?))
    }

    fn open_adjustment_reader(
        &self,
        dir: &Path,
    ) -> Result<Box<dyn AdjustmentReader>, StoreError> {
        Ok(Box::new(JsonAdjustmentReader::open(dir)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sidecar_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_meta(dir.path(), ArtifactKind::AssetMetadata).unwrap_err();
        assert!(matches!(err, StoreError::MissingSidecar(_)));
    }

    #[test]
    fn sidecar_kind_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let meta = StoreMeta::new(ArtifactKind::DailyBars, 0, &blake3::Hasher::new());
        write_meta(dir.path(), &meta).unwrap();

        assert_eq!(read_meta(dir.path(), ArtifactKind::DailyBars).unwrap(), meta);
        let err = read_meta(dir.path(), ArtifactKind::MinuteBars).unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { .. }));
    }

    #[test]
    fn garbage_sidecar_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(META_FILE), "not json").unwrap();
        let err = read_meta(dir.path(), ArtifactKind::Adjustments).unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
