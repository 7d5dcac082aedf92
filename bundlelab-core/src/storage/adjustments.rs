//! JSON adjustments store (splits, mergers, dividends).

use std::path::{Path, PathBuf};

use super::{ensure_dir, read_json, read_meta, write_json, write_meta, StoreMeta};
use crate::artifact::{AdjustmentReader, AdjustmentWriter, Adjustments, ArtifactKind};
use crate::error::StoreError;

const ADJUSTMENTS_FILE: &str = "adjustments.json";

pub struct JsonAdjustmentWriter {
    dir: PathBuf,
    adjustments: Adjustments,
}

impl JsonAdjustmentWriter {
    pub fn create(dir: &Path) -> Result<Self, StoreError> {
        ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            adjustments: Adjustments::default(),
        })
    }
}

fn validate(adjustments: &Adjustments) -> Result<(), StoreError> {
    let bad_ratio = adjustments
        .splits
        .iter()
        .map(|s| (s.sid, s.ratio))
        .chain(adjustments.mergers.iter().map(|m| (m.sid, m.ratio)))
        .find(|(_, ratio)| !(ratio.is_finite() && *ratio > 0.0));
    if let Some((sid, ratio)) = bad_ratio {
        return Err(StoreError::Validation(format!(
            "non-positive adjustment ratio {ratio} for sid {sid}"
        )));
    }
    if let Some(d) = adjustments
        .dividends
        .iter()
        .find(|d| !(d.amount.is_finite() && d.amount >= 0.0))
    {
        return Err(StoreError::Validation(format!(
            "invalid dividend amount {} for sid {}",
            d.amount, d.sid
        )));
    }
    Ok(())
}

impl AdjustmentWriter for JsonAdjustmentWriter {
    fn write(&mut self, adjustments: &Adjustments) -> Result<(), StoreError> {
        validate(adjustments)?;
        self.adjustments.extend(adjustments.clone());
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), StoreError> {
        let adj = &mut self.adjustments;
        adj.splits.sort_by_key(|s| (s.effective_date, s.sid));
        adj.mergers.sort_by_key(|m| (m.effective_date, m.sid));
        adj.dividends.sort_by_key(|d| (d.ex_date, d.sid));

        write_json(&self.dir.join(ADJUSTMENTS_FILE), &self.adjustments)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&serde_json::to_vec(&self.adjustments)?);
        let meta = StoreMeta::new(ArtifactKind::Adjustments, self.adjustments.len(), &hasher);
        write_meta(&self.dir, &meta)
    }
}

#[derive(Debug)]
pub struct JsonAdjustmentReader {
    adjustments: Adjustments,
}

impl JsonAdjustmentReader {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let meta = read_meta(dir, ArtifactKind::Adjustments)?;
        let adjustments: Adjustments = read_json(&dir.join(ADJUSTMENTS_FILE))?;
        if adjustments.len() != meta.record_count {
            return Err(StoreError::Validation(format!(
                "expected {} adjustments, found {}",
                meta.record_count,
                adjustments.len()
            )));
        }
        Ok(Self { adjustments })
    }
}

impl AdjustmentReader for JsonAdjustmentReader {
    fn adjustments(&self) -> &Adjustments {
        &self.adjustments
    }
}
