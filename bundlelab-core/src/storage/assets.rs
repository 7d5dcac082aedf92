//! JSON asset metadata store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{ensure_dir, read_json, read_meta, write_json, write_meta, StoreMeta};
use crate::artifact::{ArtifactKind, Asset, AssetMetadataReader, AssetMetadataWriter};
use crate::error::StoreError;

const ASSETS_FILE: &str = "assets.json";

pub struct JsonAssetWriter {
    dir: PathBuf,
    assets: BTreeMap<u32, Asset>,
}

impl JsonAssetWriter {
    pub fn create(dir: &Path) -> Result<Self, StoreError> {
        ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            assets: BTreeMap::new(),
        })
    }
}

impl AssetMetadataWriter for JsonAssetWriter {
    fn write(&mut self, assets: &[Asset]) -> Result<(), StoreError> {
        for asset in assets {
            if asset.start_date > asset.end_date {
                return Err(StoreError::Validation(format!(
                    "asset {} ({}) starts after it ends",
                    asset.sid, asset.symbol
                )));
            }
            if self.assets.contains_key(&asset.sid) {
                return Err(StoreError::Validation(format!(
                    "duplicate sid {} ({})",
                    asset.sid, asset.symbol
                )));
            }
            self.assets.insert(asset.sid, asset.clone());
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        let assets: Vec<&Asset> = self.assets.values().collect();
        write_json(&self.dir.join(ASSETS_FILE), &assets)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&serde_json::to_vec(&assets)?);
        let meta = StoreMeta::new(ArtifactKind::AssetMetadata, assets.len(), &hasher);
        write_meta(&self.dir, &meta)
    }
}

/// Read-only view of a closed asset store, sorted by sid.
#[derive(Debug)]
pub struct JsonAssetReader {
    assets: Vec<Asset>,
}

impl JsonAssetReader {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let meta = read_meta(dir, ArtifactKind::AssetMetadata)?;
        let assets: Vec<Asset> = read_json(&dir.join(ASSETS_FILE))?;
        if assets.len() != meta.record_count {
            return Err(StoreError::Validation(format!(
                "expected {} assets, found {}",
                meta.record_count,
                assets.len()
            )));
        }
        Ok(Self { assets })
    }
}

impl AssetMetadataReader for JsonAssetReader {
    fn assets(&self) -> &[Asset] {
        &self.assets
    }

    fn retrieve(&self, sid: u32) -> Option<&Asset> {
        self.assets
            .binary_search_by_key(&sid, |a| a.sid)
            .ok()
            .map(|i| &self.assets[i])
    }
}
