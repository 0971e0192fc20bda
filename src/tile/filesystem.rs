//! Tiles stored as individual files, `root/<dataset>/<level>/<x>/<y>.<ext>`

use super::format::{file_extension, parse_image_format, EncodedTile};
use super::{
    DefaultTileDataSet, Tile, TileDataLevel, TileDataSet, TileLimits, TileMatrix, TileMatrixSet, TileStore,
    TileStoreTransaction,
};
use crate::config::TileDataSetConfig;
use crate::{Result, StoreError};
use image::ImageFormat;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct TileLayout {
    dir: PathBuf,
    format: ImageFormat,
}

impl TileLayout {
    fn tile_path(&self, level_id: &str, x: u64, y: u64) -> PathBuf {
        self.dir
            .join(level_id)
            .join(x.to_string())
            .join(format!("{}.{}", y, file_extension(self.format)))
    }
}

struct FileSystemLevel {
    matrix: TileMatrix,
    limits: Option<TileLimits>,
    layout: TileLayout,
}

impl TileDataLevel for FileSystemLevel {
    fn metadata(&self) -> &TileMatrix {
        &self.matrix
    }

    fn limits(&self) -> Option<&TileLimits> {
        self.limits.as_ref()
    }

    fn get_tile(&self, x: u64, y: u64) -> Result<Option<Box<dyn Tile>>> {
        if !self.covers(x, y) {
            return Ok(None);
        }
        let path = self.layout.tile_path(&self.matrix.id, x, y);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Box::new(EncodedTile::new(
                bytes,
                self.layout.format,
                self.matrix.tile_envelope(x, y),
            )))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::TileIo(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Writable tile store over a directory tree
pub struct FileSystemTileStore {
    root: PathBuf,
    datasets: BTreeMap<String, (Arc<dyn TileDataSet>, TileLayout)>,
}

impl FileSystemTileStore {
    pub fn new(
        root: impl AsRef<Path>,
        matrix_sets: &BTreeMap<String, Arc<TileMatrixSet>>,
        datasets: &[TileDataSetConfig],
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut built = BTreeMap::new();

        for ds in datasets {
            let tms = matrix_sets.get(&ds.tile_matrix_set).ok_or_else(|| {
                StoreError::Config(format!(
                    "tile data set '{}': unknown tile matrix set '{}'",
                    ds.id, ds.tile_matrix_set
                ))
            })?;
            let layout = TileLayout {
                dir: root.join(&ds.id),
                format: parse_image_format(&ds.image_format)?,
            };
            let levels = tms
                .matrices()
                .iter()
                .map(|m| {
                    Arc::new(FileSystemLevel {
                        matrix: m.clone(),
                        limits: ds.limits.get(&m.id).copied(),
                        layout: layout.clone(),
                    }) as Arc<dyn TileDataLevel>
                })
                .collect();
            let dataset = DefaultTileDataSet::new(ds.id.clone(), Arc::clone(tms), ds.image_format.clone(), levels)?;
            if built
                .insert(ds.id.clone(), (Arc::new(dataset) as Arc<dyn TileDataSet>, layout))
                .is_some()
            {
                return Err(StoreError::Config(format!("duplicate tile data set id '{}'", ds.id)));
            }
        }

        Ok(Self { root, datasets: built })
    }
}

impl TileStore for FileSystemTileStore {
    fn init(&self) -> Result<()> {
        for (dataset, layout) in self.datasets.values() {
            fs::create_dir_all(&layout.dir)?;
            debug!(dataset = dataset.id(), dir = %layout.dir.display(), "tile directory ready");
        }
        Ok(())
    }

    fn tile_data_set_ids(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    fn tile_data_set(&self, id: &str) -> Option<Arc<dyn TileDataSet>> {
        self.datasets.get(id).map(|(ds, _)| Arc::clone(ds))
    }

    fn acquire_transaction(&self, id: &str) -> Result<Box<dyn TileStoreTransaction>> {
        let (dataset, layout) = self.datasets.get(id).ok_or_else(|| {
            StoreError::NotFound(format!("tile data set '{}' under {}", id, self.root.display()))
        })?;
        Ok(Box::new(FileSystemTransaction {
            dataset: Arc::clone(dataset),
            layout: layout.clone(),
        }))
    }
}

struct FileSystemTransaction {
    dataset: Arc<dyn TileDataSet>,
    layout: TileLayout,
}

impl FileSystemTransaction {
    fn checked_level(&self, level_id: &str, x: u64, y: u64) -> Result<Arc<dyn TileDataLevel>> {
        let level = self
            .dataset
            .level(level_id)
            .ok_or_else(|| StoreError::NotFound(format!("level '{}' in '{}'", level_id, self.dataset.id())))?;
        if !level.metadata().contains_index(x, y) {
            return Err(StoreError::ContractViolation(format!(
                "tile {}/{}/{} lies outside the matrix",
                level_id, x, y
            )));
        }
        Ok(level)
    }
}

impl TileStoreTransaction for FileSystemTransaction {
    fn tile_data_set(&self) -> &Arc<dyn TileDataSet> {
        &self.dataset
    }

    fn put(&mut self, level_id: &str, tile: &dyn Tile, x: u64, y: u64) -> Result<()> {
        self.checked_level(level_id, x, y)?;
        let bytes = tile.as_encoded_bytes(self.dataset.native_image_format())?;
        let path = self.layout.tile_path(level_id, x, y);
        let io_err = |e: std::io::Error| StoreError::TileIo(format!("{}: {}", path.display(), e));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        // write beside the target, then swap in
        let staging = path.with_extension("part");
        fs::write(&staging, &bytes).map_err(io_err)?;
        fs::rename(&staging, &path).map_err(io_err)?;
        Ok(())
    }

    fn delete(&mut self, level_id: &str, x: u64, y: u64) -> Result<()> {
        let path = self.layout.tile_path(level_id, x, y);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::TileIo(format!("{}: {}", path.display(), e))),
        }
    }
}
