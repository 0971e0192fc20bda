//! Tile stores
//!
//! The hierarchy is `TileStore` -> `TileDataSet` -> `TileDataLevel` -> `Tile`.
//! A store maps dataset ids to datasets; a dataset holds one level per tile matrix
//! of its [`TileMatrixSet`]; a level hands out tiles by index. Tiles are produced on
//! demand and own nothing but what they need to materialize their pixels.
//!
//! Backends:
//! - [`RasterTileStore`]: cuts tiles out of georeferenced raster files (read-only)
//! - [`FileSystemTileStore`]: one encoded file per tile, `root/<dataset>/<level>/<x>/<y>.<ext>`
//! - [`SqliteTileStore`]: one row per tile in a `tiles` table
//! - [`MergingTileStore`]: read-only union of other stores

mod dataset;
mod filesystem;
mod format;
pub mod matrix;
mod merge;
mod raster;
mod sqlite;

pub use dataset::DefaultTileDataSet;
pub use filesystem::FileSystemTileStore;
pub use format::{decode_image, encode_image, file_extension, parse_image_format, EncodedTile, ImageTile};
pub use matrix::{best_level_index, TileLimits, TileMatrix, TileMatrixSet, TileRange};
pub use merge::MergingTileStore;
pub use raster::RasterTileStore;
pub use sqlite::SqliteTileStore;

use crate::types::Envelope;
use crate::{Result, StoreError};
use image::RgbaImage;
use std::sync::Arc;

/// One addressable raster unit
pub trait Tile: Send {
    fn envelope(&self) -> &Envelope;

    fn as_image(&self) -> Result<RgbaImage>;

    /// Encodes the tile as `format` (extension or MIME type)
    fn as_encoded_bytes(&self, format: &str) -> Result<Vec<u8>>;
}

/// One tile matrix bound to a tile source
pub trait TileDataLevel: Send + Sync {
    fn metadata(&self) -> &TileMatrix;

    /// Index limits narrowing the matrix to the data footprint
    fn limits(&self) -> Option<&TileLimits>;

    /// Tile at `(x, y)`; `None` outside the matrix or limits, or where no data exists
    fn get_tile(&self, x: u64, y: u64) -> Result<Option<Box<dyn Tile>>>;

    /// Whether `(x, y)` lies inside both the matrix and the limits
    fn covers(&self, x: u64, y: u64) -> bool {
        self.metadata().contains_index(x, y) && self.limits().map_or(true, |l| l.contains(x, y))
    }
}

/// Levels sharing one tile matrix set under a dataset id
pub trait TileDataSet: Send + Sync {
    fn id(&self) -> &str;

    fn tile_matrix_set(&self) -> &TileMatrixSet;

    /// Image format tiles are stored in
    fn native_image_format(&self) -> &str;

    /// Levels in ascending resolution order
    fn levels(&self) -> &[Arc<dyn TileDataLevel>];

    fn level(&self, id: &str) -> Option<Arc<dyn TileDataLevel>> {
        self.levels().iter().find(|l| l.metadata().id == id).cloned()
    }

    /// Tiles of the best level for `resolution` overlapping `envelope`, row by row
    fn get_tiles(&self, envelope: &Envelope, resolution: f64) -> TileIter {
        let levels = self.levels();
        let Some(index) = best_level_index(levels.iter().map(|l| l.metadata().resolution), resolution) else {
            return TileIter::empty();
        };
        let level = Arc::clone(&levels[index]);
        let range = level
            .metadata()
            .tile_index_range(envelope)
            .and_then(|r| match level.limits() {
                Some(limits) => r.intersection(limits),
                None => Some(r),
            });
        match range {
            Some(range) => TileIter::new(level, range),
            None => TileIter::empty(),
        }
    }
}

/// Lazy row-major walk over a tile range; cells without a tile are skipped
pub struct TileIter {
    level: Option<Arc<dyn TileDataLevel>>,
    cells: Box<dyn Iterator<Item = (u64, u64)> + Send>,
}

impl TileIter {
    pub fn new(level: Arc<dyn TileDataLevel>, range: TileRange) -> Self {
        Self {
            level: Some(level),
            cells: Box::new(range.iter_rows()),
        }
    }

    pub fn empty() -> Self {
        Self {
            level: None,
            cells: Box::new(std::iter::empty()),
        }
    }
}

impl Iterator for TileIter {
    type Item = Result<Box<dyn Tile>>;

    fn next(&mut self) -> Option<Self::Item> {
        let level = self.level.as_ref()?;
        for (x, y) in self.cells.by_ref() {
            match level.get_tile(x, y) {
                Ok(Some(tile)) => return Some(Ok(tile)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// Registry of tile datasets
pub trait TileStore: Send + Sync {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Releases pooled resources
    fn destroy(&self) {}

    fn tile_data_set_ids(&self) -> Vec<String>;

    fn tile_data_set(&self, id: &str) -> Option<Arc<dyn TileDataSet>>;

    fn get_tiles(&self, id: &str, envelope: &Envelope, resolution: f64) -> Result<TileIter> {
        let dataset = self
            .tile_data_set(id)
            .ok_or_else(|| StoreError::NotFound(format!("tile data set '{}'", id)))?;
        Ok(dataset.get_tiles(envelope, resolution))
    }

    /// `None` when the dataset or level is unknown or the index is out of bounds
    fn get_tile(&self, id: &str, level_id: &str, x: u64, y: u64) -> Result<Option<Box<dyn Tile>>> {
        match self.tile_data_set(id).and_then(|ds| ds.level(level_id)) {
            Some(level) => level.get_tile(x, y),
            None => Ok(None),
        }
    }

    fn acquire_transaction(&self, id: &str) -> Result<Box<dyn TileStoreTransaction>> {
        Err(StoreError::Unsupported(format!(
            "tile store is read-only, cannot modify '{}'",
            id
        )))
    }
}

/// Mutation scope over one tile dataset
///
/// Every call takes effect immediately; there is no cross-tile atomicity.
pub trait TileStoreTransaction {
    fn tile_data_set(&self) -> &Arc<dyn TileDataSet>;

    /// Stores `tile` at `(x, y)`, replacing what was there
    fn put(&mut self, level_id: &str, tile: &dyn Tile, x: u64, y: u64) -> Result<()>;

    /// Removes one tile; removing a missing tile is a no-op
    fn delete(&mut self, level_id: &str, x: u64, y: u64) -> Result<()>;

    /// Deletes every tile cell overlapping `envelope`, on one level or on all of them
    ///
    /// Columns are walked outermost. The first failing delete aborts the batch
    /// with earlier deletes left in place. Returns the number of deletes issued.
    fn delete_envelope(&mut self, level_id: Option<&str>, envelope: &Envelope) -> Result<usize> {
        let dataset = Arc::clone(self.tile_data_set());
        let levels = match level_id {
            Some(id) => vec![dataset
                .level(id)
                .ok_or_else(|| StoreError::NotFound(format!("level '{}' in '{}'", id, dataset.id())))?],
            None => dataset.levels().to_vec(),
        };

        let mut issued = 0;
        for level in levels {
            let matrix = level.metadata();
            let Some(range) = matrix.tile_index_range(envelope) else {
                continue;
            };
            for (x, y) in range.iter_columns() {
                self.delete(&matrix.id, x, y).map_err(|e| match e {
                    StoreError::TileIo(_) => e,
                    other => StoreError::TileIo(format!("deleting {}/{}/{}: {}", matrix.id, x, y, other)),
                })?;
                issued += 1;
            }
        }
        Ok(issued)
    }
}
