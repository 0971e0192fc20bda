use super::{TileDataLevel, TileDataSet, TileMatrixSet};
use crate::{Result, StoreError};
use std::sync::Arc;

/// Dataset over a list of levels, each bound to a matrix of the set
pub struct DefaultTileDataSet {
    id: String,
    tile_matrix_set: Arc<TileMatrixSet>,
    image_format: String,
    levels: Vec<Arc<dyn TileDataLevel>>,
}

impl DefaultTileDataSet {
    /// Orders levels by resolution; every level must use a matrix of the set, at most once
    pub fn new(
        id: impl Into<String>,
        tile_matrix_set: Arc<TileMatrixSet>,
        image_format: impl Into<String>,
        mut levels: Vec<Arc<dyn TileDataLevel>>,
    ) -> Result<Self> {
        let id = id.into();
        for level in &levels {
            let matrix_id = &level.metadata().id;
            if tile_matrix_set.matrix(matrix_id).is_none() {
                return Err(StoreError::Config(format!(
                    "tile data set '{}': level '{}' is not in tile matrix set '{}'",
                    id, matrix_id, tile_matrix_set.id
                )));
            }
        }
        levels.sort_by(|a, b| a.metadata().resolution.total_cmp(&b.metadata().resolution));
        for pair in levels.windows(2) {
            if pair[0].metadata().id == pair[1].metadata().id {
                return Err(StoreError::Config(format!(
                    "tile data set '{}': level '{}' configured twice",
                    id,
                    pair[0].metadata().id
                )));
            }
        }

        Ok(Self {
            id,
            tile_matrix_set,
            image_format: image_format.into(),
            levels,
        })
    }
}

impl TileDataSet for DefaultTileDataSet {
    fn id(&self) -> &str {
        &self.id
    }

    fn tile_matrix_set(&self) -> &TileMatrixSet {
        &self.tile_matrix_set
    }

    fn native_image_format(&self) -> &str {
        &self.image_format
    }

    fn levels(&self) -> &[Arc<dyn TileDataLevel>] {
        &self.levels
    }
}
