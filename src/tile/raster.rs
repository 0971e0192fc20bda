//! Tiles cut on demand out of georeferenced raster files

use super::format::{encode_image, parse_image_format};
use super::{DefaultTileDataSet, Tile, TileDataLevel, TileDataSet, TileLimits, TileMatrix, TileMatrixSet, TileStore};
use crate::config::{PoolConfig, RasterDataSetConfig};
use crate::raster::{DatasetPool, Interpolation, RasterDriver};
use crate::types::Envelope;
use crate::{Result, StoreError};
use image::RgbaImage;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

struct RasterLevel {
    matrix: TileMatrix,
    limits: Option<TileLimits>,
    file: PathBuf,
    pool: DatasetPool,
    interpolation: Interpolation,
}

impl TileDataLevel for RasterLevel {
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
        Ok(Some(Box::new(RasterTile {
            pool: self.pool.clone(),
            file: self.file.clone(),
            envelope: self.matrix.tile_envelope(x, y),
            width: self.matrix.tile_width_px,
            height: self.matrix.tile_height_px,
            interpolation: self.interpolation,
        })))
    }
}

/// A tile that borrows a dataset handle only while extracting its pixels
struct RasterTile {
    pool: DatasetPool,
    file: PathBuf,
    envelope: Envelope,
    width: u32,
    height: u32,
    interpolation: Interpolation,
}

impl Tile for RasterTile {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn as_image(&self) -> Result<RgbaImage> {
        let mut dataset = self.pool.acquire(&self.file)?;
        dataset.extract(&self.envelope, self.width, self.height, self.interpolation)
    }

    fn as_encoded_bytes(&self, format: &str) -> Result<Vec<u8>> {
        let format = parse_image_format(format)?;
        encode_image(&self.as_image()?, format)
    }
}

/// Read-only tile store over raster files, one file per level
pub struct RasterTileStore {
    datasets: BTreeMap<String, Arc<dyn TileDataSet>>,
    files: Vec<PathBuf>,
    pool: DatasetPool,
}

impl RasterTileStore {
    pub fn new(
        matrix_sets: &BTreeMap<String, Arc<TileMatrixSet>>,
        datasets: &[RasterDataSetConfig],
        driver: Arc<dyn RasterDriver>,
        pool: PoolConfig,
        interpolation: Interpolation,
    ) -> Result<Self> {
        let pool = DatasetPool::new(driver, pool);
        let mut built = BTreeMap::new();
        let mut files = Vec::new();

        for ds in datasets {
            parse_image_format(&ds.image_format)?;
            let tms = matrix_sets.get(&ds.tile_matrix_set).ok_or_else(|| {
                StoreError::Config(format!(
                    "raster data set '{}': unknown tile matrix set '{}'",
                    ds.id, ds.tile_matrix_set
                ))
            })?;

            let mut levels: Vec<Arc<dyn TileDataLevel>> = Vec::with_capacity(ds.levels.len());
            for level in &ds.levels {
                let matrix = tms.matrix(&level.level_id).ok_or_else(|| {
                    StoreError::Config(format!(
                        "raster data set '{}': level '{}' is not in '{}'",
                        ds.id, level.level_id, tms.id
                    ))
                })?;
                files.push(level.file.clone());
                levels.push(Arc::new(RasterLevel {
                    matrix: matrix.clone(),
                    limits: level.limits,
                    file: level.file.clone(),
                    pool: pool.clone(),
                    interpolation,
                }));
            }

            let dataset = DefaultTileDataSet::new(ds.id.clone(), Arc::clone(tms), ds.image_format.clone(), levels)?;
            if built.insert(ds.id.clone(), Arc::new(dataset) as Arc<dyn TileDataSet>).is_some() {
                return Err(StoreError::Config(format!("duplicate tile data set id '{}'", ds.id)));
            }
        }

        Ok(Self {
            datasets: built,
            files,
            pool,
        })
    }
}

impl TileStore for RasterTileStore {
    /// Opens every level file once so broken georeferencing fails early
    fn init(&self) -> Result<()> {
        for file in &self.files {
            let dataset = self.pool.acquire(file)?;
            debug!(file = %file.display(), extent = ?dataset.envelope(), "raster level ready");
        }
        info!(datasets = self.datasets.len(), "raster tile store initialized");
        Ok(())
    }

    fn destroy(&self) {
        self.pool.close();
    }

    fn tile_data_set_ids(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    fn tile_data_set(&self, id: &str) -> Option<Arc<dyn TileDataSet>> {
        self.datasets.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RasterLevelConfig;
    use crate::raster::{write_quadrant_raster, WorldFileDriver};
    use crate::tile::TileRange;
    use crate::types::Crs;
    use image::Rgba;

    fn store(dir: &std::path::Path, limits: Option<TileLimits>) -> RasterTileStore {
        let file = write_quadrant_raster(dir);
        let extent = Envelope::new(0.0, 0.0, 40.0, 40.0);
        let tms = TileMatrixSet::new(
            "local",
            Crs::new("EPSG:25832"),
            vec![TileMatrix::new("z1", 5.0, 4, 4, extent).unwrap()],
        )
        .unwrap();
        let mut sets = BTreeMap::new();
        sets.insert("local".to_string(), Arc::new(tms));

        let config = RasterDataSetConfig {
            id: "ortho".into(),
            tile_matrix_set: "local".into(),
            image_format: "png".into(),
            levels: vec![RasterLevelConfig {
                level_id: "z1".into(),
                file,
                limits,
            }],
        };
        RasterTileStore::new(
            &sets,
            &[config],
            Arc::new(WorldFileDriver),
            PoolConfig::default(),
            Interpolation::NearestNeighbor,
        )
        .unwrap()
    }

    #[test]
    fn test_tile_extracts_its_quadrant() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), None);
        store.init().unwrap();

        let tile = store.get_tile("ortho", "z1", 1, 0).unwrap().unwrap();
        let img = tile.as_image().unwrap();
        assert_eq!(img.dimensions(), (4, 4));
        assert!(img.pixels().all(|p| *p == Rgba([0, 255, 0, 255])));

        let png = tile.as_encoded_bytes("image/png").unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_get_tiles_walks_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), None);

        let envelopes: Vec<_> = store
            .get_tiles("ortho", &Envelope::new(0.0, 0.0, 40.0, 40.0), 5.0)
            .unwrap()
            .map(|t| {
                let env = t.unwrap().envelope().clone();
                (env.min_x, env.max_y)
            })
            .collect();
        assert_eq!(envelopes, vec![(0.0, 40.0), (20.0, 40.0), (0.0, 20.0), (20.0, 20.0)]);
    }

    #[test]
    fn test_limits_and_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Some(TileRange { min_x: 0, min_y: 0, max_x: 0, max_y: 1 }));

        assert!(store.get_tile("ortho", "z1", 1, 0).unwrap().is_none());
        assert!(store.get_tile("ortho", "z1", 0, 1).unwrap().is_some());
        assert!(store.get_tile("ortho", "z9", 0, 0).unwrap().is_none());
        assert!(store.get_tile("nope", "z1", 0, 0).unwrap().is_none());
        assert!(matches!(store.get_tiles("nope", &Envelope::new(0.0, 0.0, 1.0, 1.0), 5.0), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), None);
        assert!(matches!(store.acquire_transaction("ortho"), Err(StoreError::Unsupported(_))));
    }

    #[test]
    fn test_handles_return_to_pool() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), None);
        let file = dir.path().join("quadrants.png");

        let tile = store.get_tile("ortho", "z1", 0, 0).unwrap().unwrap();
        tile.as_image().unwrap();
        assert_eq!(store.pool.ref_count(&file), 0);

        store.destroy();
        assert!(matches!(tile.as_image(), Err(StoreError::Unavailable(_))));
    }
}
