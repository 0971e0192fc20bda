//! Native raster dataset binding
//!
//! A [`RasterDriver`] opens datasets; a [`RasterDataset`] extracts pixel regions.
//! Handles are not assumed safe for concurrent use, so they are only reached through
//! a [`DatasetPool`] which hands each borrower an exclusive handle.

mod world_file;

pub use world_file::WorldFileDriver;

use crate::config::PoolConfig;
use crate::storage::{PooledResource, ResourcePool};
use crate::types::Envelope;
use crate::Result;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resampling used when a tile's pixel grid does not line up with the source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    NearestNeighbor,
    Bilinear,
}

/// An open raster dataset
pub trait RasterDataset: Send {
    /// Georeferenced extent of the dataset
    fn envelope(&self) -> &Envelope;

    /// Renders `region` into a `width` x `height` image; pixels outside the
    /// dataset are transparent
    fn extract(
        &mut self,
        region: &Envelope,
        width: u32,
        height: u32,
        interpolation: Interpolation,
    ) -> Result<RgbaImage>;
}

/// Opens raster datasets from files
pub trait RasterDriver: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn RasterDataset>>;
}

pub type PooledDataset = PooledResource<PathBuf, Box<dyn RasterDataset>>;

/// Pool of open datasets keyed by canonical file path
#[derive(Clone)]
pub struct DatasetPool {
    pool: ResourcePool<PathBuf, Box<dyn RasterDataset>>,
}

impl DatasetPool {
    pub fn new(driver: Arc<dyn RasterDriver>, config: PoolConfig) -> Self {
        Self {
            pool: ResourcePool::new("raster-datasets", config, move |path: &PathBuf| driver.open(path)),
        }
    }

    /// Borrow an exclusive dataset handle; it returns to the pool when dropped
    pub fn acquire(&self, path: &Path) -> Result<PooledDataset> {
        let canonical = std::fs::canonicalize(path)?;
        self.pool.acquire(&canonical)
    }

    /// Borrowed handles for `path`
    pub fn ref_count(&self, path: &Path) -> usize {
        match std::fs::canonicalize(path) {
            Ok(canonical) => self.pool.ref_count(&canonical),
            Err(_) => 0,
        }
    }

    pub fn open_count(&self) -> usize {
        self.pool.open_count()
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
pub(crate) use world_file::tests::write_quadrant_raster;
