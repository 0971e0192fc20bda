//! Tile matrix sets and tile index arithmetic
//!
//! A matrix's origin is its extent's upper-left corner. Columns grow with X, rows
//! grow downward, and tile `(i, j)` covers the half-open box
//! `[min_x + i*w, min_x + (i+1)*w) x (max_y - (j+1)*h, max_y - j*h]`.

use crate::config::TileMatrixSetConfig;
use crate::types::{Crs, Envelope};
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Slack for floating point noise when counting tiles and comparing resolutions
const EPSILON: f64 = 1e-9;

/// One resolution level of a tile matrix set
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrix {
    pub id: String,
    /// CRS units per pixel
    pub resolution: f64,
    pub tile_width_px: u32,
    pub tile_height_px: u32,
    pub extent: Envelope,
    num_tiles_x: u64,
    num_tiles_y: u64,
}

impl TileMatrix {
    pub fn new(
        id: impl Into<String>,
        resolution: f64,
        tile_width_px: u32,
        tile_height_px: u32,
        extent: Envelope,
    ) -> Result<Self> {
        let id = id.into();
        if !(resolution > 0.0) || tile_width_px == 0 || tile_height_px == 0 {
            return Err(StoreError::Config(format!(
                "tile matrix '{}': resolution and tile size must be positive",
                id
            )));
        }
        if !(extent.width() > 0.0 && extent.height() > 0.0) {
            return Err(StoreError::Config(format!("tile matrix '{}': empty extent", id)));
        }

        let tile_w = resolution * tile_width_px as f64;
        let tile_h = resolution * tile_height_px as f64;
        let num_tiles_x = ((extent.width() / tile_w) - EPSILON).ceil().max(1.0) as u64;
        let num_tiles_y = ((extent.height() / tile_h) - EPSILON).ceil().max(1.0) as u64;

        Ok(Self {
            id,
            resolution,
            tile_width_px,
            tile_height_px,
            extent,
            num_tiles_x,
            num_tiles_y,
        })
    }

    /// Tile width in CRS units
    pub fn tile_width(&self) -> f64 {
        self.resolution * self.tile_width_px as f64
    }

    /// Tile height in CRS units
    pub fn tile_height(&self) -> f64 {
        self.resolution * self.tile_height_px as f64
    }

    pub fn num_tiles_x(&self) -> u64 {
        self.num_tiles_x
    }

    pub fn num_tiles_y(&self) -> u64 {
        self.num_tiles_y
    }

    pub fn contains_index(&self, x: u64, y: u64) -> bool {
        x < self.num_tiles_x && y < self.num_tiles_y
    }

    /// World envelope of tile `(x, y)`
    pub fn tile_envelope(&self, x: u64, y: u64) -> Envelope {
        let min_x = self.extent.min_x + x as f64 * self.tile_width();
        let max_y = self.extent.max_y - y as f64 * self.tile_height();
        let env = Envelope::new(min_x, max_y - self.tile_height(), min_x + self.tile_width(), max_y);
        match &self.extent.crs {
            Some(crs) => env.with_crs(crs.clone()),
            None => env,
        }
    }

    /// Tiles overlapping `envelope`, clamped to the matrix
    ///
    /// Returns `None` when the envelope misses the matrix extent entirely.
    pub fn tile_index_range(&self, envelope: &Envelope) -> Option<TileRange> {
        if !self.extent.intersects(envelope) {
            return None;
        }
        let col = |x: f64| self.clamp_index((x - self.extent.min_x) / self.tile_width(), self.num_tiles_x);
        let row = |y: f64| self.clamp_index((self.extent.max_y - y) / self.tile_height(), self.num_tiles_y);

        Some(TileRange {
            min_x: col(envelope.min_x),
            max_x: col(envelope.max_x),
            min_y: row(envelope.max_y),
            max_y: row(envelope.min_y),
        })
    }

    fn clamp_index(&self, offset_in_tiles: f64, count: u64) -> u64 {
        let index = offset_in_tiles.floor();
        if index <= 0.0 {
            0
        } else {
            (index as u64).min(count - 1)
        }
    }
}

/// Inclusive tile index rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub min_x: u64,
    pub min_y: u64,
    pub max_x: u64,
    pub max_y: u64,
}

impl TileRange {
    /// Number of tiles in the range
    pub fn tile_count(&self) -> u64 {
        (self.max_x - self.min_x + 1) * (self.max_y - self.min_y + 1)
    }

    pub fn contains(&self, x: u64, y: u64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    pub fn intersection(&self, other: &TileRange) -> Option<TileRange> {
        let range = TileRange {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        };
        (range.min_x <= range.max_x && range.min_y <= range.max_y).then_some(range)
    }

    /// Row-major iteration: rows outer, columns inner
    pub fn iter_rows(&self) -> impl Iterator<Item = (u64, u64)> {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..=self.max_y).flat_map(move |y| (min_x..=max_x).map(move |x| (x, y)))
    }

    /// Column-major iteration: columns outer, rows inner
    pub fn iter_columns(&self) -> impl Iterator<Item = (u64, u64)> {
        let (min_y, max_y) = (self.min_y, self.max_y);
        (self.min_x..=self.max_x).flat_map(move |x| (min_y..=max_y).map(move |y| (x, y)))
    }
}

/// Inclusive index limits clipping a level to its physical data footprint
pub type TileLimits = TileRange;

/// Ordered tile matrices sharing one CRS, finest resolution first
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrixSet {
    pub id: String,
    pub crs: Crs,
    matrices: Vec<TileMatrix>,
}

impl TileMatrixSet {
    /// Sorts by resolution and rejects duplicate resolutions
    pub fn new(id: impl Into<String>, crs: Crs, mut matrices: Vec<TileMatrix>) -> Result<Self> {
        let id = id.into();
        if matrices.is_empty() {
            return Err(StoreError::Config(format!("tile matrix set '{}' has no matrices", id)));
        }
        matrices.sort_by(|a, b| a.resolution.total_cmp(&b.resolution));
        for pair in matrices.windows(2) {
            if (pair[1].resolution - pair[0].resolution).abs() <= EPSILON {
                return Err(StoreError::Config(format!(
                    "tile matrix set '{}': matrices '{}' and '{}' share resolution {}",
                    id, pair[0].id, pair[1].id, pair[0].resolution
                )));
            }
        }
        for m in &mut matrices {
            m.extent.crs = Some(crs.clone());
        }
        Ok(Self { id, crs, matrices })
    }

    pub fn from_config(id: &str, config: &TileMatrixSetConfig) -> Result<Self> {
        let matrices = config
            .matrices
            .iter()
            .map(|m| {
                TileMatrix::new(
                    m.id.clone(),
                    m.resolution,
                    m.tile_width_px,
                    m.tile_height_px,
                    m.extent.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(id, config.crs.clone(), matrices)
    }

    pub fn matrices(&self) -> &[TileMatrix] {
        &self.matrices
    }

    pub fn matrix(&self, id: &str) -> Option<&TileMatrix> {
        self.matrices.iter().find(|m| m.id == id)
    }

    pub fn best_matrix_for(&self, resolution: f64) -> Option<&TileMatrix> {
        best_level_index(self.matrices.iter().map(|m| m.resolution), resolution)
            .map(|i| &self.matrices[i])
    }
}

/// Picks a level for `target` out of resolutions in ascending order
///
/// Takes the finest level whose resolution does not exceed the target. When every
/// level is coarser than the target, the coarsest level wins. Ties go to the level
/// listed first.
pub fn best_level_index(resolutions: impl Iterator<Item = f64>, target: f64) -> Option<usize> {
    let tolerance = EPSILON * target.abs().max(1.0);
    let mut finest_fit: Option<(usize, f64)> = None;
    let mut coarsest: Option<(usize, f64)> = None;
    for (i, res) in resolutions.enumerate() {
        if res <= target + tolerance && finest_fit.map_or(true, |(_, r)| res < r) {
            finest_fit = Some((i, res));
        }
        if coarsest.map_or(true, |(_, r)| res > r) {
            coarsest = Some((i, res));
        }
    }
    finest_fit.or(coarsest).map(|(i, _)| i)
}
