//! Store configuration
//!
//! Plain serde structures describing a workspace: named connections, tile matrix
//! sets, feature stores and tile stores. Parsing the service-level XML lives
//! elsewhere; this is the already-resolved form the stores are built from.

use crate::raster::Interpolation;
use crate::tile::TileLimits;
use crate::types::{Crs, Envelope};
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Bounded pool settings shared by connection and raster dataset pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of open handles
    #[serde(default = "default_pool_capacity")]
    pub capacity: usize,

    /// How long a borrower waits for a free handle before giving up
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

fn default_pool_capacity() -> usize {
    4
}

fn default_wait_timeout_ms() -> u64 {
    5_000
}

fn default_envelope_ttl_ms() -> u64 {
    1_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_pool_capacity(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

/// SQLite database file behind a connection id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMatrixConfig {
    pub id: String,
    /// CRS units per pixel
    pub resolution: f64,
    pub tile_width_px: u32,
    pub tile_height_px: u32,
    pub extent: Envelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMatrixSetConfig {
    pub crs: Crs,
    pub matrices: Vec<TileMatrixConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlFeatureStoreConfig {
    pub connection_id: String,
    pub crs: Crs,
    pub feature_type: String,
    /// Base statement, the `-1` level of detail
    pub sql: String,
    /// Additional statements keyed by the scale they apply above
    #[serde(default)]
    pub lods: BTreeMap<i64, String>,
    /// Statement returning the store extent as WKT
    pub bbox_sql: String,
    #[serde(default)]
    pub id_column: Option<String>,
    /// Reject unmapped column types at init instead of skipping them
    #[serde(default)]
    pub strict_schema: bool,
    #[serde(default = "default_envelope_ttl_ms")]
    pub envelope_ttl_ms: u64,
}

/// Dataset of a writable (filesystem or SQLite) tile store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDataSetConfig {
    pub id: String,
    pub tile_matrix_set: String,
    pub image_format: String,
    /// Index limits per matrix id
    #[serde(default)]
    pub limits: BTreeMap<String, TileLimits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterLevelConfig {
    /// Matrix id within the dataset's tile matrix set
    pub level_id: String,
    pub file: PathBuf,
    #[serde(default)]
    pub limits: Option<TileLimits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDataSetConfig {
    pub id: String,
    pub tile_matrix_set: String,
    pub image_format: String,
    pub levels: Vec<RasterLevelConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TileStoreConfig {
    Raster {
        #[serde(default)]
        pool: PoolConfig,
        #[serde(default)]
        interpolation: Interpolation,
        datasets: Vec<RasterDataSetConfig>,
    },
    FileSystem {
        root: PathBuf,
        datasets: Vec<TileDataSetConfig>,
    },
    Sqlite {
        connection_id: String,
        datasets: Vec<TileDataSetConfig>,
    },
    /// Read-only view over other tile stores, earlier stores win on id clashes
    Merge { stores: Vec<String> },
}

/// Everything needed to build a [`StoreRegistry`](crate::catalog::StoreRegistry)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub tile_matrix_sets: BTreeMap<String, TileMatrixSetConfig>,
    #[serde(default)]
    pub feature_stores: BTreeMap<String, SqlFeatureStoreConfig>,
    #[serde(default)]
    pub tile_stores: BTreeMap<String, TileStoreConfig>,
}

impl WorkspaceConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: WorkspaceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    /// Checks that every cross reference resolves
    pub fn validate(&self) -> Result<()> {
        for (id, fs) in &self.feature_stores {
            self.require_connection(id, &fs.connection_id)?;
        }

        for (id, ts) in &self.tile_stores {
            match ts {
                TileStoreConfig::Raster { pool, datasets, .. } => {
                    if pool.capacity == 0 {
                        return Err(StoreError::Config(format!(
                            "tile store '{}': pool capacity must be positive",
                            id
                        )));
                    }
                    for ds in datasets {
                        self.require_matrix_set(id, &ds.tile_matrix_set)?;
                    }
                }
                TileStoreConfig::FileSystem { datasets, .. } => {
                    for ds in datasets {
                        self.require_matrix_set(id, &ds.tile_matrix_set)?;
                    }
                }
                TileStoreConfig::Sqlite { connection_id, datasets } => {
                    self.require_connection(id, connection_id)?;
                    for ds in datasets {
                        self.require_matrix_set(id, &ds.tile_matrix_set)?;
                    }
                }
                TileStoreConfig::Merge { stores } => {
                    for store in stores {
                        if !self.tile_stores.contains_key(store) {
                            return Err(StoreError::Config(format!(
                                "tile store '{}' merges unknown tile store '{}'",
                                id, store
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn require_connection(&self, owner: &str, connection_id: &str) -> Result<()> {
        if self.connections.contains_key(connection_id) {
            Ok(())
        } else {
            Err(StoreError::Config(format!(
                "store '{}' references unknown connection '{}'",
                owner, connection_id
            )))
        }
    }

    fn require_matrix_set(&self, owner: &str, tms_id: &str) -> Result<()> {
        if self.tile_matrix_sets.contains_key(tms_id) {
            Ok(())
        } else {
            Err(StoreError::Config(format!(
                "tile store '{}' references unknown tile matrix set '{}'",
                owner, tms_id
            )))
        }
    }
}
