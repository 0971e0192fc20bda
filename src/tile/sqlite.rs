//! Tiles as rows of a `tiles` table, keyed by (dataset, level, x, y)

use super::format::{parse_image_format, EncodedTile};
use super::{
    DefaultTileDataSet, Tile, TileDataLevel, TileDataSet, TileLimits, TileMatrix, TileMatrixSet, TileStore,
    TileStoreTransaction,
};
use crate::config::TileDataSetConfig;
use crate::sql::ConnectionProvider;
use crate::{Result, StoreError};
use image::ImageFormat;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const CREATE_TILES: &str = "CREATE TABLE IF NOT EXISTS tiles (
    dataset TEXT NOT NULL,
    level TEXT NOT NULL,
    x INTEGER NOT NULL,
    y INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (dataset, level, x, y)
)";

const SELECT_TILE: &str = "SELECT data FROM tiles WHERE dataset = ?1 AND level = ?2 AND x = ?3 AND y = ?4";

const UPSERT_TILE: &str = "INSERT INTO tiles (dataset, level, x, y, data) VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (dataset, level, x, y) DO UPDATE SET data = excluded.data";

const DELETE_TILE: &str = "DELETE FROM tiles WHERE dataset = ?1 AND level = ?2 AND x = ?3 AND y = ?4";

/// Where a dataset's rows live
#[derive(Clone)]
struct TileTable {
    provider: Arc<dyn ConnectionProvider>,
    connection_id: String,
    dataset: String,
    format: ImageFormat,
}

impl TileTable {
    fn read(&self, level: &str, x: u64, y: u64) -> Result<Option<Vec<u8>>> {
        let conn = self.provider.acquire(&self.connection_id)?;
        conn.prepare_cached(SELECT_TILE)
            .and_then(|mut stmt| {
                stmt.query_row(params![self.dataset, level, x as i64, y as i64], |row| row.get(0))
                    .optional()
            })
            .map_err(|e| StoreError::TileIo(format!("reading {}/{}/{}/{}: {}", self.dataset, level, x, y, e)))
    }

    fn write(&self, level: &str, x: u64, y: u64, data: &[u8]) -> Result<()> {
        let conn = self.provider.acquire(&self.connection_id)?;
        conn.execute(UPSERT_TILE, params![self.dataset, level, x as i64, y as i64, data])
            .map_err(|e| StoreError::TileIo(format!("writing {}/{}/{}/{}: {}", self.dataset, level, x, y, e)))?;
        Ok(())
    }

    fn remove(&self, level: &str, x: u64, y: u64) -> Result<()> {
        let conn = self.provider.acquire(&self.connection_id)?;
        conn.execute(DELETE_TILE, params![self.dataset, level, x as i64, y as i64])
            .map_err(|e| StoreError::TileIo(format!("deleting {}/{}/{}/{}: {}", self.dataset, level, x, y, e)))?;
        Ok(())
    }
}

struct SqliteLevel {
    matrix: TileMatrix,
    limits: Option<TileLimits>,
    table: TileTable,
}

impl TileDataLevel for SqliteLevel {
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
        Ok(self.table.read(&self.matrix.id, x, y)?.map(|bytes| {
            Box::new(EncodedTile::new(bytes, self.table.format, self.matrix.tile_envelope(x, y))) as Box<dyn Tile>
        }))
    }
}

/// Writable tile store inside a SQLite database
pub struct SqliteTileStore {
    provider: Arc<dyn ConnectionProvider>,
    connection_id: String,
    datasets: BTreeMap<String, (Arc<dyn TileDataSet>, TileTable)>,
}

impl SqliteTileStore {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        connection_id: impl Into<String>,
        matrix_sets: &BTreeMap<String, Arc<TileMatrixSet>>,
        datasets: &[TileDataSetConfig],
    ) -> Result<Self> {
        let connection_id = connection_id.into();
        let mut built = BTreeMap::new();

        for ds in datasets {
            let tms = matrix_sets.get(&ds.tile_matrix_set).ok_or_else(|| {
                StoreError::Config(format!(
                    "tile data set '{}': unknown tile matrix set '{}'",
                    ds.id, ds.tile_matrix_set
                ))
            })?;
            let table = TileTable {
                provider: Arc::clone(&provider),
                connection_id: connection_id.clone(),
                dataset: ds.id.clone(),
                format: parse_image_format(&ds.image_format)?,
            };
            let levels = tms
                .matrices()
                .iter()
                .map(|m| {
                    Arc::new(SqliteLevel {
                        matrix: m.clone(),
                        limits: ds.limits.get(&m.id).copied(),
                        table: table.clone(),
                    }) as Arc<dyn TileDataLevel>
                })
                .collect();
            let dataset = DefaultTileDataSet::new(ds.id.clone(), Arc::clone(tms), ds.image_format.clone(), levels)?;
            if built
                .insert(ds.id.clone(), (Arc::new(dataset) as Arc<dyn TileDataSet>, table))
                .is_some()
            {
                return Err(StoreError::Config(format!("duplicate tile data set id '{}'", ds.id)));
            }
        }

        Ok(Self {
            provider,
            connection_id,
            datasets: built,
        })
    }
}

impl TileStore for SqliteTileStore {
    fn init(&self) -> Result<()> {
        let conn = self.provider.acquire(&self.connection_id)?;
        conn.execute_batch(CREATE_TILES)?;
        debug!(connection = %self.connection_id, datasets = self.datasets.len(), "tiles table ready");
        Ok(())
    }

    fn tile_data_set_ids(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    fn tile_data_set(&self, id: &str) -> Option<Arc<dyn TileDataSet>> {
        self.datasets.get(id).map(|(ds, _)| Arc::clone(ds))
    }

    fn acquire_transaction(&self, id: &str) -> Result<Box<dyn TileStoreTransaction>> {
        let (dataset, table) = self
            .datasets
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("tile data set '{}'", id)))?;
        Ok(Box::new(SqliteTransaction {
            dataset: Arc::clone(dataset),
            table: table.clone(),
        }))
    }
}

struct SqliteTransaction {
    dataset: Arc<dyn TileDataSet>,
    table: TileTable,
}

impl TileStoreTransaction for SqliteTransaction {
    fn tile_data_set(&self) -> &Arc<dyn TileDataSet> {
        &self.dataset
    }

    fn put(&mut self, level_id: &str, tile: &dyn Tile, x: u64, y: u64) -> Result<()> {
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
        let bytes = tile.as_encoded_bytes(self.dataset.native_image_format())?;
        self.table.write(level_id, x, y, &bytes)
    }

    fn delete(&mut self, level_id: &str, x: u64, y: u64) -> Result<()> {
        self.table.remove(level_id, x, y)
    }
}
