//! Store registry
//!
//! Builds every configured store, initializes them in dependency order and tears
//! them down in reverse. Merge stores depend on the stores they wrap; SQL-backed
//! stores share one connection provider, which is closed last.

use crate::config::{TileStoreConfig, WorkspaceConfig};
use crate::feature::FeatureStore;
use crate::raster::RasterDriver;
use crate::sql::{ConnectionProvider, SqlFeatureStore, SqliteConnectionProvider};
use crate::tile::{FileSystemTileStore, MergingTileStore, RasterTileStore, SqliteTileStore, TileMatrixSet, TileStore};
use crate::types::{CoordinateTransformer, IdentityTransformer};
use crate::{Result, StoreError};
use ahash::AHashMap;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
enum StoreId {
    Feature(String),
    Tile(String),
}

pub struct StoreRegistry {
    matrix_sets: BTreeMap<String, Arc<TileMatrixSet>>,
    provider: Arc<dyn ConnectionProvider>,
    feature_stores: DashMap<String, Arc<dyn FeatureStore>>,
    tile_stores: DashMap<String, Arc<dyn TileStore>>,
    /// Construction order; dependencies come first
    order: Vec<StoreId>,
}

impl StoreRegistry {
    /// Builds all stores; features are used in their native CRS only
    pub fn from_config(config: &WorkspaceConfig, driver: Arc<dyn RasterDriver>) -> Result<Self> {
        Self::from_config_with_transformer(config, driver, Arc::new(IdentityTransformer))
    }

    pub fn from_config_with_transformer(
        config: &WorkspaceConfig,
        driver: Arc<dyn RasterDriver>,
        transformer: Arc<dyn CoordinateTransformer>,
    ) -> Result<Self> {
        config.validate()?;

        let mut matrix_sets = BTreeMap::new();
        for (id, tms) in &config.tile_matrix_sets {
            matrix_sets.insert(id.clone(), Arc::new(TileMatrixSet::from_config(id, tms)?));
        }
        let provider: Arc<dyn ConnectionProvider> = Arc::new(SqliteConnectionProvider::new(&config.connections));

        let feature_stores = DashMap::new();
        let tile_stores: DashMap<String, Arc<dyn TileStore>> = DashMap::new();
        let mut order = Vec::new();

        for (id, fs) in &config.feature_stores {
            let store = SqlFeatureStore::new(fs.clone(), Arc::clone(&provider), Arc::clone(&transformer))?;
            feature_stores.insert(id.clone(), Arc::new(store) as Arc<dyn FeatureStore>);
            order.push(StoreId::Feature(id.clone()));
        }

        for id in tile_store_order(&config.tile_stores)? {
            let store: Arc<dyn TileStore> = match &config.tile_stores[&id] {
                TileStoreConfig::Raster {
                    pool,
                    interpolation,
                    datasets,
                } => Arc::new(RasterTileStore::new(
                    &matrix_sets,
                    datasets,
                    Arc::clone(&driver),
                    *pool,
                    *interpolation,
                )?),
                TileStoreConfig::FileSystem { root, datasets } => {
                    Arc::new(FileSystemTileStore::new(root, &matrix_sets, datasets)?)
                }
                TileStoreConfig::Sqlite { connection_id, datasets } => Arc::new(SqliteTileStore::new(
                    Arc::clone(&provider),
                    connection_id.clone(),
                    &matrix_sets,
                    datasets,
                )?),
                TileStoreConfig::Merge { stores } => {
                    let members = stores
                        .iter()
                        .map(|s| {
                            tile_stores
                                .get(s)
                                .map(|r| Arc::clone(r.value()))
                                .ok_or_else(|| StoreError::Config(format!("tile store '{}' is not built yet", s)))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Arc::new(MergingTileStore::new(members))
                }
            };
            tile_stores.insert(id.clone(), store);
            order.push(StoreId::Tile(id));
        }

        debug!(
            feature_stores = feature_stores.len(),
            tile_stores = tile_stores.len(),
            "store registry built"
        );
        Ok(Self {
            matrix_sets,
            provider,
            feature_stores,
            tile_stores,
            order,
        })
    }

    /// Initializes every store in dependency order
    ///
    /// A store that fails stays registered but unavailable. Returns the ids of
    /// the stores that failed.
    pub fn init_all(&self) -> Vec<String> {
        let mut failed = Vec::new();
        for id in &self.order {
            let (name, outcome) = match id {
                StoreId::Feature(name) => (name, self.feature_store(name).map(|s| s.init())),
                StoreId::Tile(name) => (name, self.tile_store(name).map(|s| s.init())),
            };
            if let Some(Err(e)) = outcome {
                error!(store = %name, error = %e, transient = e.is_transient(), "store failed to initialize");
                failed.push(name.clone());
            }
        }
        info!(
            stores = self.order.len(),
            failed = failed.len(),
            "store registry initialized"
        );
        failed
    }

    /// Destroys stores in reverse construction order, then closes shared connections
    pub fn destroy_all(&self) {
        for id in self.order.iter().rev() {
            match id {
                StoreId::Feature(name) => {
                    if let Some(store) = self.feature_store(name) {
                        store.destroy();
                    }
                }
                StoreId::Tile(name) => {
                    if let Some(store) = self.tile_store(name) {
                        store.destroy();
                    }
                }
            }
        }
        self.provider.close();
        info!("store registry destroyed");
    }

    pub fn feature_store(&self, id: &str) -> Option<Arc<dyn FeatureStore>> {
        self.feature_stores.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn tile_store(&self, id: &str) -> Option<Arc<dyn TileStore>> {
        self.tile_stores.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn tile_matrix_set(&self, id: &str) -> Option<Arc<TileMatrixSet>> {
        self.matrix_sets.get(id).cloned()
    }

    pub fn connections(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }
}

/// Tile store ids with merge members ahead of the stores merging them
fn tile_store_order(stores: &BTreeMap<String, TileStoreConfig>) -> Result<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: &str,
        stores: &BTreeMap<String, TileStoreConfig>,
        marks: &mut AHashMap<String, Mark>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(StoreError::Config(format!("tile store '{}' merges itself", id)));
            }
            None => {}
        }
        marks.insert(id.to_string(), Mark::Visiting);
        if let Some(TileStoreConfig::Merge { stores: members }) = stores.get(id) {
            for member in members {
                if !stores.contains_key(member) {
                    return Err(StoreError::Config(format!(
                        "tile store '{}' merges unknown tile store '{}'",
                        id, member
                    )));
                }
                visit(member, stores, marks, out)?;
            }
        }
        marks.insert(id.to_string(), Mark::Done);
        out.push(id.to_string());
        Ok(())
    }

    let mut marks = AHashMap::new();
    let mut out = Vec::with_capacity(stores.len());
    for id in stores.keys() {
        visit(id, stores, &mut marks, &mut out)?;
    }
    Ok(out)
}
