//! Geospatial persistence layer
//!
//! Storage backends behind OGC-style service front-ends:
//!
//! - tile stores addressed through tile matrix sets ([`tile`]), backed by
//!   georeferenced raster files, directory trees or SQLite tables
//! - feature stores ([`feature`]), SQL-backed with level-of-detail routing and a
//!   cached extent, or in memory with transactions and feature locks
//! - a lazy result pipeline for feature queries ([`query`])
//!
//! Stores are usually built from a [`WorkspaceConfig`] through a
//! [`StoreRegistry`], which owns their lifecycle.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod feature;
pub mod query;
pub mod raster;
pub mod sql;
pub mod storage;
pub mod tile;
pub mod txn;
pub mod types;

mod error;

pub use catalog::StoreRegistry;
pub use config::WorkspaceConfig;
pub use error::{Result, StoreError};
pub use feature::{FeatureStore, MemoryFeatureStore};
pub use query::{FeatureResultSet, Filter, Query};
pub use sql::SqlFeatureStore;
pub use tile::{Tile, TileDataLevel, TileDataSet, TileStore, TileStoreTransaction};
pub use txn::{FeatureStoreTransaction, ParsedPropertyReplacement, UpdateAction};
pub use types::{Crs, Envelope, Feature, FeatureType, Geometry, Value};
