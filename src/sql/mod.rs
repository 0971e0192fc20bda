//! SQL-backed feature access
//!
//! Connections come from a [`ConnectionProvider`]; [`SqlFeatureStore`] turns
//! bbox-bound statements into features.

mod connection;
mod lod;
mod schema;
mod store;

pub use connection::{
    apply_limit, register_spatial_functions, ConnectionProvider, Dialect, PooledConnection, SqliteConnectionProvider,
};
pub use lod::{LodTable, BASE_LOD};
pub use schema::{derive_schema, map_column_type, ColumnMapping, Schema};
pub use store::SqlFeatureStore;
