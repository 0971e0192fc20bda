//! Storage plumbing shared by the stores
//!
//! Pooled handles to native resources (SQLite connections, raster datasets)

pub mod pool;

pub use pool::{PooledResource, ResourcePool};
