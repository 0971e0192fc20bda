//! Feature stores
//!
//! [`crate::sql::SqlFeatureStore`] serves one feature type from SQL statements and is
//! read-only. [`MemoryFeatureStore`] keeps features in memory and supports
//! transactions and feature locks.

mod memory;

pub use memory::MemoryFeatureStore;

use crate::query::{FeatureResultSet, Query};
use crate::txn::{FeatureLockManager, FeatureStoreTransaction};
use crate::types::{Envelope, FeatureType};
use crate::{Result, StoreError};

pub trait FeatureStore: Send + Sync {
    fn init(&self) -> Result<()>;

    /// Releases resources; the store is unavailable afterwards
    fn destroy(&self);

    fn is_available(&self) -> bool;

    /// Feature type served by this store, once initialized
    fn schema(&self) -> Option<FeatureType>;

    /// Runs every query and chains the results in query order
    fn query(&self, queries: &[Query]) -> Result<FeatureResultSet>;

    fn query_hits(&self, queries: &[Query]) -> Result<usize> {
        self.query(queries)?.try_fold(0, |n, f| f.map(|_| n + 1))
    }

    /// Extent of the features of `type_name`; `None` when unknown or unavailable
    fn envelope(&self, type_name: &str) -> Option<Envelope>;

    fn acquire_transaction(&self) -> Result<Box<dyn FeatureStoreTransaction>> {
        Err(StoreError::Unsupported("feature store is read-only".into()))
    }

    fn lock_manager(&self) -> Option<&FeatureLockManager> {
        None
    }
}
