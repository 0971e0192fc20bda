//! Feature store transactions
//!
//! A transaction is a mutation scope, not an isolation level: concurrent
//! transactions on one store commit last-write-wins. A failed `perform_*` call
//! leaves the transaction open; the caller decides between commit and rollback.

pub mod lock_manager;
pub mod splice;

pub use lock_manager::{FeatureLockManager, LockToken};
pub use splice::{apply as apply_replacement, ParsedPropertyReplacement, UpdateAction};

use crate::query::Filter;
use crate::types::Feature;
use crate::Result;

pub trait FeatureStoreTransaction: Send {
    /// Adds features; empty ids are generated. Returns the final ids in order
    fn perform_insert(&mut self, features: Vec<Feature>) -> Result<Vec<String>>;

    /// Splices every replacement into each matching feature; returns the match count
    fn perform_update(
        &mut self,
        type_name: &str,
        replacements: &[ParsedPropertyReplacement],
        filter: &dyn Filter,
        lock: Option<&LockToken>,
    ) -> Result<usize>;

    /// Removes matching features; returns how many went
    fn perform_delete(&mut self, type_name: &str, filter: &dyn Filter, lock: Option<&LockToken>) -> Result<usize>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}
