//! Cache module - short-lived caches for expensive store-level aggregates

pub mod envelope_cache;

pub use envelope_cache::{CacheStats, EnvelopeCache};
