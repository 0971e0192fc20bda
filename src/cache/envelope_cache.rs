//! Time-bounded cache for a store's spatial extent
//!
//! Computing a feature store's envelope means a full-table aggregate, so the result is
//! kept for a short TTL. The mutex is held across a refresh: concurrent callers wait
//! for the one running query instead of issuing their own.

use crate::types::Envelope;
use crate::Result;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Cache statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Refreshes that returned an error
    pub failures: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Slot {
    entry: Option<(Instant, Envelope)>,
    stats: CacheStats,
}

pub struct EnvelopeCache {
    ttl: Duration,
    slot: Mutex<Slot>,
}

impl EnvelopeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(Slot {
                entry: None,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Cached envelope if younger than the TTL, otherwise the result of `refresh`
    ///
    /// A failed refresh drops the stale entry.
    pub fn get_or_refresh<F>(&self, refresh: F) -> Result<Envelope>
    where
        F: FnOnce() -> Result<Envelope>,
    {
        let mut slot = self.slot.lock();
        if let Some((at, env)) = &slot.entry {
            if at.elapsed() < self.ttl {
                let env = env.clone();
                slot.stats.hits += 1;
                return Ok(env);
            }
        }

        slot.stats.misses += 1;
        match refresh() {
            Ok(env) => {
                slot.entry = Some((Instant::now(), env.clone()));
                Ok(env)
            }
            Err(e) => {
                slot.entry = None;
                slot.stats.failures += 1;
                Err(e)
            }
        }
    }

    pub fn invalidate(&self) {
        self.slot.lock().entry = None;
    }

    pub fn stats(&self) -> CacheStats {
        self.slot.lock().stats
    }
}
