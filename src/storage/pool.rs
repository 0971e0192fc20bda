//! Bounded Resource Pool
//!
//! Fixed-capacity, reference-counted registry of open handles keyed by resource
//! (canonical file path, connection id, ...).
//!
//! ## Features
//! - Exclusive per-borrow handles: a handle is never shared by two borrowers
//! - RAII guards: handles go back to the pool on drop, including during unwinding
//! - Idle handles are reused per key; when the pool is full the least recently
//!   returned idle handle of any key is closed to make room
//! - Borrowers block (bounded by a timeout) while every handle is in use

use crate::config::PoolConfig;
use crate::{Result, StoreError};
use ahash::AHashMap;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type Opener<K, R> = Box<dyn Fn(&K) -> Result<R> + Send + Sync>;

struct PoolState<K: Hash + Eq, R> {
    /// Idle handles per key
    idle: AHashMap<K, Vec<R>>,
    /// Keys with idle handles, least recently returned first
    idle_order: LruCache<K, ()>,
    /// Borrowed handles per key
    borrowed: AHashMap<K, usize>,
    /// Idle + borrowed
    open: usize,
    closed: bool,
}

impl<K: Hash + Eq + Clone, R> PoolState<K, R> {
    fn take_idle(&mut self, key: &K) -> Option<R> {
        let handles = self.idle.get_mut(key)?;
        let handle = handles.pop();
        if handles.is_empty() {
            self.idle.remove(key);
            self.idle_order.pop(key);
        }
        handle
    }

    fn put_idle(&mut self, key: K, handle: R) {
        self.idle.entry(key.clone()).or_default().push(handle);
        self.idle_order.put(key, ());
    }

    /// Closes one idle handle of the least recently used key
    fn evict_one(&mut self) -> bool {
        let key = match self.idle_order.peek_lru() {
            Some((key, _)) => key.clone(),
            None => return false,
        };
        match self.take_idle(&key) {
            Some(handle) => {
                drop(handle);
                self.open -= 1;
                true
            }
            None => false,
        }
    }

    fn mark_borrowed(&mut self, key: &K) {
        *self.borrowed.entry(key.clone()).or_insert(0) += 1;
    }

    fn unmark_borrowed(&mut self, key: &K) {
        if let Some(count) = self.borrowed.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.borrowed.remove(key);
            }
        }
    }
}

struct PoolInner<K: Hash + Eq, R> {
    name: String,
    capacity: usize,
    wait_timeout: Duration,
    opener: Opener<K, R>,
    state: Mutex<PoolState<K, R>>,
    released: Condvar,
}

/// Fixed-capacity pool of exclusive handles (thread-safe, cheap to clone)
pub struct ResourcePool<K: Hash + Eq, R> {
    inner: Arc<PoolInner<K, R>>,
}

impl<K: Hash + Eq, R> Clone for ResourcePool<K, R> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<K, R> ResourcePool<K, R>
where
    K: Hash + Eq + Clone + Debug + Send + 'static,
    R: Send + 'static,
{
    /// Create a pool that opens handles with `opener`
    pub fn new<F>(name: impl Into<String>, config: PoolConfig, opener: F) -> Self
    where
        F: Fn(&K) -> Result<R> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                capacity: config.capacity.max(1),
                wait_timeout: Duration::from_millis(config.wait_timeout_ms),
                opener: Box::new(opener),
                state: Mutex::new(PoolState {
                    idle: AHashMap::new(),
                    idle_order: LruCache::unbounded(),
                    borrowed: AHashMap::new(),
                    open: 0,
                    closed: false,
                }),
                released: Condvar::new(),
            }),
        }
    }

    /// Borrow an exclusive handle for `key`
    ///
    /// Reuses an idle handle when one exists, opens a new one while below capacity,
    /// otherwise evicts an idle handle of another key or waits for a release.
    pub fn acquire(&self, key: &K) -> Result<PooledResource<K, R>> {
        let deadline = Instant::now() + self.inner.wait_timeout;
        let mut state = self.inner.state.lock();

        loop {
            if state.closed {
                return Err(StoreError::Unavailable(format!("pool '{}' is closed", self.inner.name)));
            }

            if let Some(handle) = state.take_idle(key) {
                state.mark_borrowed(key);
                return Ok(self.guard(key, handle));
            }

            if state.open >= self.inner.capacity && state.evict_one() {
                debug!(pool = %self.inner.name, "evicted idle handle to make room for {:?}", key);
            }

            if state.open < self.inner.capacity {
                state.open += 1;
                state.mark_borrowed(key);
                drop(state);

                return match (self.inner.opener)(key) {
                    Ok(handle) => Ok(self.guard(key, handle)),
                    Err(e) => {
                        let mut state = self.inner.state.lock();
                        state.open -= 1;
                        state.unmark_borrowed(key);
                        self.inner.released.notify_one();
                        Err(e)
                    }
                };
            }

            if self.inner.released.wait_until(&mut state, deadline).timed_out() {
                warn!(pool = %self.inner.name, "timed out waiting for a handle for {:?}", key);
                return Err(StoreError::ResourceExhausted(format!(
                    "pool '{}': all {} handles busy",
                    self.inner.name, self.inner.capacity
                )));
            }
        }
    }

    fn guard(&self, key: &K, handle: R) -> PooledResource<K, R> {
        PooledResource {
            resource: Some(handle),
            key: key.clone(),
            pool: self.inner.clone(),
        }
    }

    /// Number of handles currently borrowed for `key`
    pub fn ref_count(&self, key: &K) -> usize {
        self.inner.state.lock().borrowed.get(key).copied().unwrap_or(0)
    }

    /// Idle + borrowed handles
    pub fn open_count(&self) -> usize {
        self.inner.state.lock().open
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.values().map(Vec::len).sum()
    }

    /// Close idle handles and refuse further borrows; borrowed handles close on return
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        let idle: usize = state.idle.values().map(Vec::len).sum();
        state.idle.clear();
        state.idle_order.clear();
        state.open -= idle;
        state.closed = true;
        self.inner.released.notify_all();
        debug!(pool = %self.inner.name, closed = idle, "pool closed");
    }
}

/// Borrowed handle (RAII-managed)
pub struct PooledResource<K: Hash + Eq + Clone, R> {
    resource: Option<R>,
    key: K,
    pool: Arc<PoolInner<K, R>>,
}

impl<K: Hash + Eq + Clone, R> PooledResource<K, R> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Hash + Eq + Clone, R> Deref for PooledResource<K, R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().expect("pooled resource is present until drop")
    }
}

impl<K: Hash + Eq + Clone, R> DerefMut for PooledResource<K, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("pooled resource is present until drop")
    }
}

impl<K: Hash + Eq + Clone, R> Drop for PooledResource<K, R> {
    fn drop(&mut self) {
        let Some(handle) = self.resource.take() else {
            return;
        };
        let mut state = self.pool.state.lock();
        state.unmark_borrowed(&self.key);
        if state.closed {
            state.open -= 1;
            drop(handle);
        } else {
            state.put_idle(self.key.clone(), handle);
        }
        self.pool.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting_pool(capacity: usize, wait_ms: u64) -> (ResourcePool<String, usize>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let pool = ResourcePool::new(
            "test",
            PoolConfig { capacity, wait_timeout_ms: wait_ms },
            move |_key: &String| Ok(counter.fetch_add(1, Ordering::SeqCst)),
        );
        (pool, opened)
    }

    #[test]
    fn test_idle_handle_is_reused() {
        let (pool, opened) = counting_pool(2, 100);
        let key = "a.tif".to_string();
        {
            let handle = pool.acquire(&key).unwrap();
            assert_eq!(*handle, 0);
            assert_eq!(pool.ref_count(&key), 1);
        }
        assert_eq!(pool.ref_count(&key), 0);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.acquire(&key).unwrap();
        assert_eq!(*again, 0);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_borrows_are_exclusive() {
        let (pool, _) = counting_pool(2, 100);
        let key = "a.tif".to_string();
        let first = pool.acquire(&key).unwrap();
        let second = pool.acquire(&key).unwrap();
        assert_ne!(*first, *second);
        assert_eq!(pool.ref_count(&key), 2);
        assert_eq!(pool.open_count(), 2);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let (pool, _) = counting_pool(1, 20);
        let _held = pool.acquire(&"a".to_string()).unwrap();
        assert!(matches!(
            pool.acquire(&"b".to_string()),
            Err(StoreError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let (pool, _) = counting_pool(1, 2_000);
        let held = pool.acquire(&"a".to_string()).unwrap();

        let waiter_pool = pool.clone();
        let waiter = thread::spawn(move || waiter_pool.acquire(&"a".to_string()).map(|h| *h));

        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_full_pool_evicts_idle_of_other_key() {
        let (pool, opened) = counting_pool(1, 50);
        drop(pool.acquire(&"a".to_string()).unwrap());
        let b = pool.acquire(&"b".to_string()).unwrap();
        assert_eq!(*b, 1);
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn test_handle_returned_when_borrower_panics() {
        let (pool, _) = counting_pool(1, 50);
        let key = "a".to_string();
        let panicking = pool.clone();
        let k = key.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _handle = panicking.acquire(&k).unwrap();
            panic!("decode blew up");
        }));
        assert!(result.is_err());
        assert_eq!(pool.ref_count(&key), 0);
        assert!(pool.acquire(&key).is_ok());
    }

    #[test]
    fn test_failed_open_releases_slot() {
        let pool: ResourcePool<String, ()> = ResourcePool::new(
            "failing",
            PoolConfig { capacity: 1, wait_timeout_ms: 20 },
            |key: &String| Err(StoreError::NotFound(key.clone())),
        );
        assert!(matches!(pool.acquire(&"x".to_string()), Err(StoreError::NotFound(_))));
        assert_eq!(pool.open_count(), 0);
        assert_eq!(pool.ref_count(&"x".to_string()), 0);
    }

    #[test]
    fn test_close_refuses_new_borrows() {
        let (pool, _) = counting_pool(2, 20);
        let held = pool.acquire(&"a".to_string()).unwrap();
        drop(pool.acquire(&"b".to_string()).unwrap());
        pool.close();
        assert_eq!(pool.open_count(), 1);
        assert!(matches!(pool.acquire(&"a".to_string()), Err(StoreError::Unavailable(_))));
        drop(held);
        assert_eq!(pool.open_count(), 0);
    }
}
