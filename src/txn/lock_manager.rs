//! Feature-Level Lock Manager
//!
//! Locks are exclusive and non-blocking: a request for a feature someone else holds
//! fails immediately. A lock belongs to a token rather than a transaction, so a
//! client can lock features, then mutate them later from any transaction that
//! presents the token.

use crate::{Result, StoreError};
use ahash::AHashSet;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle for a set of locked features
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct FeatureLockManager {
    /// feature id -> holding token
    locks: DashMap<String, LockToken>,
    /// token -> feature ids it holds
    held: DashMap<LockToken, AHashSet<String>>,
    next_token: AtomicU64,
    /// Serializes multi-feature acquisition so it is all-or-nothing
    acquire: Mutex<()>,
}

impl Default for FeatureLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureLockManager {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            held: DashMap::new(),
            next_token: AtomicU64::new(1),
            acquire: Mutex::new(()),
        }
    }

    /// Lock every id under a fresh token, or none of them
    pub fn lock<I, S>(&self, ids: I) -> Result<LockToken>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let token = LockToken(format!("lock-{}", self.next_token.fetch_add(1, Ordering::Relaxed)));

        let _guard = self.acquire.lock();
        if let Some(taken) = ids.iter().find(|id| self.locks.contains_key(*id)) {
            return Err(StoreError::Locked(format!("feature '{}' is already locked", taken)));
        }
        for id in &ids {
            self.locks.insert(id.clone(), token.clone());
        }
        self.held.insert(token.clone(), ids.into_iter().collect());
        Ok(token)
    }

    /// Adds ids to an existing token's lock set
    pub fn extend(&self, token: &LockToken, ids: &[&str]) -> Result<()> {
        let _guard = self.acquire.lock();
        if !self.held.contains_key(token) {
            return Err(StoreError::NotFound(format!("lock token '{}'", token)));
        }
        for id in ids {
            if let Some(holder) = self.locks.get(*id) {
                if holder.value() != token {
                    return Err(StoreError::Locked(format!("feature '{}' is already locked", id)));
                }
            }
        }
        for id in ids {
            if let Entry::Vacant(slot) = self.locks.entry(id.to_string()) {
                slot.insert(token.clone());
            }
        }
        if let Some(mut set) = self.held.get_mut(token) {
            set.extend(ids.iter().map(|id| id.to_string()));
        }
        Ok(())
    }

    /// Drops every lock held by `token`; returns how many features were freed
    pub fn release(&self, token: &LockToken) -> usize {
        let Some((_, ids)) = self.held.remove(token) else {
            return 0;
        };
        for id in &ids {
            self.locks.remove_if(id, |_, holder| holder == token);
        }
        ids.len()
    }

    /// Fails when `id` is locked under a token other than `presented`
    pub fn check(&self, id: &str, presented: Option<&LockToken>) -> Result<()> {
        match self.locks.get(id) {
            Some(holder) if Some(holder.value()) != presented => Err(StoreError::Locked(format!(
                "feature '{}' is locked by another client",
                id
            ))),
            _ => Ok(()),
        }
    }

    /// Forgets a feature that no longer exists
    pub fn forget(&self, id: &str) {
        if let Some((_, token)) = self.locks.remove(id) {
            if let Some(mut set) = self.held.get_mut(&token) {
                set.remove(id);
            }
        }
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.locks.contains_key(id)
    }
}
