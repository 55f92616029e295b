//! Object-URL Cache
//!
//! Maps a resource key to the handle created for it, so the same resource
//! is fetched and allocated at most once per session. Invariant: at most one
//! live entry per key, and every cached handle appears under exactly one key.
//!
//! Entries also count their holders. Display components hold a lease on the
//! handle they render; the handle is revoked when the last lease is released.

use std::collections::HashMap;
use std::sync::Arc;

use super::handle::{HandleRegistry, LocalHandle};

#[derive(Debug)]
struct CacheEntry {
    handle: LocalHandle,
    holders: usize,
}

/// Result of releasing a lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Other holders remain
    Held(usize),
    /// Last holder left; the entry for this key was removed and revoked
    Revoked(String),
    /// Handle is not cached (already revoked or never cached)
    NotCached,
}

/// Resource key → handle mapping
pub struct ObjectUrlCache {
    registry: Arc<HandleRegistry>,
    entries: HashMap<String, CacheEntry>,
    /// Reverse index: handle → key
    by_handle: HashMap<LocalHandle, String>,
}

impl ObjectUrlCache {
    pub fn new(registry: Arc<HandleRegistry>) -> Self {
        Self {
            registry,
            entries: HashMap::new(),
            by_handle: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<LocalHandle> {
        self.entries.get(key).map(|entry| entry.handle.clone())
    }

    /// Store a handle under a key
    ///
    /// A different handle already stored under the key is revoked, so
    /// overwriting never orphans a live handle.
    pub fn set(&mut self, key: impl Into<String>, handle: LocalHandle) {
        let key = key.into();
        if self.entries.get(&key).is_some_and(|entry| entry.handle == handle) {
            return;
        }

        if let Some(other_key) = self.by_handle.insert(handle.clone(), key.clone()) {
            if other_key != key {
                self.entries.remove(&other_key);
            }
        }

        let displaced = self.entries.insert(
            key.clone(),
            CacheEntry {
                handle,
                holders: 0,
            },
        );

        if let Some(displaced) = displaced {
            tracing::warn!(
                key = %key,
                handle = %displaced.handle,
                "Replacing cached handle; revoking the old one"
            );
            self.by_handle.remove(&displaced.handle);
            self.registry.revoke(&displaced.handle);
        }
    }

    /// Drop the entry for a key without revoking its handle
    pub fn remove(&mut self, key: &str) -> Option<LocalHandle> {
        let entry = self.entries.remove(key)?;
        self.by_handle.remove(&entry.handle);
        Some(entry.handle)
    }

    /// Drop whichever entry references this handle, returning its key
    pub fn remove_handle(&mut self, handle: &LocalHandle) -> Option<String> {
        let key = self.by_handle.remove(handle)?;
        self.entries.remove(&key);
        Some(key)
    }

    /// Revoke every cached handle and empty the cache
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            self.registry.revoke(&entry.handle);
        }
        self.by_handle.clear();
        count
    }

    /// Take a lease on the entry for `key` if it still holds `handle`
    pub fn retain(&mut self, key: &str, handle: &LocalHandle) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.handle == *handle => {
                entry.holders += 1;
                true
            }
            _ => false,
        }
    }

    /// Give back a lease; the last one out revokes the handle
    pub fn release(&mut self, handle: &LocalHandle) -> Release {
        let Some(key) = self.by_handle.get(handle).cloned() else {
            return Release::NotCached;
        };
        let Some(entry) = self.entries.get_mut(&key) else {
            return Release::NotCached;
        };

        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders > 0 {
            return Release::Held(entry.holders);
        }

        self.entries.remove(&key);
        self.by_handle.remove(handle);
        self.registry.revoke(handle);
        Release::Revoked(key)
    }

    pub fn holders(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.holders)
    }

    pub fn contains_handle(&self, handle: &LocalHandle) -> bool {
        self.by_handle.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
