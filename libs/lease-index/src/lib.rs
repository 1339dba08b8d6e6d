//! lease-index
//!
//! Two small concurrent maps shared process-wide by every machine's
//! placement state: `leaseId -> hostname` and `vmId -> hostname`. Neither
//! map owns the values it indexes -- a machine publishes into them when a
//! lease/vm identity is accepted and retracts the entry on removal or
//! eviction. Kept as its own single-purpose crate the way `client-protection`
//! wraps a bare `DashMap` cache rather than folding it into the caller.
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

use dashmap::{DashMap, mapref::entry::Entry};
use std::{borrow::Borrow, fmt, hash::Hash};

/// A concurrent `key -> hostname` index with atomic insert-if-absent and
/// atomic remove, backed by a [`DashMap`].
pub struct HostIndex<K: Eq + Hash> {
    map: DashMap<K, String>,
}

impl<K: Eq + Hash> Default for HostIndex<K> {
    fn default() -> Self {
        Self { map: DashMap::new() }
    }
}

impl<K: Eq + Hash> fmt::Debug for HostIndex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostIndex").field("len", &self.map.len()).finish()
    }
}

impl<K: Eq + Hash + Clone> HostIndex<K> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key -> hostname` iff `key` is not already present.
    /// Returns `true` if the insert happened.
    pub fn insert_if_absent(&self, key: K, hostname: impl Into<String>) -> bool {
        match self.map.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(hostname.into());
                true
            }
        }
    }

    /// Unconditionally publish `key -> hostname`, overwriting any prior
    /// mapping. Used when a vmId at a hostname is replaced.
    pub fn publish(&self, key: K, hostname: impl Into<String>) {
        self.map.insert(key, hostname.into());
    }

    /// Remove `key`, returning the hostname it mapped to if present.
    pub fn remove<Q>(&self, key: &Q) -> Option<String>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.remove(key).map(|(_, v)| v)
    }

    /// Look up the hostname for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<String>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.get(key).map(|r| r.value().clone())
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_if_absent_rejects_duplicates() {
        let idx: HostIndex<String> = HostIndex::new();
        assert!(idx.insert_if_absent("lease-1".into(), "host-a"));
        assert!(!idx.insert_if_absent("lease-1".into(), "host-b"));
        assert_eq!(idx.get("lease-1"), Some("host-a".to_string()));
    }

    #[test]
    fn publish_overwrites() {
        let idx: HostIndex<String> = HostIndex::new();
        idx.publish("vm-1".into(), "host-a");
        idx.publish("vm-1".into(), "host-b");
        assert_eq!(idx.get("vm-1"), Some("host-b".to_string()));
    }

    #[test]
    fn remove_returns_prior_hostname() {
        let idx: HostIndex<String> = HostIndex::new();
        idx.publish("lease-1".into(), "host-a");
        assert_eq!(idx.remove("lease-1"), Some("host-a".to_string()));
        assert_eq!(idx.remove("lease-1"), None);
        assert!(idx.is_empty());
    }
}
