//! Process-lifetime memoization
//!
//! [`Store`] is a string-keyed map backing the credential cache, the
//! connection cache and the four fact caches. Entries are never evicted.

use dashmap::DashMap;

/// A concurrent, string-keyed store of cloned values
#[derive(Debug)]
pub struct Store<V> {
    entries: DashMap<String, V>,
}

impl<V> Default for Store<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V: Clone> Store<V> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the value stored under `key`
    pub fn get(&self, key: &str) -> Option<V> {
        // Clone out so no shard guard outlives this call
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    /// Whether anything is stored under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Memo of facts known to hold
///
/// Only positive facts are recorded. A miss means "unknown, ask the database
/// again"; a hit means "true for the rest of the process lifetime", even if
/// the database is later changed behind our back.
#[derive(Debug, Default)]
pub struct FactCache {
    known: Store<()>,
}

impl FactCache {
    /// Create an empty fact cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the fact under `key` is known to hold
    pub fn holds(&self, key: &str) -> bool {
        self.known.contains(key)
    }

    /// Record that the fact under `key` holds
    pub fn record(&self, key: impl Into<String>) {
        self.known.put(key, ());
    }

    /// Number of recorded facts
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether no fact has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
