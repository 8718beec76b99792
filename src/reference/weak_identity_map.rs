//! Identity-keyed map with weakly held keys
//!
//! Keys are compared by object identity, never by value, and are held
//! through weak references bound to the map's own [`ReferenceQueue`]. Every
//! operation drains that queue first, so entries whose key has gone away
//! disappear without a background sweeper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::handle::Reference;
use super::queue::ReferenceQueue;
use crate::collector::ReferenceCollector;
use crate::identity::IdentityToken;

struct MapEntry<K, V> {
    /// Weak reference to the key, bound to the map queue
    key: Reference<K>,
    value: V,
}

/// Map from object identity to values, with weakly held keys.
///
/// Cloning the map yields another handle to the same entries.
///
/// # Examples
///
/// ```
/// use refqueue::WeakIdentityMap;
/// use std::sync::Arc;
///
/// let map = WeakIdentityMap::new();
/// let key = Arc::new(String::from("session"));
///
/// map.set(&key, 42);
/// assert_eq!(map.get(&key), Some(42));
///
/// // An equal value is a different object.
/// assert_eq!(map.get(&Arc::new(String::from("session"))), None);
///
/// drop(key);
/// assert_eq!(map.size(), 0);
/// assert!(map.keys().is_empty());
/// ```
pub struct WeakIdentityMap<K, V> {
    entries: Arc<DashMap<IdentityToken, MapEntry<K, V>>>,
    /// Receives key references once their object is gone
    queue: ReferenceQueue<K>,
    /// Tracks key references so collector sweeps clear them
    collector: Option<Arc<ReferenceCollector>>,
    /// Total number of entries ever inserted
    total_insertions: Arc<AtomicUsize>,
    /// Total number of entries removed because their key vanished
    total_gc_removals: Arc<AtomicUsize>,
    /// Total number of entries explicitly deleted
    total_explicit_deletions: Arc<AtomicUsize>,
}

impl<K, V> Clone for WeakIdentityMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            queue: self.queue.clone(),
            collector: self.collector.clone(),
            total_insertions: Arc::clone(&self.total_insertions),
            total_gc_removals: Arc::clone(&self.total_gc_removals),
            total_explicit_deletions: Arc::clone(&self.total_explicit_deletions),
        }
    }
}

impl<K: Send + Sync + 'static, V: Clone> WeakIdentityMap<K, V> {
    /// Create a map whose dead keys are noticed lazily on access
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            queue: ReferenceQueue::new(),
            collector: None,
            total_insertions: Arc::new(AtomicUsize::new(0)),
            total_gc_removals: Arc::new(AtomicUsize::new(0)),
            total_explicit_deletions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a map whose key references are tracked by `collector`.
    ///
    /// Dead keys are then cleared by [`ReferenceCollector::sweep`] as well as
    /// on access.
    pub fn with_collector(collector: &Arc<ReferenceCollector>) -> Self {
        Self {
            collector: Some(Arc::clone(collector)),
            ..Self::new()
        }
    }

    fn key_reference(&self, key: &Arc<K>) -> Reference<K> {
        match &self.collector {
            Some(collector) => collector.weak_uncached(key, Some(&self.queue)),
            None => Reference::weak(key, Some(&self.queue)),
        }
    }

    /// Drop every entry whose key reference has been cleared.
    ///
    /// Runs before every public operation. Returns the number of entries removed.
    pub fn purge_cleared_keys(&self) -> usize {
        let mut removed = 0;
        while let Some(key) = self.queue.pop_newest() {
            // A newer entry may own the identity now; only remove our own.
            if self
                .entries
                .remove_if(&key.identity(), |_, entry| entry.key == key)
                .is_some()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            self.total_gc_removals
                .fetch_add(removed, Ordering::Relaxed);
            tracing::trace!(removed, "purged entries with vanished keys");
        }
        removed
    }

    /// Get the value stored for `key`
    pub fn get(&self, key: &Arc<K>) -> Option<V> {
        self.purge_cleared_keys();
        self.entries
            .get(&IdentityToken::of(key))
            .filter(|entry| entry.key.points_to(key))
            .map(|entry| entry.value.clone())
    }

    /// Get the value for a key given by weak pointer; a dead key always misses
    pub fn get_weak(&self, key: &Weak<K>) -> Option<V> {
        match key.upgrade() {
            Some(key) => self.get(&key),
            None => {
                self.purge_cleared_keys();
                None
            }
        }
    }

    /// Whether `key` has an entry
    pub fn contains_key(&self, key: &Arc<K>) -> bool {
        self.purge_cleared_keys();
        self.entries
            .get(&IdentityToken::of(key))
            .is_some_and(|entry| entry.key.points_to(key))
    }

    /// Store `value` for `key`, returning the value it replaces
    pub fn set(&self, key: &Arc<K>, value: V) -> Option<V> {
        self.purge_cleared_keys();
        self.total_insertions.fetch_add(1, Ordering::Relaxed);

        match self.entries.entry(IdentityToken::of(key)) {
            Entry::Occupied(mut occupied) if occupied.get().key.points_to(key) => {
                Some(std::mem::replace(&mut occupied.get_mut().value, value))
            }
            Entry::Occupied(mut occupied) => {
                // Left behind by a key whose clearing is still in flight.
                let stale = occupied.insert(MapEntry {
                    key: self.key_reference(key),
                    value,
                });
                stale.key.invalidate();
                None
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MapEntry {
                    key: self.key_reference(key),
                    value,
                });
                None
            }
        }
    }

    /// Remove the entry for `key`, returning its value
    pub fn delete(&self, key: &Arc<K>) -> Option<V> {
        self.purge_cleared_keys();
        let (_, entry) = self
            .entries
            .remove_if(&IdentityToken::of(key), |_, entry| entry.key.points_to(key))?;

        entry.key.invalidate();
        self.total_explicit_deletions
            .fetch_add(1, Ordering::Relaxed);
        Some(entry.value)
    }

    /// Remove the entry for a key given by weak pointer; a dead key always misses
    pub fn delete_weak(&self, key: &Weak<K>) -> Option<V> {
        match key.upgrade() {
            Some(key) => self.delete(&key),
            None => {
                self.purge_cleared_keys();
                None
            }
        }
    }

    /// Collect `f(key, entry)` for every entry whose key is still alive.
    ///
    /// Keys found dead are cleared on the way, and their entries purged.
    fn collect_live<R>(&self, mut f: impl FnMut(Arc<K>, &V) -> R) -> Vec<R> {
        self.purge_cleared_keys();
        let live: Vec<R> = self
            .entries
            .iter()
            .filter_map(|entry| entry.key.get().map(|key| f(key, &entry.value)))
            .collect();
        self.purge_cleared_keys();
        live
    }

    /// Keys whose object is still alive
    pub fn keys(&self) -> Vec<Arc<K>> {
        self.collect_live(|key, _| key)
    }

    /// Number of entries whose key is still alive
    pub fn size(&self) -> usize {
        self.collect_live(|_, _| ()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Call `f` for every live entry.
    ///
    /// Works on a snapshot, so `f` may use the map.
    pub fn each(&self, mut f: impl FnMut(&Arc<K>, &V)) {
        let snapshot = self.collect_live(|key, value| (key, value.clone()));
        for (key, value) in &snapshot {
            f(key, value);
        }
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.purge_cleared_keys();
        let identities: Vec<IdentityToken> = self.entries.iter().map(|entry| *entry.key()).collect();

        let mut cleared = 0;
        for identity in identities {
            if let Some((_, entry)) = self.entries.remove(&identity) {
                entry.key.invalidate();
                cleared += 1;
            }
        }
        self.purge_cleared_keys();

        self.total_explicit_deletions
            .fetch_add(cleared, Ordering::Relaxed);
    }

    /// Get statistics for this map
    pub fn stats(&self) -> WeakIdentityMapStats {
        WeakIdentityMapStats {
            current_size: self.size(),
            total_insertions: self.total_insertions.load(Ordering::Relaxed),
            total_gc_removals: self.total_gc_removals.load(Ordering::Relaxed),
            total_explicit_deletions: self.total_explicit_deletions.load(Ordering::Relaxed),
        }
    }
}

impl<K: Send + Sync + 'static, V: Clone> Default for WeakIdentityMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for weak identity maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeakIdentityMapStats {
    /// Current number of live entries
    pub current_size: usize,
    /// Total number of `set` calls
    pub total_insertions: usize,
    /// Total number of entries removed because their key vanished
    pub total_gc_removals: usize,
    /// Total number of explicit deletions
    pub total_explicit_deletions: usize,
}
