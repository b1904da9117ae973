use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::CoreError;
use crate::registry::Registry;
use crate::store::{RecordId, Store};

use super::engine::AssembledView;
use super::view::VIEW_MODEL;

/// Tables whose writes invalidate assembled views.
const WATCHED_TABLES: [&str; 3] = [VIEW_MODEL, "res.groups", "res.users"];

/// Identity of an assembled view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub view_id: RecordId,
    pub groups: BTreeSet<RecordId>,
    pub lang: Option<String>,
    pub branding: bool,
}

/// Versions an entry was composed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStamp {
    generation: u64,
    versions: [u64; 3],
}

impl CacheStamp {
    /// Current stamp of a registry and store.
    pub fn of(registry: &Registry, store: &Store) -> Self {
        Self {
            generation: registry.generation(),
            versions: WATCHED_TABLES.map(|t| store.version(t)),
        }
    }
}

/// Cache of assembled views, validated against a [`CacheStamp`] on read.
///
/// Entries are not evicted one by one: once `capacity` is reached the
/// whole cache is cleared.
#[derive(Debug)]
pub struct ViewCache {
    capacity: usize,
    entries: RwLock<HashMap<CacheKey, (CacheStamp, Arc<AssembledView>)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ViewCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the entry for `key` if it was composed at `stamp`.
    pub fn get(&self, key: &CacheKey, stamp: CacheStamp) -> Result<Option<Arc<AssembledView>>, CoreError> {
        let entries = self.entries.read().map_err(|_| CoreError::LockPoisoned)?;
        match entries.get(key) {
            Some((entry_stamp, view)) if *entry_stamp == stamp => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Arc::clone(view)))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(view_id = key.view_id, branding = key.branding, "view cache miss");
                Ok(None)
            }
        }
    }

    pub fn insert(&self, key: CacheKey, stamp: CacheStamp, view: Arc<AssembledView>) -> Result<(), CoreError> {
        let mut entries = self.entries.write().map_err(|_| CoreError::LockPoisoned)?;
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            entries.clear();
        }
        entries.insert(key, (stamp, view));
        Ok(())
    }

    /// Drops every entry.
    pub fn clear(&self) -> Result<(), CoreError> {
        self.entries.write().map_err(|_| CoreError::LockPoisoned)?.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use std::collections::BTreeMap;

    fn key(view_id: RecordId) -> CacheKey {
        CacheKey {
            view_id,
            groups: BTreeSet::new(),
            lang: None,
            branding: false,
        }
    }

    fn assembled(view_id: RecordId) -> Arc<AssembledView> {
        Arc::new(AssembledView {
            arch: "<form/>".to_string(),
            model: "widget".to_string(),
            fields: BTreeMap::new(),
            view_id,
        })
    }

    #[timeout(1000)]
    #[test]
    fn test_stale_entries_miss() {
        let cache = ViewCache::new(8);
        let registry = Registry::empty();
        let mut store = Store::new();
        store.ensure_table(VIEW_MODEL);
        let stamp = CacheStamp::of(&registry, &store);
        cache.insert(key(1), stamp, assembled(1)).unwrap();
        assert!(cache.get(&key(1), stamp).unwrap().is_some());

        store.insert(VIEW_MODEL, BTreeMap::new()).unwrap();
        let bumped = CacheStamp::of(&registry, &store);
        assert_ne!(stamp, bumped);
        assert!(cache.get(&key(1), bumped).unwrap().is_none());
        assert_eq!(cache.stats(), (1, 1));
    }

    #[timeout(1000)]
    #[test]
    fn test_full_cache_is_cleared() {
        let cache = ViewCache::new(2);
        let registry = Registry::empty();
        let stamp = CacheStamp::of(&registry, &Store::new());
        cache.insert(key(1), stamp, assembled(1)).unwrap();
        cache.insert(key(2), stamp, assembled(2)).unwrap();
        cache.insert(key(3), stamp, assembled(3)).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key(3), stamp).unwrap().is_some());
    }
}
