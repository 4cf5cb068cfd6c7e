use std::collections::HashSet;
use lru::LruCache;

/// Identity of a resident unit: the whole database in single-file mode,
/// a collection in folder mode, a shard or meta record in sharded mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnitKey {
    Database,
    Collection(String),
    Meta(String),
    Shard(String, String),
}

impl UnitKey {
    pub fn collection(&self) -> Option<&str> {
        match self {
            UnitKey::Database => None,
            UnitKey::Collection(name) | UnitKey::Meta(name) | UnitKey::Shard(name, _) => {
                Some(name)
            }
        }
    }
}

/// Bounded, touch-ordered set of resident units. The cache itself is
/// unbounded; overflow is surfaced through [`ResidencyLru::evictable`]
/// so the caller can persist a dirty victim before dropping it, and so
/// units pinned by the running operation are never chosen.
#[derive(Debug)]
pub struct ResidencyLru {
    cache: LruCache<UnitKey, ()>,
    max_size: usize,
}

impl ResidencyLru {
    /// A `max_size` of zero disables eviction entirely.
    pub fn new(max_size: usize) -> Self {
        ResidencyLru {
            cache: LruCache::unbounded(),
            max_size,
        }
    }

    /// Mark `key` most recently used.
    pub fn touch(&mut self, key: UnitKey) {
        if self.max_size == 0 {
            return;
        }
        self.cache.put(key, ());
    }

    /// The least-recently-touched unpinned unit, while over capacity.
    pub fn evictable(&self, pinned: &HashSet<UnitKey>) -> Option<UnitKey> {
        if self.max_size == 0 || self.cache.len() <= self.max_size {
            return None;
        }
        self.cache
            .iter()
            .rev()
            .map(|(key, _)| key)
            .find(|key| !pinned.contains(*key))
            .cloned()
    }

    pub fn remove(&mut self, key: &UnitKey) {
        self.cache.pop(key);
    }

    /// Forget every unit belonging to `collection`.
    pub fn remove_collection(&mut self, collection: &str) {
        let stale: Vec<UnitKey> = self
            .cache
            .iter()
            .map(|(key, _)| key.clone())
            .filter(|key| key.collection() == Some(collection))
            .collect();
        for key in stale {
            self.cache.pop(&key);
        }
    }
}
