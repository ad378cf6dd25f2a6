use std::collections::{HashMap, HashSet};

use common::EntityKind;
use parking_lot::RwLock;

/// Name-to-id lookups remembered between matches. Every entry belongs to the
/// cache region of the row it points at, so a write to that row drops it.
#[derive(Default)]
pub struct CatalogCache {
    state: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    regions: HashMap<String, HashSet<String>>,
    invalidations: u64,
}

struct CacheEntry {
    region: String,
    id: u64,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.state.read().entries.get(key).map(|entry| entry.id)
    }

    pub fn insert(&self, region: &str, key: &str, id: u64) {
        let mut state = self.state.write();
        if let Some(previous) = state.entries.insert(
            key.to_string(),
            CacheEntry {
                region: region.to_string(),
                id,
            },
        ) {
            if previous.region != region {
                if let Some(keys) = state.regions.get_mut(&previous.region) {
                    keys.remove(key);
                }
            }
        }
        state
            .regions
            .entry(region.to_string())
            .or_default()
            .insert(key.to_string());
    }

    /// Drops every entry in `region`. Returns how many entries were removed.
    pub fn invalidate_region(&self, region: &str) -> usize {
        let mut state = self.state.write();
        state.invalidations += 1;
        let keys = state.regions.remove(region).unwrap_or_default();
        for key in &keys {
            state.entries.remove(key);
        }
        keys.len()
    }

    /// Number of region invalidations since the cache was created.
    pub fn invalidation_count(&self) -> u64 {
        self.state.read().invalidations
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn name_cache_key(kind: EntityKind, scope: u64, normalized: &str) -> String {
    format!("urn:{}_by_name:{}:{}", kind.as_str(), scope, normalized)
}

#[cfg(test)]
mod tests {
    use common::{cache_region, EntityKind};

    use super::{name_cache_key, CatalogCache};

    #[test]
    fn invalidation_drops_only_its_region() {
        let cache = CatalogCache::new();
        let artist = cache_region(EntityKind::Artist, 1);
        let other = cache_region(EntityKind::Artist, 2);
        cache.insert(&artist, &name_cache_key(EntityKind::Artist, 0, "low"), 1);
        cache.insert(&artist, &name_cache_key(EntityKind::Artist, 0, "lo w"), 1);
        cache.insert(&other, &name_cache_key(EntityKind::Artist, 0, "slint"), 2);

        assert_eq!(cache.invalidate_region(&artist), 2);
        assert_eq!(cache.get(&name_cache_key(EntityKind::Artist, 0, "low")), None);
        assert_eq!(cache.get(&name_cache_key(EntityKind::Artist, 0, "slint")), Some(2));
        assert_eq!(cache.invalidation_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reinserting_key_moves_it_between_regions() {
        let cache = CatalogCache::new();
        let key = name_cache_key(EntityKind::Release, 3, "live");
        cache.insert("urn:release_by_id:10", &key, 10);
        cache.insert("urn:release_by_id:11", &key, 11);
        assert_eq!(cache.invalidate_region("urn:release_by_id:10"), 0);
        assert_eq!(cache.get(&key), Some(11));
    }
}
