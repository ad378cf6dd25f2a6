use std::sync::Arc;

use common::{cache_region, Artist, Genre, Label, Release};
use tracing::debug;

use crate::cache::{name_cache_key, CatalogCache};
use crate::normalize::{alphanumeric_key, normalize_name};
use crate::records::Record;
use crate::store::{Catalog, NameField};
use crate::LibraryError;

/// Finds existing catalog rows by name: cache first, then the name index
/// in a fixed order (name, sort name, alternate names).
#[derive(Clone)]
pub struct Matcher {
    catalog: Catalog,
    cache: Arc<CatalogCache>,
}

impl Matcher {
    pub fn new(catalog: Catalog, cache: Arc<CatalogCache>) -> Self {
        Self { catalog, cache }
    }

    pub fn find_artist(&self, name: &str) -> Result<Option<Artist>, LibraryError> {
        self.lookup(0, name)
    }

    pub fn find_release(
        &self,
        artist_id: u64,
        title: &str,
    ) -> Result<Option<Release>, LibraryError> {
        self.lookup(artist_id, title)
    }

    pub fn find_genre(&self, name: &str) -> Result<Option<Genre>, LibraryError> {
        self.lookup(0, name)
    }

    pub fn find_label(&self, name: &str) -> Result<Option<Label>, LibraryError> {
        self.lookup(0, name)
    }

    fn lookup<T: Record>(&self, scope: u64, name: &str) -> Result<Option<T>, LibraryError> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return Ok(None);
        }
        let cache_key = name_cache_key(T::KIND, scope, &normalized);
        if let Some(id) = self.cache.get(&cache_key) {
            if let Some(row) = self.catalog.get::<T>(id)? {
                return Ok(Some(row));
            }
            debug!("Cached {} {} is gone; searching again", T::KIND, id);
        }

        let alnum = alphanumeric_key(name);
        let lookups = [
            (NameField::Name, normalized.as_str()),
            (NameField::SortName, normalized.as_str()),
            (NameField::Alternate, normalized.as_str()),
            (NameField::AlternateAlnum, alnum.as_str()),
        ];
        for (field, key) in lookups {
            if let Some(row) = self.catalog.find_by_name::<T>(scope, field, key)? {
                self.cache
                    .insert(&cache_region(T::KIND, row.id()), &cache_key, row.id());
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{Artist, Release};

    use super::Matcher;
    use crate::cache::CatalogCache;
    use crate::test_support::fixture;

    #[test]
    fn matches_by_name_sort_name_and_alternates() {
        let fx = fixture();
        let mut artist = Artist::new("The Beatles");
        artist.sort_name = Some("Beatles, The".to_string());
        artist.alternate_names.insert("Fab Four");
        fx.catalog.save(&mut artist).unwrap();
        let matcher = Matcher::new(fx.catalog.clone(), Arc::new(CatalogCache::new()));

        for name in ["the beatles", "THE BEATLES!", "Beatles, The", "fab four", "FabFour"] {
            let found = matcher.find_artist(name).unwrap();
            assert_eq!(found.map(|a| a.id), Some(artist.id), "{name}");
        }
        assert!(matcher.find_artist("Beatle").unwrap().is_none());
        assert!(matcher.find_artist("  ").unwrap().is_none());
    }

    #[test]
    fn caches_hits_until_region_is_invalidated() {
        let fx = fixture();
        let mut artist = Artist::new("Low");
        fx.catalog.save(&mut artist).unwrap();
        let cache = Arc::new(CatalogCache::new());
        let matcher = Matcher::new(fx.catalog.clone(), cache.clone());

        assert!(matcher.find_artist("Nobody").unwrap().is_none());
        assert!(cache.is_empty());
        assert!(matcher.find_artist("low").unwrap().is_some());
        assert_eq!(cache.len(), 1);

        cache.invalidate_region(&artist.cache_region());
        assert!(cache.is_empty());
    }

    #[test]
    fn release_lookup_is_scoped_to_artist() {
        let fx = fixture();
        let mut release = Release::new(1, "Untitled");
        fx.catalog.save(&mut release).unwrap();
        let matcher = Matcher::new(fx.catalog.clone(), fx.cache.clone());
        assert!(matcher.find_release(1, "untitled").unwrap().is_some());
        assert!(matcher.find_release(2, "untitled").unwrap().is_none());
    }
}
