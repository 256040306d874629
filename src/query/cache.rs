use crate::config::LookupConfig;
use crate::index::schema::FieldSchema;
use crate::query::membership::MembershipFilter;
use crate::types::CacheKey;
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

type Entry = (FieldSchema, CacheKey);

/// Built membership filters, keyed by the resolved field and the content key,
/// holding at most `capacity` entries (least recently used evicted first).
///
/// The key carries the whole [`FieldSchema`] rather than the field name: a
/// filter holds the tantivy field id and term type of the index it was built
/// against, so indexes that lay out a same-named field differently never
/// share an entry.
pub struct FilterCache {
    filters: Mutex<LruCache<Entry, Arc<MembershipFilter>>>,
}

impl FilterCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        FilterCache {
            filters: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &LookupConfig) -> Self {
        Self::new(config.filter_cache_max_entries)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<Entry, Arc<MembershipFilter>>> {
        self.filters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, schema: &FieldSchema, key: &CacheKey) -> Option<Arc<MembershipFilter>> {
        self.lock()
            .get(&(schema.clone(), key.clone()))
            .map(Arc::clone)
    }

    /// Store `filter` unless an entry already exists; returns whichever is
    /// cached afterwards.
    pub fn insert(
        &self,
        schema: &FieldSchema,
        key: CacheKey,
        filter: Arc<MembershipFilter>,
    ) -> Arc<MembershipFilter> {
        let mut filters = self.lock();
        let entry = (schema.clone(), key);
        if let Some(existing) = filters.get(&entry) {
            return Arc::clone(existing);
        }
        if let Some(((evicted, _), _)) = filters.push(entry, Arc::clone(&filter)) {
            tracing::debug!(
                "[LOOKUP] filter cache full ({} entries), evicted a filter for field '{}'",
                filters.cap(),
                evicted.name()
            );
        }
        filter
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::from_config(&LookupConfig::default())
    }
}

impl fmt::Debug for FilterCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filters = self.lock();
        f.debug_struct("FilterCache")
            .field("len", &filters.len())
            .field("capacity", &filters.cap())
            .finish()
    }
}
