//! Time-bounded segment cache.
//!
//! Maps a [`CacheKey`] to the content ID it resolved to and the skippable
//! segments of that content. Entries older than the TTL are treated as
//! absent but stay in storage until a fresh resolution overwrites them.
//!
//! The whole cache is written back through its [`CacheStore`] after every
//! [`SegmentCache::store`]. Losing a write only costs a future cache miss.

pub mod store;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SponsorError};
use crate::model::{CacheKey, Segment};

pub use store::{CacheStore, JsonFileCacheStore, MemoryCacheStore};

/// Default expiration window of a cache entry.
pub const DEFAULT_CACHE_TTL_HOURS: u64 = 2;

/// Result of resolving one cache key.
///
/// An empty `content_id` records a failed resolution; it is cached like any
/// other result so an unresolvable title is not queried again before the
/// entry expires.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub content_id: String,
    pub segments: Vec<Segment>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(content_id: String, segments: Vec<Segment>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            content_id,
            segments,
            fetched_at,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.content_id.is_empty()
    }

    /// True once `now` is past `fetched_at + ttl`.
    pub fn is_expired_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.fetched_at.checked_add_signed(ttl) {
            Some(expires_at) => now > expires_at,
            None => true,
        }
    }
}

pub struct SegmentCache<S: CacheStore> {
    store: S,
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl<S: CacheStore> SegmentCache<S> {
    /// Loads the cache from `store`.
    ///
    /// A missing resource gives an empty cache. One that does not decode is
    /// moved aside and the cache starts empty. Any other failure (I/O,
    /// permissions) also starts empty but leaves the resource in place.
    pub fn load(store: S, ttl: Duration) -> Self {
        let entries = match store.load_all() {
            Ok(entries) => {
                info!(entries = entries.len(), "Segment cache loaded");
                entries
            }
            Err(SponsorError::Json(e)) => {
                warn!("Segment cache corrupt, starting with an empty cache: {}", e);
                if let Err(e) = store.discard_corrupt() {
                    error!("Failed to move corrupt segment cache aside: {}", e);
                }
                HashMap::new()
            }
            Err(e) => {
                error!("Segment cache unreadable, starting with an empty cache: {}", e);
                HashMap::new()
            }
        };

        Self {
            store,
            entries,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the entry for `key` if present and not expired.
    pub fn lookup(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.lookup_at(key, Utc::now())
    }

    pub fn lookup_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<&CacheEntry> {
        let entry = self.entries.get(key.as_str())?;
        if entry.is_expired_at(self.ttl, now) {
            debug!(key = %key, fetched_at = %entry.fetched_at, "Cache entry expired");
            return None;
        }
        Some(entry)
    }

    /// Inserts or replaces the entry for `key`, then persists the whole cache.
    ///
    /// The in-memory entry is kept even when persisting fails.
    pub fn store(&mut self, key: &CacheKey, entry: CacheEntry) -> Result<()> {
        self.entries.insert(key.as_str().to_string(), entry);
        self.persist()
    }

    /// Writes every entry to the store.
    pub fn persist(&self) -> Result<()> {
        self.store.persist_all(&self.entries)?;
        debug!(entries = self.entries.len(), "Segment cache persisted");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn backing_store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SegmentCategory;
    use std::cell::Cell;
    use std::io;

    /// Store whose load always fails with the error built by `error`.
    struct FailingStore {
        error: fn() -> SponsorError,
        discarded: Cell<bool>,
    }

    impl FailingStore {
        fn new(error: fn() -> SponsorError) -> Self {
            Self {
                error,
                discarded: Cell::new(false),
            }
        }
    }

    impl CacheStore for FailingStore {
        fn load_all(&self) -> Result<HashMap<String, CacheEntry>> {
            Err((self.error)())
        }

        fn persist_all(&self, _entries: &HashMap<String, CacheEntry>) -> Result<()> {
            Ok(())
        }

        fn discard_corrupt(&self) -> Result<()> {
            self.discarded.set(true);
            Ok(())
        }
    }

    fn sponsor(start: f64, end: f64) -> Segment {
        Segment::new(SegmentCategory::Sponsor, start, end)
    }

    fn two_hours() -> Duration {
        Duration::hours(DEFAULT_CACHE_TTL_HOURS as i64)
    }

    #[test]
    fn test_lookup_returns_fresh_entries() {
        let mut cache = SegmentCache::load(MemoryCacheStore::new(), two_hours());
        let key = CacheKey::from("Rick Astley Never Gonna Give You Up");
        let entry = CacheEntry::new("dQw4w9WgXcQ".to_string(), vec![sponsor(3.0, 10.0)], Utc::now());

        cache.store(&key, entry.clone()).unwrap();

        assert_eq!(cache.lookup(&key), Some(&entry));
    }

    #[test]
    fn test_lookup_ignores_expired_entries_without_deleting_them() {
        let now = Utc::now();
        let key = CacheKey::from("old");
        let mut entries = HashMap::new();
        entries.insert(
            "old".to_string(),
            CacheEntry::new("abc".to_string(), Vec::new(), now - Duration::hours(3)),
        );

        let cache = SegmentCache::load(MemoryCacheStore::with_entries(entries), two_hours());

        assert_eq!(cache.lookup_at(&key, now), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_empty_content_id_is_unresolved() {
        let now = Utc::now();
        assert!(!CacheEntry::new(String::new(), Vec::new(), now).is_resolved());
        assert!(CacheEntry::new("dQw4w9WgXcQ".to_string(), Vec::new(), now).is_resolved());
    }

    #[test]
    fn test_undecodable_store_is_discarded() {
        let store = FailingStore::new(|| {
            SponsorError::Json(serde_json::from_str::<u32>("{").unwrap_err())
        });
        let cache = SegmentCache::load(store, two_hours());

        assert!(cache.is_empty());
        assert!(cache.backing_store().discarded.get());
    }

    #[test]
    fn test_io_failure_keeps_store_in_place() {
        let store = FailingStore::new(|| {
            SponsorError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        });
        let cache = SegmentCache::load(store, two_hours());

        assert!(cache.is_empty());
        assert!(!cache.backing_store().discarded.get());
    }

    #[test]
    fn test_expiration_boundary() {
        let fetched_at = Utc::now();
        let entry = CacheEntry::new(String::new(), Vec::new(), fetched_at);
        let ttl = two_hours();

        assert!(!entry.is_expired_at(ttl, fetched_at + ttl));
        assert!(entry.is_expired_at(ttl, fetched_at + ttl + Duration::seconds(1)));
    }

    #[test]
    fn test_store_persists_synchronously() {
        let store = MemoryCacheStore::new();
        let mut cache = SegmentCache::load(store.clone(), two_hours());

        cache
            .store(&CacheKey::from("a"), CacheEntry::new(String::new(), Vec::new(), Utc::now()))
            .unwrap();
        cache
            .store(&CacheKey::from("b"), CacheEntry::new("id".to_string(), Vec::new(), Utc::now()))
            .unwrap();

        assert_eq!(store.persist_count(), 2);
        assert_eq!(store.entries().len(), 2);
    }

    #[test]
    fn test_store_overwrites_existing_entry() {
        let mut cache = SegmentCache::load(MemoryCacheStore::new(), two_hours());
        let key = CacheKey::from("k");

        cache
            .store(&key, CacheEntry::new("old".to_string(), Vec::new(), Utc::now()))
            .unwrap();
        cache
            .store(&key, CacheEntry::new("new".to_string(), Vec::new(), Utc::now()))
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["k"]);
        assert_eq!(cache.lookup(&key).unwrap().content_id, "new");
        assert_eq!(cache.backing_store().persist_count(), 2);
    }
}
