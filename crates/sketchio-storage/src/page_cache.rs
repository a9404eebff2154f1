//! Offset-keyed page cache for a single file
//!
//! Pages are byte buffers keyed by their offset in the owning file. The cache
//! is bounded by entry count and evicts in LRU order, but prefers to keep
//! dirty pages resident: a write-back only happens under pressure when no
//! clean page is available. Every removed page (eviction or [`PageCache::clear`])
//! is handed to the owner's eviction callback, which writes it to the medium.
//!
//! The cache is not thread-safe; the owning file serializes access.

use bytes::Bytes;
use sketchio_common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;

/// Write-back hook invoked with every page removed from the cache
pub type EvictCallback = Box<dyn FnMut(u64, &CacheEntry) -> io::Result<()> + Send>;

/// A cached page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    offset: u64,
    bytes: Bytes,
    dirty: bool,
}

impl CacheEntry {
    /// Byte offset of the page within its file
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Page contents
    pub const fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// True if modified but not yet written to the medium
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Length of the page in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the page holds no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups served from the cache
    pub hits: u64,
    /// Number of lookups that missed
    pub misses: u64,
    /// Number of pages removed under capacity pressure
    pub evictions: u64,
    /// Number of dirty pages handed to the eviction callback
    pub writebacks: u64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

struct Slot {
    entry: CacheEntry,
    /// Logical clock value of the last access (key into `recency`)
    last_access: u64,
}

/// Bounded LRU cache of file pages with dirty-aware eviction
pub struct PageCache {
    entries: HashMap<u64, Slot>,
    /// Access clock -> offset, oldest first
    recency: BTreeMap<u64, u64>,
    /// Maximum resident pages; 0 means unbounded
    max_entries: usize,
    /// Logical clock for LRU ordering
    clock: u64,
    on_evict: Option<EvictCallback>,
    stats: CacheStats,
}

impl PageCache {
    /// Create a cache without a write-back hook
    ///
    /// A `max_entries` of zero means the cache has no limit and eviction is
    /// left to the caller.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            max_entries,
            clock: 0,
            on_evict: None,
            stats: CacheStats::default(),
        }
    }

    /// Create a cache whose removed pages are passed to `on_evict`
    pub fn with_evict(max_entries: usize, on_evict: EvictCallback) -> Self {
        Self {
            on_evict: Some(on_evict),
            ..Self::new(max_entries)
        }
    }

    /// Configured capacity (0 = unbounded)
    pub const fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Number of resident pages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of resident dirty pages
    pub fn dirty_count(&self) -> usize {
        self.entries.values().filter(|s| s.entry.dirty).count()
    }

    /// Get cache statistics
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Advance the logical clock and return the new value
    const fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Insert or overwrite the page at `offset` and make it most recently used
    ///
    /// When the insert pushes the cache over capacity exactly one page is
    /// evicted. The returned error is the eviction callback's failure; the
    /// page is gone from the cache either way.
    pub fn put(&mut self, offset: u64, bytes: Bytes, dirty: bool) -> Result<()> {
        let clock = self.tick();

        if let Some(slot) = self.entries.get_mut(&offset) {
            self.recency.remove(&slot.last_access);
            self.recency.insert(clock, offset);
            slot.last_access = clock;
            slot.entry.bytes = bytes;
            slot.entry.dirty = dirty;
            return Ok(());
        }

        self.entries.insert(
            offset,
            Slot {
                entry: CacheEntry {
                    offset,
                    bytes,
                    dirty,
                },
                last_access: clock,
            },
        );
        self.recency.insert(clock, offset);

        if self.max_entries != 0 && self.entries.len() > self.max_entries {
            return self.evict_one();
        }
        Ok(())
    }

    /// Look up a page and promote it to most recently used
    pub fn get(&mut self, offset: u64) -> Option<&CacheEntry> {
        let clock = self.tick();
        if let Some(slot) = self.entries.get_mut(&offset) {
            self.recency.remove(&slot.last_access);
            self.recency.insert(clock, offset);
            slot.last_access = clock;
            self.stats.hits += 1;
            Some(&slot.entry)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Look up a page without touching its recency
    pub fn peek(&self, offset: u64) -> Option<&CacheEntry> {
        self.entries.get(&offset).map(|s| &s.entry)
    }

    /// Check if a page is resident
    pub fn contains(&self, offset: u64) -> bool {
        self.entries.contains_key(&offset)
    }

    /// Mark a page as written back. Returns false if it was absent or clean.
    pub fn mark_clean(&mut self, offset: u64) -> bool {
        match self.entries.get_mut(&offset) {
            Some(slot) if slot.entry.dirty => {
                slot.entry.dirty = false;
                true
            }
            _ => false,
        }
    }

    /// Resident offsets from least to most recently used
    pub fn keys(&self) -> Vec<u64> {
        self.recency.values().copied().collect()
    }

    /// Remove every page, passing each one to the eviction callback
    ///
    /// All pages are visited even if a write-back fails; the first failure
    /// is returned.
    pub fn clear(&mut self) -> Result<()> {
        let entries = std::mem::take(&mut self.entries);
        self.recency.clear();

        let mut first_err = None;
        for slot in entries.into_values() {
            if let Err(e) = self.write_back(&slot.entry) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drop every page without writing anything back
    ///
    /// Returns the number of dirty pages that were lost.
    pub fn discard(&mut self) -> usize {
        let lost = self.dirty_count();
        self.entries.clear();
        self.recency.clear();
        lost
    }

    /// Choose the page to evict: the least recently used clean page, not
    /// counting the most recently used one; otherwise the LRU page.
    fn select_victim(&self) -> Option<u64> {
        let candidates = self.recency.len().saturating_sub(1);
        self.recency
            .values()
            .take(candidates)
            .copied()
            .find(|offset| self.entries.get(offset).is_some_and(|s| !s.entry.dirty))
            .or_else(|| self.recency.values().next().copied())
    }

    fn evict_one(&mut self) -> Result<()> {
        let Some(offset) = self.select_victim() else {
            return Ok(());
        };
        let Some(slot) = self.entries.remove(&offset) else {
            return Ok(());
        };
        self.recency.remove(&slot.last_access);
        self.stats.evictions += 1;
        self.write_back(&slot.entry)
    }

    fn write_back(&mut self, entry: &CacheEntry) -> Result<()> {
        let Some(callback) = self.on_evict.as_mut() else {
            return Ok(());
        };
        if entry.dirty {
            self.stats.writebacks += 1;
        }
        callback(entry.offset, entry).map_err(|source| Error::WriteBack {
            offset: entry.offset,
            source,
        })
    }
}

impl fmt::Debug for PageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageCache")
            .field("len", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rand::Rng;
    use std::sync::Arc;

    type Evicted = Arc<Mutex<Vec<(u64, Vec<u8>, bool)>>>;

    fn recording_cache(max_entries: usize) -> (PageCache, Evicted) {
        let evicted: Evicted = Arc::default();
        let sink = Arc::clone(&evicted);
        let cache = PageCache::with_evict(
            max_entries,
            Box::new(move |offset, entry| {
                sink.lock()
                    .push((offset, entry.bytes().to_vec(), entry.is_dirty()));
                Ok(())
            }),
        );
        (cache, evicted)
    }

    fn page(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    #[test]
    fn test_put_and_get() {
        let mut cache = PageCache::new(10);
        cache.put(4, page(b"beast"), true).unwrap();

        let entry = cache.get(4).unwrap();
        assert_eq!(entry.bytes().as_ref(), b"beast");
        assert!(entry.is_dirty());
        assert!(cache.get(5).is_none());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let mut cache = PageCache::new(10);
        cache.put(4, page(b"beast"), true).unwrap();
        cache.put(4, page(b"kiss"), false).unwrap();

        assert_eq!(cache.len(), 1);
        let entry = cache.peek(4).unwrap();
        assert_eq!(entry.bytes().as_ref(), b"kiss");
        assert!(!entry.is_dirty());
    }

    #[test]
    fn test_keys_oldest_to_newest() {
        let mut cache = PageCache::new(0);
        for offset in [30, 10, 20] {
            cache.put(offset, page(b"x"), false).unwrap();
        }
        assert_eq!(cache.keys(), vec![30, 10, 20]);

        // get promotes, peek does not
        cache.get(30);
        cache.peek(10);
        assert_eq!(cache.keys(), vec![10, 20, 30]);
    }

    #[test]
    fn test_get_does_not_change_dirty_flag() {
        let mut cache = PageCache::new(4);
        cache.put(0, page(b"a"), true).unwrap();
        cache.get(0);
        assert!(cache.peek(0).unwrap().is_dirty());
    }

    #[test]
    fn test_capacity_bound_random_ops() {
        let mut rng = rand::thread_rng();
        for capacity in [1usize, 2, 7, 32] {
            let (mut cache, _evicted) = recording_cache(capacity);
            for _ in 0..500 {
                let offset = rng.gen_range(0..64u64);
                let dirty = rng.gen_bool(0.5);
                cache.put(offset, page(&[offset as u8]), dirty).unwrap();
                assert!(cache.len() <= capacity);
                if rng.gen_bool(0.3) {
                    cache.get(rng.gen_range(0..64u64));
                }
            }
        }
    }

    #[test]
    fn test_unbounded_when_capacity_zero() {
        let (mut cache, evicted) = recording_cache(0);
        for offset in 0..1000u64 {
            cache.put(offset, page(b"p"), true).unwrap();
        }
        assert_eq!(cache.len(), 1000);
        assert!(evicted.lock().is_empty());
    }

    #[test]
    fn test_evicts_clean_before_dirty() {
        let (mut cache, evicted) = recording_cache(3);
        cache.put(0, page(b"d0"), true).unwrap();
        cache.put(1, page(b"c1"), false).unwrap();
        cache.put(2, page(b"d2"), true).unwrap();

        cache.put(3, page(b"d3"), true).unwrap();

        assert_eq!(evicted.lock().as_slice(), &[(1, b"c1".to_vec(), false)]);
        assert!(cache.contains(0));
        assert!(!cache.contains(1));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().writebacks, 0);
    }

    #[test]
    fn test_evicts_lru_when_all_dirty() {
        let (mut cache, evicted) = recording_cache(2);
        cache.put(0, page(b"d0"), true).unwrap();
        cache.put(1, page(b"d1"), true).unwrap();

        // The incoming page is clean, but it is the most recently used and
        // never a candidate for its own eviction.
        cache.put(2, page(b"c2"), false).unwrap();

        assert_eq!(evicted.lock().as_slice(), &[(0, b"d0".to_vec(), true)]);
        assert_eq!(cache.keys(), vec![1, 2]);
        assert_eq!(cache.stats().writebacks, 1);
    }

    #[test]
    fn test_lru_clean_is_itself_a_candidate() {
        let (mut cache, evicted) = recording_cache(2);
        cache.put(0, page(b"c0"), false).unwrap();
        cache.put(1, page(b"c1"), false).unwrap();
        cache.get(0);

        cache.put(2, page(b"d2"), true).unwrap();

        assert_eq!(evicted.lock()[0].0, 1);
        assert_eq!(cache.keys(), vec![0, 2]);
    }

    #[test]
    fn test_eviction_writes_final_bytes_once() {
        let (mut cache, evicted) = recording_cache(1);
        cache.put(4, page(b"beast"), true).unwrap();
        cache.put(4, page(b"kiss"), true).unwrap();
        cache.put(14, page(b"storm"), true).unwrap();

        let evicted = evicted.lock();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0], (4, b"kiss".to_vec(), true));
    }

    #[test]
    fn test_clear_writes_back_every_entry() {
        let (mut cache, evicted) = recording_cache(10);
        for offset in 0..5u64 {
            cache.put(offset, page(&[offset as u8]), offset % 2 == 0).unwrap();
        }

        cache.clear().unwrap();

        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
        let mut seen: Vec<u64> = evicted.lock().iter().map(|(o, _, _)| *o).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_clear_reports_first_failure_but_visits_all() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let mut cache = PageCache::with_evict(
            0,
            Box::new(move |_, _| {
                *counter.lock() += 1;
                Err(io::Error::other("medium gone"))
            }),
        );
        cache.put(0, page(b"a"), true).unwrap();
        cache.put(8, page(b"b"), true).unwrap();

        let err = cache.clear().unwrap_err();
        assert!(matches!(err, Error::WriteBack { .. }));
        assert_eq!(*calls.lock(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_eviction_still_evicts() {
        let mut cache =
            PageCache::with_evict(1, Box::new(|_, _| Err(io::Error::other("medium gone"))));
        cache.put(0, page(b"a"), true).unwrap();

        let err = cache.put(8, page(b"b"), true).unwrap_err();
        assert!(matches!(err, Error::WriteBack { offset: 0, .. }));
        assert_eq!(cache.keys(), vec![8]);
    }

    #[test]
    fn test_discard_skips_callback() {
        let (mut cache, evicted) = recording_cache(10);
        cache.put(0, page(b"a"), true).unwrap();
        cache.put(1, page(b"b"), false).unwrap();

        assert_eq!(cache.discard(), 1);
        assert!(cache.is_empty());
        assert!(evicted.lock().is_empty());
    }

    #[test]
    fn test_mark_clean() {
        let mut cache = PageCache::new(4);
        cache.put(0, page(b"a"), true).unwrap();
        assert_eq!(cache.dirty_count(), 1);
        assert!(cache.mark_clean(0));
        assert!(!cache.mark_clean(0));
        assert!(!cache.mark_clean(99));
        assert_eq!(cache.dirty_count(), 0);
    }
}
