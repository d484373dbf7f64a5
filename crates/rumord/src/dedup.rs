//! Bounded duplicate-suppression cache.

use lru::LruCache;
use parking_lot::Mutex;
use rumor_common::Fingerprint;
use std::num::NonZeroUsize;

/// Remembers the most recently seen message fingerprints.
///
/// Eviction is strict FIFO: entries leave in insertion order, and recording a
/// duplicate does not refresh an entry's position. A burst of duplicates
/// therefore never extends a fingerprint's retention. Memory is bounded at
/// the configured capacity.
pub struct DedupCache {
    // Entries are inserted at most once and never touched afterwards, so the
    // LRU order of this cache is exactly insertion order.
    inner: Mutex<LruCache<Fingerprint, ()>>,
}

impl DedupCache {
    /// Creates a cache holding up to `capacity` fingerprints.
    ///
    /// A capacity of zero is coerced to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns `true` if the fingerprint was already recorded; otherwise
    /// records it and returns `false`. Query and insert are a single atomic
    /// step under the internal lock.
    pub fn check_and_record(&self, fingerprint: Fingerprint) -> bool {
        let mut cache = self.inner.lock();
        if cache.contains(&fingerprint) {
            return true;
        }
        cache.put(fingerprint, ());
        false
    }

    /// Number of fingerprints currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fp(sender: &str, seq: u64) -> Fingerprint {
        Fingerprint {
            sender_id: sender.to_string(),
            sequence_no: seq,
        }
    }

    #[test]
    fn first_sighting_is_fresh_then_duplicate() {
        let cache = DedupCache::new(10);
        assert!(!cache.check_and_record(fp("a", 1)));
        assert!(cache.check_and_record(fp("a", 1)));
        assert!(cache.check_and_record(fp("a", 1)));
        assert!(!cache.check_and_record(fp("a", 2)));
    }

    #[test]
    fn oldest_entry_is_evicted_first() {
        let cache = DedupCache::new(2);
        cache.check_and_record(fp("a", 1));
        cache.check_and_record(fp("b", 1));
        cache.check_and_record(fp("c", 1)); // evicts a/1

        assert!(!cache.check_and_record(fp("a", 1)), "a/1 should be evicted");
        assert!(cache.check_and_record(fp("c", 1)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn duplicates_do_not_refresh_position() {
        let cache = DedupCache::new(2);
        cache.check_and_record(fp("a", 1));
        // A burst of duplicates must not move a/1 ahead of b/1.
        for _ in 0..5 {
            assert!(cache.check_and_record(fp("a", 1)));
        }
        cache.check_and_record(fp("b", 1));
        cache.check_and_record(fp("c", 1)); // must evict a/1, not b/1

        assert!(cache.check_and_record(fp("b", 1)), "b/1 must survive");
        assert!(cache.check_and_record(fp("c", 1)), "c/1 must survive");
        assert!(!cache.check_and_record(fp("a", 1)), "a/1 must be gone");
    }

    #[test]
    fn evicted_entry_is_fresh_again_then_duplicate() {
        let cache = DedupCache::new(1);
        assert!(!cache.check_and_record(fp("a", 1)));
        assert!(!cache.check_and_record(fp("b", 1))); // evicts a/1
        assert!(!cache.check_and_record(fp("a", 1))); // fresh again
        assert!(cache.check_and_record(fp("a", 1)));
    }

    #[test]
    fn zero_capacity_behaves_as_one() {
        let cache = DedupCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(!cache.check_and_record(fp("a", 1)));
        assert!(cache.check_and_record(fp("a", 1)));
        assert!(!cache.check_and_record(fp("b", 1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = DedupCache::new(16);
        for seq in 0..1000 {
            cache.check_and_record(fp("sender", seq));
            assert!(cache.len() <= 16);
        }
        assert_eq!(cache.len(), 16);
    }

    #[test]
    fn concurrent_callers_record_each_fingerprint_once() {
        let cache = Arc::new(DedupCache::new(1024));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                let mut fresh = 0u32;
                for seq in 0..100 {
                    if !cache.check_and_record(fp("shared", seq)) {
                        fresh += 1;
                    }
                }
                fresh
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // Each of the 100 fingerprints is fresh for exactly one thread.
        assert_eq!(total, 100);
    }
}
