//! Generic keyed LRU with stat-based invalidation (component A, §4.A).
//!
//! Every adapter cache — directory listing, metadata, message timeline — is
//! an instance of `StampedCache<K, T>`. The cache never performs I/O itself;
//! callers stat the file, decide whether to reuse or reparse, and call back
//! in with the result.

use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::path::Path;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::model::CacheEntry;

struct Slot<T> {
    entry: CacheEntry<T>,
    seq: u64,
}

struct Inner<K, T> {
    slots: HashMap<K, Slot<T>>,
    next_seq: u64,
}

/// A thread-safe `(size, mtime)`-stamped LRU cache keyed on `K`.
///
/// All mutating operations take the same lock; no operation blocks on I/O
/// while holding it (§5 — "locks must not be held across file I/O").
pub struct StampedCache<K, T> {
    inner: Mutex<Inner<K, T>>,
    capacity: usize,
}

impl<K, T> StampedCache<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new(capacity: usize) -> Self {
        StampedCache {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Returns a deep copy of the payload only if the stored stamp matches
    /// `size`/`mtime` exactly. On hit, `last_access` is refreshed to now.
    pub fn get(&self, key: &K, size: u64, mtime: SystemTime) -> Option<T> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(key)?;
        if slot.entry.size != size || slot.entry.mtime != mtime {
            return None;
        }
        slot.entry.last_access = SystemTime::now();
        Some(slot.entry.payload.clone())
    }

    /// Read-only accessor for the incremental/tail-only re-parse path: hands
    /// back whatever is cached regardless of whether the stamp still
    /// matches, leaving the reuse decision to the caller. Does not touch
    /// `last_access`.
    pub fn get_with_offset(&self, key: &K) -> Option<(T, u64, u64, SystemTime)> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(key)?;
        Some((
            slot.entry.payload.clone(),
            slot.entry.byte_offset,
            slot.entry.size,
            slot.entry.mtime,
        ))
    }

    /// Overwrites any prior entry for `key`, then evicts least-recently-used
    /// entries (ties broken by insertion order) until at capacity.
    pub fn set(&self, key: K, payload: T, size: u64, mtime: SystemTime, byte_offset: u64) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert(
            key,
            Slot {
                entry: CacheEntry {
                    payload,
                    size,
                    mtime,
                    last_access: SystemTime::now(),
                    byte_offset,
                },
                seq,
            },
        );
        evict(&mut inner, self.capacity);
    }

    pub fn delete(&self, key: &K) {
        let mut inner = self.inner.lock();
        inner.slots.remove(key);
    }

    /// Removes every entry whose key matches `predicate`. Used to prune the
    /// metadata cache against the latest directory listing (§4.C.2).
    pub fn delete_if(&self, predicate: impl Fn(&K) -> bool) {
        let mut inner = self.inner.lock();
        inner.slots.retain(|k, _| !predicate(k));
    }

    /// Drops the entry for `key` if its stamp no longer matches `size`/`mtime`.
    /// Returns whether the entry was (still) present and changed.
    pub fn invalidate_if_changed(&self, key: &K, size: u64, mtime: SystemTime) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get(key) else {
            return false;
        };
        if slot.entry.size != size || slot.entry.mtime != mtime {
            inner.slots.remove(key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict<K: Eq + Hash + Clone, T>(inner: &mut Inner<K, T>, capacity: usize) {
    while inner.slots.len() > capacity {
        let victim = inner
            .slots
            .iter()
            .min_by_key(|(_, slot)| (slot.entry.last_access, slot.seq))
            .map(|(k, _)| k.clone());
        let Some(victim) = victim else { break };
        inner.slots.remove(&victim);
    }
}

/// Whether `path`'s current stat diverges from a cached `(size, mtime)`
/// stamp, and whether the divergence is consistent with append-only growth.
///
/// Returns `(changed, grew, current_size, current_mtime)`. A genuine append
/// both grows the file and advances its mtime, so `grew` requires a strict
/// size increase *and* a strictly later mtime. Per §9's open question, a
/// size increase at an *unchanged* mtime is also disallowed — it indicates
/// the source may have rewritten prefix bytes rather than appended — and a
/// regressed mtime (even alongside growth, the "filesystem that lies" case)
/// is likewise not treated as append-compatible. Callers use `grew` (not
/// just `changed`) to decide between a cheap tail-only reparse and a full
/// one.
pub fn file_changed(
    path: &Path,
    cached_size: u64,
    cached_mtime: SystemTime,
) -> std::io::Result<(bool, bool, u64, SystemTime)> {
    let meta = fs::metadata(path)?;
    let size = meta.len();
    let mtime = meta.modified()?;
    let changed = size != cached_size || mtime != cached_mtime;
    let grew = size > cached_size && mtime > cached_mtime;
    Ok((changed, grew, size, mtime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stamp(n: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(n)
    }

    #[test]
    fn exact_hit_returns_payload_and_refreshes_access() {
        let cache: StampedCache<String, i32> = StampedCache::new(4);
        cache.set("a".into(), 42, 100, stamp(1), 0);
        assert_eq!(cache.get(&"a".to_string(), 100, stamp(1)), Some(42));
    }

    #[test]
    fn stamp_mismatch_is_a_miss() {
        let cache: StampedCache<String, i32> = StampedCache::new(4);
        cache.set("a".into(), 42, 100, stamp(1), 0);
        assert_eq!(cache.get(&"a".to_string(), 101, stamp(1)), None);
    }

    #[test]
    fn eviction_respects_capacity() {
        let cache: StampedCache<String, i32> = StampedCache::new(2);
        cache.set("a".into(), 1, 10, stamp(1), 0);
        cache.set("b".into(), 2, 10, stamp(2), 0);
        cache.set("c".into(), 3, 10, stamp(3), 0);
        assert!(cache.len() <= 2);
    }

    #[test]
    fn eviction_never_drops_most_recently_accessed() {
        let cache: StampedCache<String, i32> = StampedCache::new(2);
        cache.set("a".into(), 1, 10, stamp(1), 0);
        cache.set("b".into(), 2, 10, stamp(2), 0);
        // touch "a" so it is now the most recently accessed
        cache.get(&"a".to_string(), 10, stamp(1));
        cache.set("c".into(), 3, 10, stamp(3), 0);
        assert_eq!(cache.get(&"a".to_string(), 10, stamp(1)), Some(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn delete_if_prunes_by_predicate() {
        let cache: StampedCache<String, i32> = StampedCache::new(10);
        cache.set("keep".into(), 1, 10, stamp(1), 0);
        cache.set("drop-me".into(), 2, 10, stamp(1), 0);
        cache.delete_if(|k| k.starts_with("drop"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"keep".to_string(), 10, stamp(1)), Some(1));
    }

    #[test]
    fn invalidate_if_changed_removes_stale_entry() {
        let cache: StampedCache<String, i32> = StampedCache::new(10);
        cache.set("a".into(), 1, 10, stamp(1), 0);
        assert!(cache.invalidate_if_changed(&"a".to_string(), 20, stamp(1)));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn invalidate_if_changed_keeps_matching_entry() {
        let cache: StampedCache<String, i32> = StampedCache::new(10);
        cache.set("a".into(), 1, 10, stamp(1), 0);
        assert!(!cache.invalidate_if_changed(&"a".to_string(), 10, stamp(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_sets_never_exceed_capacity() {
        let cache: StampedCache<u64, u64> = StampedCache::new(8);
        std::thread::scope(|scope| {
            for t in 0..16 {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..50 {
                        cache.set(t * 50 + i, i, 10, stamp(1), 0);
                    }
                });
            }
        });
        assert!(cache.len() <= 8);
    }

    #[test]
    fn file_changed_detects_growth_as_append_compatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jsonl");
        std::fs::write(&path, b"abc").unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        let mtime = meta.modified().unwrap();
        std::fs::write(&path, b"abcdef").unwrap();
        // A real append advances mtime; set it explicitly later rather than
        // relying on filesystem timestamp resolution between the two writes.
        let later = mtime + Duration::from_secs(1);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(later)).unwrap();
        let (changed, grew, size, _) = file_changed(&path, 3, mtime).unwrap();
        assert!(changed);
        assert!(grew);
        assert_eq!(size, 6);
    }

    #[test]
    fn file_changed_same_mtime_with_growth_is_not_a_grow() {
        // §9 open question: same mtime + larger size is disallowed too — it
        // looks like append-only growth but may be a rewritten prefix.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jsonl");
        std::fs::write(&path, b"abc").unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        let mtime = meta.modified().unwrap();
        std::fs::write(&path, b"abcdef").unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(mtime)).unwrap();
        let (changed, grew, size, _) = file_changed(&path, 3, mtime).unwrap();
        assert!(changed);
        assert!(!grew);
        assert_eq!(size, 6);
    }

    #[test]
    fn file_changed_mtime_regression_is_not_a_grow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.jsonl");
        std::fs::write(&path, b"abc").unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        let mtime = meta.modified().unwrap();
        std::fs::write(&path, b"abcdef").unwrap();
        let earlier = mtime - Duration::from_secs(10);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(earlier)).unwrap();
        let (changed, grew, _, _) = file_changed(&path, 3, mtime).unwrap();
        assert!(changed);
        assert!(!grew);
    }
}
