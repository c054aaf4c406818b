//! Bounded lookup cache in front of the route trees.
//!
//! [`LookupCache`] memoizes successful matches per `(method, literal path)`.
//! It is an accelerator only: the trees stay the source of truth, and misses
//! and method mismatches are never stored.
//!
//! Capacity is a hard ceiling rather than an eviction policy. Once full, new
//! entries are dropped and existing ones are left untouched, so memory stays
//! bounded even when clients send an unbounded variety of paths.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::Method;

#[derive(Debug)]
struct Entries<V> {
    by_method: HashMap<Method, HashMap<String, V>>,
    len: usize,
}

/// A reader/writer-locked, capacity-capped map from `(method, path)` to a
/// cached value.
///
/// Reads take the shared lock and run concurrently; inserts take the
/// exclusive lock.
///
/// # Examples
///
/// ```
/// use rtrouter::{Method, cache::LookupCache};
///
/// let cache = LookupCache::new(1);
/// assert!(cache.put(&Method::Get, "/a", 1));
/// assert!(!cache.put(&Method::Get, "/b", 2)); // full: dropped
/// assert_eq!(cache.get(&Method::Get, "/a"), Some(1));
/// assert_eq!(cache.get(&Method::Get, "/b"), None);
/// ```
#[derive(Debug)]
pub struct LookupCache<V> {
    capacity: usize,
    entries: RwLock<Entries<V>>,
}

impl<V: Clone> LookupCache<V> {
    /// Creates an empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(Entries {
                by_method: HashMap::new(),
                len: 0,
            }),
        }
    }

    /// Returns a clone of the cached value for `(method, path)`, if any.
    pub fn get(&self, method: &Method, path: &str) -> Option<V> {
        let entries = self.entries.read();
        entries.by_method.get(method)?.get(path).cloned()
    }

    /// Stores `value` for `(method, path)`.
    ///
    /// Returns `true` if the value is now cached. Returns `false` when the
    /// cache is full, in which case nothing changes. An existing entry for the
    /// same key is kept as is, since a path always resolves the same way.
    pub fn put(&self, method: &Method, path: &str, value: V) -> bool {
        // A full cache never changes, so misses skip the write lock.
        {
            let entries = self.entries.read();
            if entries.len >= self.capacity {
                return entries
                    .by_method
                    .get(method)
                    .is_some_and(|paths| paths.contains_key(path));
            }
        }

        let mut entries = self.entries.write();
        if let Some(paths) = entries.by_method.get(method) {
            if paths.contains_key(path) {
                return true;
            }
        }
        if entries.len >= self.capacity {
            tracing::debug!(%method, path, capacity = self.capacity, "lookup cache full");
            return false;
        }
        entries
            .by_method
            .entry(method.clone())
            .or_default()
            .insert(path.to_owned(), value);
        entries.len += 1;
        true
    }

    /// Number of cached entries across all methods.
    pub fn len(&self) -> usize {
        self.entries.read().len
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured ceiling.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn miss_on_empty() {
        let cache: LookupCache<u32> = LookupCache::new(4);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&Method::Get, "/"), None);
    }

    #[test]
    fn entries_are_scoped_by_method() {
        let cache = LookupCache::new(4);
        cache.put(&Method::Get, "/books", "get");
        cache.put(&Method::Post, "/books", "post");
        assert_eq!(cache.get(&Method::Get, "/books"), Some("get"));
        assert_eq!(cache.get(&Method::Post, "/books"), Some("post"));
        assert_eq!(cache.get(&Method::Put, "/books"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn full_cache_rejects_new_keys_and_keeps_old_ones() {
        let cache = LookupCache::new(3);
        for i in 0..10 {
            cache.put(&Method::Get, &format!("/item/{i}"), i);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.capacity(), 3);
        for i in 0..3 {
            assert_eq!(cache.get(&Method::Get, &format!("/item/{i}")), Some(i));
        }
        assert_eq!(cache.get(&Method::Get, "/item/3"), None);
    }

    #[test]
    fn reinserting_a_key_does_not_count_twice() {
        let cache = LookupCache::new(2);
        assert!(cache.put(&Method::Get, "/a", 1));
        assert!(cache.put(&Method::Get, "/a", 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&Method::Get, "/a"), Some(1));
    }

    #[test]
    fn saturated_cache_still_reports_known_keys() {
        let cache = LookupCache::new(1);
        assert!(cache.put(&Method::Get, "/a", 1));
        assert!(cache.put(&Method::Get, "/a", 2));
        assert!(!cache.put(&Method::Get, "/b", 3));
        assert!(!cache.put(&Method::Post, "/a", 4));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&Method::Get, "/a"), Some(1));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = LookupCache::new(0);
        assert!(!cache.put(&Method::Get, "/", ()));
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_writers_respect_capacity() {
        let cache = Arc::new(LookupCache::new(50));
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100 {
                        let path = format!("/t{t}/{i}");
                        if cache.put(&Method::Get, &path, (t, i)) {
                            assert_eq!(cache.get(&Method::Get, &path), Some((t, i)));
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(cache.len(), 50);
    }
}
