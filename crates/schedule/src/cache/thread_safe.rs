use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Mutex;

use crate::scheduler::lock;

/// Key-value cache shared between worker threads.
///
/// Values are handed out by clone, so callers store cheap handles such as
/// `Arc<AsyncResult<_>>`.
pub struct ThreadSafeCache<K, V> {
    map: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for ThreadSafeCache<K, V> {
    fn default() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> ThreadSafeCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        lock(&self.map).get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        lock(&self.map).insert(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        lock(&self.map).remove(key)
    }

    /// Return the cached value, or insert the one built by `make`.
    /// The flag tells whether this call inserted it.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> (V, bool) {
        let mut map = lock(&self.map);
        if let Some(value) = map.get(&key) {
            return (value.clone(), false);
        }
        let value = make();
        map.insert(key, value.clone());
        (value, true)
    }

    pub fn contains(&self, key: &K) -> bool {
        lock(&self.map).contains_key(key)
    }

    pub fn clear(&self) {
        lock(&self.map).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.map).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.map).is_empty()
    }
}

impl<K: fmt::Display, V: fmt::Display> ThreadSafeCache<K, V> {
    /// One `key: value` line per entry, sorted for stable output.
    pub fn dump(&self) -> String {
        let map = lock(&self.map);
        let mut lines: Vec<String> = map.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        lines.sort();
        lines.join("\n")
    }
}

impl<K, V> fmt::Debug for ThreadSafeCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeCache")
            .field("len", &lock(&self.map).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn set_get_remove() {
        let cache = ThreadSafeCache::new();
        assert!(cache.is_empty());
        cache.set("a", 1);
        cache.set("a", 2);
        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(&"a"), Some(2));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn only_one_thread_inserts() {
        let cache = Arc::new(ThreadSafeCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get_or_insert_with("k", || i))
            })
            .collect();
        let results: Vec<(i32, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|(_, inserted)| *inserted).count(), 1);
        let winner = cache.get(&"k").unwrap();
        assert!(results.iter().all(|(v, _)| *v == winner));
    }

    #[test]
    fn dump_is_sorted() {
        let cache = ThreadSafeCache::new();
        cache.set("b", 2);
        cache.set("a", 1);
        assert_eq!(cache.dump(), "a: 1\nb: 2");
        cache.clear();
        assert_eq!(cache.dump(), "");
    }
}
