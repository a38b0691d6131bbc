use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Single-owner key-value cache. Callers that share one serialize access
/// themselves.
#[derive(Debug)]
pub struct LocalCache<K, V> {
    map: HashMap<K, V>,
}

impl<K, V> Default for LocalCache<K, V> {
    fn default() -> Self {
        Self { map: HashMap::new() }
    }
}

impl<K: Eq + Hash, V> LocalCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn set(&mut self, key: K, value: V) {
        self.map.insert(key, value);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }
}

impl<K: Eq + Hash + fmt::Display, V: fmt::Display> LocalCache<K, V> {
    pub fn dump(&self) -> String {
        let mut lines: Vec<String> = self.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        lines.sort();
        lines.join("\n")
    }
}
