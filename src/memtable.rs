//! The in-memory write buffer. A plain key-sorted map; deletion is simply an
//! insert of the TOMBSTONE sentinel, so the map never needs to distinguish
//! "present" from "deleted" at this layer — the engine does that at read
//! time.

use std::collections::btree_map::IntoIter;
use std::collections::BTreeMap;

pub struct Memtable {
    table: BTreeMap<String, String>,
    capacity: usize,
}

impl Memtable {
    pub fn new(capacity: usize) -> Self {
        Memtable {
            table: BTreeMap::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.table.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.table.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Ascending key order, matching the invariant every segment file must
    /// also uphold.
    pub fn drain(&mut self) -> IntoIter<String, String> {
        std::mem::take(&mut self.table).into_iter()
    }

    pub fn capacity_reached(&self) -> bool {
        self.table.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_delete_is_a_tombstone_value() {
        let mut memtable = Memtable::new(5);
        memtable.insert("k1".to_owned(), "v1".to_owned());
        memtable.insert("k1".to_owned(), "TOMBSTONE".to_owned());
        assert_eq!(memtable.get("k1"), Some("TOMBSTONE"));
    }

    #[test]
    fn capacity_reached_is_advisory() {
        let mut memtable = Memtable::new(2);
        assert!(!memtable.capacity_reached());
        memtable.insert("k1".to_owned(), "v1".to_owned());
        assert!(!memtable.capacity_reached());
        memtable.insert("k2".to_owned(), "v2".to_owned());
        assert!(memtable.capacity_reached());
    }

    #[test]
    fn drain_yields_ascending_key_order() {
        let mut memtable = Memtable::new(10);
        memtable.insert("k3".to_owned(), "v3".to_owned());
        memtable.insert("k1".to_owned(), "v1".to_owned());
        memtable.insert("k2".to_owned(), "v2".to_owned());
        let keys: Vec<_> = memtable.drain().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["k1", "k2", "k3"]);
        assert!(memtable.is_empty());
    }
}
