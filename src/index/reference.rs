//! Reference index implementations over the standard map types: the ordered
//! variant wraps a `BTreeMap`, the unordered one a `HashMap`. They trade
//! performance for obviousness and anchor the test suite — every structural
//! index must agree with these on any workload.

use super::KeyIndex;
use crate::storage::Rid;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::collections::BTreeMap;

type Posting = SmallVec<[Rid; 1]>;

pub struct OrderedIndex {
    map: RwLock<BTreeMap<Vec<u8>, Posting>>,
}

impl OrderedIndex {
    pub fn new() -> Self {
        Self { map: RwLock::new(BTreeMap::new()) }
    }
}

impl Default for OrderedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndex for OrderedIndex {
    fn insert_entry(&self, key: &[u8], rid: Rid) {
        let mut map = self.map.write();
        let posting = map.entry(key.to_vec()).or_default();
        if !posting.contains(&rid) {
            posting.push(rid);
        }
    }

    fn delete_entry(&self, key: &[u8], rid: Rid) {
        let mut map = self.map.write();
        if let Some(posting) = map.get_mut(key) {
            posting.retain(|r| *r != rid);
            if posting.is_empty() {
                map.remove(key);
            }
        }
    }

    fn scan_key(&self, key: &[u8]) -> Vec<Rid> {
        self.map.read().get(key).map(|p| p.to_vec()).unwrap_or_default()
    }

    fn scan_all(&self) -> Vec<(Vec<u8>, Rid)> {
        self.map
            .read()
            .iter()
            .flat_map(|(key, posting)| posting.iter().map(move |&rid| (key.clone(), rid)))
            .collect()
    }

    fn is_ordered(&self) -> bool {
        true
    }
}

pub struct UnorderedIndex {
    map: RwLock<hashbrown::HashMap<Vec<u8>, Posting>>,
}

impl UnorderedIndex {
    pub fn new() -> Self {
        Self { map: RwLock::new(hashbrown::HashMap::new()) }
    }
}

impl Default for UnorderedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndex for UnorderedIndex {
    fn insert_entry(&self, key: &[u8], rid: Rid) {
        let mut map = self.map.write();
        let posting = map.entry(key.to_vec()).or_default();
        if !posting.contains(&rid) {
            posting.push(rid);
        }
    }

    fn delete_entry(&self, key: &[u8], rid: Rid) {
        let mut map = self.map.write();
        if let Some(posting) = map.get_mut(key) {
            posting.retain(|r| *r != rid);
            if posting.is_empty() {
                map.remove(key);
            }
        }
    }

    fn scan_key(&self, key: &[u8]) -> Vec<Rid> {
        self.map.read().get(key).map(|p| p.to_vec()).unwrap_or_default()
    }

    fn scan_all(&self) -> Vec<(Vec<u8>, Rid)> {
        self.map
            .read()
            .iter()
            .flat_map(|(key, posting)| posting.iter().map(move |&rid| (key.clone(), rid)))
            .collect()
    }

    fn is_ordered(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::encode_key;
    use crate::index::BPlusTreeIndex;
    use crate::types::Value;

    fn key(v: i64) -> Vec<u8> {
        encode_key(&[Value::BigInt(v)])
    }

    #[test]
    fn ordered_scan_all_is_sorted() {
        let index = OrderedIndex::new();
        for v in [5i64, 1, 9, 3] {
            index.insert_entry(&key(v), Rid::new(0, v as u16));
        }
        let all = index.scan_all();
        for pair in all.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    #[test]
    fn btree_agrees_with_ordered_reference() {
        let reference = OrderedIndex::new();
        let btree = BPlusTreeIndex::new();
        // Interleaved inserts and deletes driven by a fixed pattern.
        for i in 0..2000i64 {
            let v = (i * 37) % 500;
            reference.insert_entry(&key(v), Rid::new(0, v as u16));
            btree.insert_entry(&key(v), Rid::new(0, v as u16));
            if i % 3 == 0 {
                let d = (i * 11) % 500;
                reference.delete_entry(&key(d), Rid::new(0, d as u16));
                btree.delete_entry(&key(d), Rid::new(0, d as u16));
            }
        }
        assert_eq!(reference.scan_all(), btree.scan_all());
        for v in 0..500i64 {
            assert_eq!(reference.scan_key(&key(v)), btree.scan_key(&key(v)), "key {v}");
        }
    }

    #[test]
    fn unordered_point_lookups() {
        let index = UnorderedIndex::new();
        index.insert_entry(&key(1), Rid::new(0, 1));
        index.insert_entry(&key(2), Rid::new(0, 2));
        assert_eq!(index.scan_key(&key(2)), vec![Rid::new(0, 2)]);
        index.delete_entry(&key(2), Rid::new(0, 2));
        assert!(index.scan_key(&key(2)).is_empty());
    }
}
