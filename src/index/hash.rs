//! # Extendible Hash Index
//!
//! Point-lookup index with a doubling directory.
//!
//! ```text
//! global depth = 2          buckets (local depth)
//! ┌────┐
//! │ 00 │──────────────────> [A] (1)      directory slots 00 and 10
//! │ 01 │───> [B] (2)                     share bucket A until it splits
//! │ 10 │──────────────────> [A] (1)
//! │ 11 │───> [C] (2)
//! └────┘
//! ```
//!
//! A bucket overflow splits the bucket on the next hash bit; when the
//! bucket's local depth already equals the global depth the directory
//! doubles first. Entries that all collide on every bit would loop the
//! split, so a bucket whose entries cannot be separated simply grows past
//! its nominal capacity (duplicate keys land in one posting anyway).

use super::KeyIndex;
use crate::storage::Rid;
use parking_lot::RwLock;
use std::hash::{Hash, Hasher};

/// Entries per bucket before a split is attempted.
const BUCKET_CAPACITY: usize = 8;

struct Bucket {
    local_depth: u32,
    /// (key, posting) pairs; duplicate keys share one posting.
    entries: Vec<(Vec<u8>, Vec<Rid>)>,
}

struct Directory {
    global_depth: u32,
    /// 2^global_depth slots, each naming a bucket.
    slots: Vec<usize>,
    buckets: Vec<Bucket>,
}

fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl Directory {
    fn new() -> Self {
        Self {
            global_depth: 0,
            slots: vec![0],
            buckets: vec![Bucket { local_depth: 0, entries: Vec::new() }],
        }
    }

    fn slot_of(&self, key: &[u8]) -> usize {
        let mask = (1u64 << self.global_depth) - 1;
        (hash_key(key) & mask) as usize
    }

    fn insert(&mut self, key: &[u8], rid: Rid) {
        loop {
            let bucket_idx = self.slots[self.slot_of(key)];
            let bucket = &mut self.buckets[bucket_idx];

            if let Some((_, posting)) = bucket.entries.iter_mut().find(|(k, _)| k == key) {
                if !posting.contains(&rid) {
                    posting.push(rid);
                }
                return;
            }
            if bucket.entries.len() < BUCKET_CAPACITY {
                bucket.entries.push((key.to_vec(), vec![rid]));
                return;
            }
            if !self.split(bucket_idx) {
                // Pathological collision set: grow the bucket in place.
                self.buckets[bucket_idx].entries.push((key.to_vec(), vec![rid]));
                return;
            }
        }
    }

    /// Splits `bucket_idx` on its next hash bit, doubling the directory when
    /// the bucket is already at global depth. Returns false if no entry
    /// moved (all entries collide on the split bit too).
    fn split(&mut self, bucket_idx: usize) -> bool {
        if self.buckets[bucket_idx].local_depth >= 63 {
            return false;
        }
        if self.buckets[bucket_idx].local_depth == self.global_depth {
            // Directory doubling: every existing slot is mirrored.
            let old = self.slots.clone();
            self.slots.extend_from_slice(&old);
            self.global_depth += 1;
        }

        let local_depth = self.buckets[bucket_idx].local_depth;
        let split_bit = 1u64 << local_depth;
        let old_entries = std::mem::take(&mut self.buckets[bucket_idx].entries);
        let (stay, moved): (Vec<_>, Vec<_>) = old_entries
            .into_iter()
            .partition(|(k, _)| hash_key(k) & split_bit == 0);

        let sibling_idx = self.buckets.len();
        self.buckets[bucket_idx].local_depth = local_depth + 1;
        self.buckets[bucket_idx].entries = stay;
        let any_moved = !moved.is_empty();
        self.buckets.push(Bucket { local_depth: local_depth + 1, entries: moved });

        // Repoint the directory slots whose split bit selects the sibling.
        for (slot, target) in self.slots.iter_mut().enumerate() {
            if *target == bucket_idx && (slot as u64) & split_bit != 0 {
                *target = sibling_idx;
            }
        }
        any_moved
    }
}

pub struct ExtendibleHashIndex {
    directory: RwLock<Directory>,
}

impl ExtendibleHashIndex {
    pub fn new() -> Self {
        Self { directory: RwLock::new(Directory::new()) }
    }

    /// Current directory depth (diagnostics).
    pub fn global_depth(&self) -> u32 {
        self.directory.read().global_depth
    }
}

impl Default for ExtendibleHashIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndex for ExtendibleHashIndex {
    fn insert_entry(&self, key: &[u8], rid: Rid) {
        self.directory.write().insert(key, rid);
    }

    fn delete_entry(&self, key: &[u8], rid: Rid) {
        let mut dir = self.directory.write();
        let bucket_idx = dir.slots[dir.slot_of(key)];
        let bucket = &mut dir.buckets[bucket_idx];
        if let Some(pos) = bucket.entries.iter().position(|(k, _)| k == key) {
            bucket.entries[pos].1.retain(|r| *r != rid);
            if bucket.entries[pos].1.is_empty() {
                bucket.entries.remove(pos);
            }
        }
    }

    fn scan_key(&self, key: &[u8]) -> Vec<Rid> {
        let dir = self.directory.read();
        let bucket = &dir.buckets[dir.slots[dir.slot_of(key)]];
        bucket
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, posting)| posting.clone())
            .unwrap_or_default()
    }

    fn scan_all(&self) -> Vec<(Vec<u8>, Rid)> {
        let dir = self.directory.read();
        dir.buckets
            .iter()
            .flat_map(|bucket| {
                bucket.entries.iter().flat_map(|(key, posting)| {
                    posting.iter().map(move |&rid| (key.clone(), rid))
                })
            })
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
    use crate::types::Value;

    fn key(v: i64) -> Vec<u8> {
        encode_key(&[Value::BigInt(v)])
    }

    #[test]
    fn lookups_survive_directory_doubling() {
        let index = ExtendibleHashIndex::new();
        for i in 0..5000i64 {
            index.insert_entry(&key(i), Rid::new((i / 100) as u32, (i % 100) as u16));
        }
        assert!(index.global_depth() > 0, "5000 keys must force doubling");
        for i in (0..5000i64).step_by(97) {
            assert_eq!(
                index.scan_key(&key(i)),
                vec![Rid::new((i / 100) as u32, (i % 100) as u16)],
                "key {i}"
            );
        }
        assert!(index.scan_key(&key(9999)).is_empty());
    }

    #[test]
    fn duplicate_keys_share_one_posting() {
        let index = ExtendibleHashIndex::new();
        index.insert_entry(&key(7), Rid::new(0, 1));
        index.insert_entry(&key(7), Rid::new(0, 2));
        let mut rids = index.scan_key(&key(7));
        rids.sort();
        assert_eq!(rids, vec![Rid::new(0, 1), Rid::new(0, 2)]);
    }

    #[test]
    fn delete_is_exact() {
        let index = ExtendibleHashIndex::new();
        for i in 0..100i64 {
            index.insert_entry(&key(i), Rid::new(0, i as u16));
        }
        index.delete_entry(&key(50), Rid::new(0, 50));
        assert!(index.scan_key(&key(50)).is_empty());
        assert_eq!(index.scan_key(&key(51)), vec![Rid::new(0, 51)]);
    }

    #[test]
    fn scan_all_sees_every_entry() {
        let index = ExtendibleHashIndex::new();
        for i in 0..1000i64 {
            index.insert_entry(&key(i), Rid::new(0, (i % 100) as u16));
        }
        assert_eq!(index.scan_all().len(), 1000);
        assert!(!index.is_ordered());
    }
}
