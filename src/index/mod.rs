//! # Index Substrate
//!
//! Secondary indexes over the table heap. Two capability families share the
//! substrate:
//!
//! - [`KeyIndex`]: exact-key structures (B+Tree, extendible hash, and the
//!   ordered/unordered in-memory reference maps). Keys are order-preserving
//!   byte encodings of the key tuple ([`encoding`]), so every structure
//!   compares with plain `memcmp`.
//! - [`VectorIndex`]: approximate nearest-neighbor structures (HNSW,
//!   IVFFlat) retrieving the top-k RIDs under a distance function.
//!
//! ## MVCC Integration
//!
//! Index updates are not transactional with the heap: an entry may
//! momentarily point at a version other readers cannot see yet, and deleted
//! graph nodes linger as traversal stepping stones. Executors therefore
//! re-validate every RID through MVCC reconstruction before emitting it.

pub mod btree;
pub mod distance;
pub mod encoding;
pub mod hash;
pub mod hnsw;
pub mod ivfflat;
pub mod reference;

pub use btree::BPlusTreeIndex;
pub use distance::{DistanceCache, DistanceComputer, DistanceKind};
pub use encoding::encode_key;
pub use hash::ExtendibleHashIndex;
pub use hnsw::{HnswIndex, HnswOptions};
pub use ivfflat::{IvfFlatIndex, IvfFlatOptions};
pub use reference::{OrderedIndex, UnorderedIndex};

use crate::storage::Rid;

/// Exact-key index contract. `key` is the memcomparable encoding of the key
/// tuple.
pub trait KeyIndex: Send + Sync {
    fn insert_entry(&self, key: &[u8], rid: Rid);

    fn delete_entry(&self, key: &[u8], rid: Rid);

    /// All RIDs stored under exactly `key`.
    fn scan_key(&self, key: &[u8]) -> Vec<Rid>;

    /// Every entry, in key order where the structure is ordered (hash
    /// variants return an arbitrary order).
    fn scan_all(&self) -> Vec<(Vec<u8>, Rid)>;

    /// True if `scan_all` yields entries in key order.
    fn is_ordered(&self) -> bool;
}

/// Approximate nearest-neighbor index contract.
pub trait VectorIndex: Send + Sync {
    /// Bulk-loads the index from `(vector, rid)` pairs. IVFFlat trains its
    /// centroids here; HNSW inserts incrementally.
    fn build(&self, entries: &[(Vec<f64>, Rid)]);

    fn insert_entry(&self, vector: &[f64], rid: Rid);

    fn delete_entry(&self, vector: &[f64], rid: Rid);

    /// Top-k nearest RIDs to `query` under the index's distance function,
    /// nearest first.
    fn scan_vector_key(&self, query: &[f64], k: usize) -> Vec<Rid>;

    fn distance_kind(&self) -> DistanceKind;
}

/// What to construct for `CREATE INDEX ... USING <method>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    BTree,
    Hash,
    Ordered,
    Unordered,
    Hnsw,
    IvfFlat,
}

impl IndexKind {
    pub fn name(self) -> &'static str {
        match self {
            IndexKind::BTree => "btree",
            IndexKind::Hash => "hash",
            IndexKind::Ordered => "ordered",
            IndexKind::Unordered => "unordered",
            IndexKind::Hnsw => "hnsw",
            IndexKind::IvfFlat => "ivfflat",
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, IndexKind::Hnsw | IndexKind::IvfFlat)
    }
}
