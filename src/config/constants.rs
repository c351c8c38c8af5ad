//! # QuiverDB Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> TABLE_PAGE_HEADER_SIZE (8 bytes, fixed)
//!       │     [next_page_id:4][num_tuples:2][num_deleted_tuples:2]
//!       │
//!       ├─> TUPLE_SLOT_SIZE (20 bytes per slot)
//!       │     [offset:2][size:2][TupleMeta:16]
//!       │
//!       └─> MAX_TUPLE_SIZE (derived)
//!             The largest tuple that fits on an otherwise empty page.
//!
//! TXN_PENDING_BIT (1 << 63)
//!       │
//!       └─> Timestamps with this bit set are in-flight transaction ids;
//!           timestamps without it are committed commit timestamps. The
//!           comparison `ts <= read_ts` is therefore only meaningful after
//!           checking the bit.
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. `TABLE_PAGE_HEADER_SIZE + TUPLE_SLOT_SIZE <= PAGE_SIZE` (a page can
//!    hold at least one slot)
//! 2. `MAX_TUPLE_SIZE` derivation matches the page layout

// ============================================================================
// PAGE LAYOUT CONSTANTS
// These define the fundamental page structure used throughout the database
// ============================================================================

/// Size of each database page in bytes.
/// This is the fundamental unit of I/O and caching.
pub const PAGE_SIZE: usize = 4096;

/// Size of the table page header in bytes.
/// Layout: next_page_id (4) + num_tuples (2) + num_deleted_tuples (2).
pub const TABLE_PAGE_HEADER_SIZE: usize = 8;

/// Size of the per-slot tuple metadata in bytes.
/// Layout: ts (8) + is_deleted flag (1) + reserved (7).
pub const TUPLE_META_SIZE: usize = 16;

/// Size of one slot directory entry: offset (2) + size (2) + TupleMeta (16).
pub const TUPLE_SLOT_SIZE: usize = 4 + TUPLE_META_SIZE;

/// The largest serialized tuple that fits on an otherwise empty page.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - TABLE_PAGE_HEADER_SIZE - TUPLE_SLOT_SIZE;

const _: () = assert!(
    TABLE_PAGE_HEADER_SIZE + TUPLE_SLOT_SIZE <= PAGE_SIZE,
    "a table page must hold at least one slot"
);

const _: () = assert!(
    MAX_TUPLE_SIZE == PAGE_SIZE - TABLE_PAGE_HEADER_SIZE - TUPLE_SLOT_SIZE,
    "MAX_TUPLE_SIZE derivation mismatch"
);

// ============================================================================
// BUFFER POOL CONFIGURATION
// ============================================================================

/// Default number of page frames in the buffer pool.
pub const DEFAULT_BUFFER_POOL_FRAMES: usize = 64;

// ============================================================================
// TRANSACTION TIMESTAMPS
// ============================================================================

/// High bit marking a timestamp as an in-flight transaction id rather than a
/// committed commit timestamp.
pub const TXN_PENDING_BIT: u64 = 1 << 63;

/// Sentinel for "no timestamp assigned yet" (e.g. commit_ts before commit).
pub const INVALID_TS: u64 = u64::MAX;

// ============================================================================
// VECTOR INDEX DEFAULTS
// ============================================================================

/// Default HNSW maximum neighbors per node above level 0.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default HNSW construction beam width.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 100;

/// Default HNSW query beam width.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 64;

/// Default number of IVFFlat inverted lists (k-means centroids).
pub const IVF_DEFAULT_LISTS: usize = 16;

/// Default number of IVFFlat lists probed per query.
pub const IVF_DEFAULT_PROBE_LISTS: usize = 4;

/// Number of k-means refinement rounds when training an IVFFlat index.
pub const IVF_KMEANS_ITERATIONS: usize = 10;

/// Maximum number of entries in the distance memoization cache. When the
/// cache reaches this size it is cleared wholesale rather than evicted
/// entry-by-entry.
pub const DISTANCE_CACHE_CAPACITY: usize = 4096;

// ============================================================================
// BACKGROUND LOOPS
// ============================================================================

/// Default log flush interval in milliseconds (`log_timeout`).
pub const DEFAULT_LOG_TIMEOUT_MS: u64 = 1000;

/// Default deadlock detector period in milliseconds
/// (`cycle_detection_interval`). Recognized for compatibility; the detector
/// itself is not running because two-phase locking is not implemented.
pub const DEFAULT_CYCLE_DETECTION_INTERVAL_MS: u64 = 1000;
