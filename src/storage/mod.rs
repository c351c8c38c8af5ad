//! # Storage Layer
//!
//! Everything between raw bytes on disk and typed tuples in executors:
//!
//! - [`DiskManager`]: page-granular I/O over one heap file (or memory).
//! - [`BufferPoolManager`]: fixed frame array, pin counts, RAII page guards,
//!   pluggable [`Replacer`] eviction.
//! - [`TablePageRef`]/[`TablePageMut`]: the slotted page format with per-slot
//!   [`TupleMeta`] version stamps.
//! - [`Tuple`]/[`Rid`]: the packed row codec and physical addresses.
//! - [`TableHeap`]: the page chain a table lives in, with Halloween-safe
//!   iteration.

pub mod buffer_pool;
pub mod disk;
pub mod replacer;
pub mod table_heap;
pub mod table_page;
pub mod tuple;

pub use buffer_pool::{BufferPoolManager, ReadPageGuard, WritePageGuard};
pub use disk::DiskManager;
pub use replacer::{ClockReplacer, FrameId, Replacer};
pub use table_heap::{TableHeap, TableIter};
pub use table_page::{TablePageMut, TablePageRef, TupleMeta};
pub use tuple::{Rid, Tuple};

/// Physical page number inside the heap file.
pub type PageId = u32;

/// Chain terminator / "no page" sentinel.
pub const INVALID_PAGE_ID: PageId = u32::MAX;
