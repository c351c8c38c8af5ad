//! # Table Heap
//!
//! A table's physical storage: a singly-linked chain of slotted table pages
//! rooted at `first_page_id`, threaded through the buffer pool.
//!
//! ```text
//! first_page_id                      last_page_id (cached)
//!      │                                  │
//!      ▼                                  ▼
//! [TablePage] ─next─> [TablePage] ─next─> [TablePage] ─next─> INVALID
//! ```
//!
//! ## Concurrency
//!
//! One reader/writer latch per page (owned by the buffer pool's guards). The
//! heap itself holds a small mutex protecting `last_page_id`; readers copy
//! the value and release it before touching any page latch. The only path
//! that holds a page latch and the mutex together is chain extension, and no
//! path acquires them in the opposite order.
//!
//! ## Iteration
//!
//! `iter()` snapshots `(last_page_id, tuples-in-last-page)` at creation and
//! stops exactly there, so an UPDATE scanning its own table never revisits
//! tuples it appended (Halloween-safe). `eager_iter()` is unbounded and
//! follows the chain until it ends; garbage collection uses it to see every
//! slot.

use crate::config::MAX_TUPLE_SIZE;
use crate::error::DbError;
use crate::storage::table_page::TupleMeta;
use crate::storage::{BufferPoolManager, PageId, Rid, Tuple, INVALID_PAGE_ID};
use eyre::{ensure, Result};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

/// Conflict check run under the page write latch before an in-place update.
pub type UpdateCheck<'a> = &'a mut dyn FnMut(&TupleMeta, &Tuple, Rid) -> bool;

impl TableHeap {
    /// Creates a heap with one empty page.
    pub fn create(bpm: Arc<BufferPoolManager>) -> Result<Self> {
        let first_page_id = {
            let mut guard = bpm.new_page()?;
            guard.table_page_mut().init();
            guard.page_id()
        };
        Ok(Self { bpm, first_page_id, last_page_id: Mutex::new(first_page_id) })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Appends a tuple to the heap, extending the page chain when the last
    /// page is full. Fails only for tuples that cannot fit on an empty page.
    pub fn insert_tuple(&self, meta: TupleMeta, tuple: &Tuple) -> Result<Rid> {
        ensure!(
            tuple.data().len() <= MAX_TUPLE_SIZE,
            DbError::Execution(format!(
                "tuple of {} bytes exceeds the page capacity of {MAX_TUPLE_SIZE}",
                tuple.data().len()
            ))
        );

        loop {
            let last = *self.last_page_id.lock();
            let mut guard = self.bpm.fetch_page_write(last)?;
            if let Some(slot) = guard.table_page_mut().insert_tuple(meta, tuple) {
                return Ok(Rid::new(last, slot));
            }

            // Page is full: extend the chain. The page latch is still held so
            // nobody else can chain off this page concurrently; the mutex
            // arbitrates which extender wins when two see the same full page.
            let mut last_lock = self.last_page_id.lock();
            if *last_lock != last {
                // Someone already extended; retry against the new last page.
                continue;
            }
            let mut new_guard = self.bpm.new_page()?;
            new_guard.table_page_mut().init();
            let new_page_id = new_guard.page_id();
            guard.table_page_mut().set_next_page_id(new_page_id);
            *last_lock = new_page_id;
            drop(last_lock);
            drop(guard);

            let slot = new_guard
                .table_page_mut()
                .insert_tuple(meta, tuple)
                .expect("fresh page must fit a tuple below MAX_TUPLE_SIZE");
            return Ok(Rid::new(new_page_id, slot));
        }
    }

    /// Meta-only update (commit stamping, tombstoning).
    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: Rid) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        guard.table_page_mut().update_tuple_meta(meta, rid.slot)
    }

    /// Overwrites a slot under its page write latch. When `check` is given it
    /// runs against the old meta/tuple while the latch is held; returning
    /// false skips the write (the caller observed a conflict). The new
    /// payload must not exceed the slot's capacity.
    pub fn update_tuple_in_place(
        &self,
        meta: TupleMeta,
        tuple: &Tuple,
        rid: Rid,
        check: Option<UpdateCheck<'_>>,
    ) -> Result<bool> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        let mut page = guard.table_page_mut();
        let (old_meta, old_tuple) = page.as_ref().tuple(rid)?;
        if let Some(check) = check {
            if !check(&old_meta, &old_tuple, rid) {
                return Ok(false);
            }
        }
        page.update_tuple_in_place(meta, tuple, rid.slot)?;
        Ok(true)
    }

    pub fn get_tuple(&self, rid: Rid) -> Result<(TupleMeta, Tuple)> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        guard.table_page().tuple(rid)
    }

    pub fn get_tuple_meta(&self, rid: Rid) -> Result<TupleMeta> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        guard.table_page().tuple_meta(rid.slot)
    }

    /// Halloween-safe cursor: scans exactly the tuples present at call time.
    pub fn iter(self: &Arc<Self>) -> Result<TableIter> {
        let last = *self.last_page_id.lock();
        let stop_slot = {
            let guard = self.bpm.fetch_page_read(last)?;
            guard.table_page().num_tuples()
        };
        Ok(TableIter {
            heap: Arc::clone(self),
            cursor: Rid::new(self.first_page_id, 0),
            stop: Some(Rid::new(last, stop_slot)),
            done: false,
        })
    }

    /// Unbounded cursor: follows the page chain until it ends.
    pub fn eager_iter(self: &Arc<Self>) -> TableIter {
        TableIter {
            heap: Arc::clone(self),
            cursor: Rid::new(self.first_page_id, 0),
            stop: None,
            done: false,
        }
    }
}

pub struct TableIter {
    heap: Arc<TableHeap>,
    cursor: Rid,
    stop: Option<Rid>,
    done: bool,
}

impl TableIter {
    /// Yields every slot in heap order, tombstones included; MVCC visibility
    /// is the caller's concern.
    pub fn next(&mut self) -> Result<Option<(TupleMeta, Tuple, Rid)>> {
        while !self.done {
            if let Some(stop) = self.stop {
                if self.cursor.page_id == stop.page_id && self.cursor.slot >= stop.slot {
                    self.done = true;
                    break;
                }
            }
            let guard = self.heap.bpm.fetch_page_read(self.cursor.page_id)?;
            let page = guard.table_page();
            if self.cursor.slot >= page.num_tuples() {
                let next = page.next_page_id();
                if next == INVALID_PAGE_ID {
                    self.done = true;
                    break;
                }
                self.cursor = Rid::new(next, 0);
                continue;
            }
            let rid = self.cursor;
            let (meta, tuple) = page.tuple(rid)?;
            self.cursor.slot += 1;
            return Ok(Some((meta, tuple, rid)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use crate::types::{Column, Schema, TypeId, Value};

    fn heap() -> Arc<TableHeap> {
        let bpm = BufferPoolManager::new(16, DiskManager::in_memory());
        Arc::new(TableHeap::create(bpm).unwrap())
    }

    fn schema() -> Schema {
        Schema::new(vec![Column::new("a", TypeId::Integer), Column::new_varchar("s", 64)])
    }

    fn tuple(a: i32) -> Tuple {
        Tuple::from_values(
            &[Value::Integer(a), Value::Varchar(format!("row-{a}"))],
            &schema(),
        )
        .unwrap()
    }

    #[test]
    fn insert_then_get_round_trips_bytes() {
        let heap = heap();
        let t = tuple(1);
        let rid = heap.insert_tuple(TupleMeta::new(5, false), &t).unwrap();

        let (meta, got) = heap.get_tuple(rid).unwrap();
        assert_eq!(meta.ts(), 5);
        assert_eq!(got.data(), t.data());
        assert_eq!(got.rid(), Some(rid));
    }

    #[test]
    fn oversized_tuple_is_rejected() {
        let heap = heap();
        let schema = Schema::new(vec![Column::new_varchar("s", 8000)]);
        let big = Tuple::from_values(&[Value::Varchar("x".repeat(5000))], &schema).unwrap();
        assert!(heap.insert_tuple(TupleMeta::new(0, false), &big).is_err());
    }

    #[test]
    fn inserts_spill_across_pages() {
        let heap = heap();
        let mut rids = Vec::new();
        for i in 0..1000 {
            rids.push(heap.insert_tuple(TupleMeta::new(0, false), &tuple(i)).unwrap());
        }
        let pages: std::collections::HashSet<_> = rids.iter().map(|r| r.page_id).collect();
        assert!(pages.len() > 1, "1000 rows should span multiple pages");

        // Every row is still readable after the chain grew.
        for (i, rid) in rids.iter().enumerate() {
            let (_, t) = heap.get_tuple(*rid).unwrap();
            assert_eq!(t.values(&schema()).unwrap()[0], Value::Integer(i as i32));
        }
    }

    #[test]
    fn iterator_scans_in_insert_order() {
        let heap = heap();
        for i in 0..300 {
            heap.insert_tuple(TupleMeta::new(0, false), &tuple(i)).unwrap();
        }
        let mut iter = heap.iter().unwrap();
        let mut seen = 0;
        while let Some((_, t, _)) = iter.next().unwrap() {
            assert_eq!(t.values(&schema()).unwrap()[0], Value::Integer(seen));
            seen += 1;
        }
        assert_eq!(seen, 300);
    }

    #[test]
    fn iterator_ignores_rows_inserted_after_snapshot() {
        let heap = heap();
        for i in 0..10 {
            heap.insert_tuple(TupleMeta::new(0, false), &tuple(i)).unwrap();
        }
        let mut iter = heap.iter().unwrap();
        for i in 10..20 {
            heap.insert_tuple(TupleMeta::new(0, false), &tuple(i)).unwrap();
        }
        let mut seen = 0;
        while iter.next().unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 10, "iterator must stop at its creation snapshot");

        let mut eager = heap.eager_iter();
        let mut total = 0;
        while eager.next().unwrap().is_some() {
            total += 1;
        }
        assert_eq!(total, 20);
    }

    #[test]
    fn update_check_can_veto_the_write() {
        let heap = heap();
        let rid = heap.insert_tuple(TupleMeta::new(1, false), &tuple(1)).unwrap();

        let mut vetoed = false;
        let updated = heap
            .update_tuple_in_place(
                TupleMeta::new(2, false),
                &tuple(2),
                rid,
                Some(&mut |old: &TupleMeta, _: &Tuple, _: Rid| {
                    vetoed = old.ts() != 1;
                    old.ts() == 1
                }),
            )
            .unwrap();
        assert!(updated);
        assert!(!vetoed);

        // Second update with a check expecting the original stamp fails.
        let updated = heap
            .update_tuple_in_place(
                TupleMeta::new(3, false),
                &tuple(3),
                rid,
                Some(&mut |old: &TupleMeta, _: &Tuple, _: Rid| old.ts() == 1),
            )
            .unwrap();
        assert!(!updated);
        let (meta, t) = heap.get_tuple(rid).unwrap();
        assert_eq!(meta.ts(), 2);
        assert_eq!(t.values(&schema()).unwrap()[0], Value::Integer(2));
    }

    #[test]
    fn tombstone_via_meta_update() {
        let heap = heap();
        let rid = heap.insert_tuple(TupleMeta::new(1, false), &tuple(1)).unwrap();
        heap.update_tuple_meta(TupleMeta::new(2, true), rid).unwrap();
        let meta = heap.get_tuple_meta(rid).unwrap();
        assert!(meta.is_deleted());
        assert_eq!(meta.ts(), 2);
    }
}
