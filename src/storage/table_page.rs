//! # Slotted Table Page
//!
//! A `TablePage` is a view over one raw page frame holding heap tuples.
//!
//! ## Layout (offsets from page start)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ----------------------------------------------
//! 0       4     next_page_id (u32, chain link; u32::MAX = end)
//! 4       2     num_tuples
//! 6       2     num_deleted_tuples
//! 8       20*n  slot directory: (offset:2, size:2, TupleMeta:16)
//! ...           free space
//! ...           tuple payloads, growing down from the page end
//! 4096          page end
//! ```
//!
//! Invariants:
//! - The slot directory and the tuple payload region never overlap.
//! - Deleted slots keep their directory entry with the tombstone flag set
//!   (logical delete); slot indices are stable for the life of the page.
//! - A slot's `size` is its payload capacity, fixed at insert. In-place
//!   updates may write fewer bytes; the remainder is zeroed. Readers
//!   tolerate the slack because variable-width cells carry explicit lengths.
//!
//! ## TupleMeta
//!
//! Every slot carries a 16-byte `TupleMeta`: the version timestamp `ts`
//! (an in-flight transaction id when the pending bit is set, otherwise a
//! committed commit timestamp) and the tombstone flag. The struct is
//! `zerocopy`-transmutable so metadata reads never copy the page.

use crate::config::{PAGE_SIZE, TABLE_PAGE_HEADER_SIZE, TUPLE_META_SIZE, TUPLE_SLOT_SIZE};
use crate::error::DbError;
use crate::storage::{Rid, Tuple, INVALID_PAGE_ID};
use crate::zerocopy_accessors;
use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Per-slot version metadata.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TupleMeta {
    ts: U64,
    is_deleted: u8,
    reserved: [u8; 7],
}

const _: () = assert!(size_of::<TupleMeta>() == TUPLE_META_SIZE);

impl TupleMeta {
    pub fn new(ts: u64, is_deleted: bool) -> Self {
        Self { ts: U64::new(ts), is_deleted: is_deleted as u8, reserved: [0; 7] }
    }

    pub fn ts(&self) -> u64 {
        self.ts.get()
    }

    pub fn set_ts(&mut self, ts: u64) {
        self.ts = U64::new(ts);
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted != 0
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.is_deleted = deleted as u8;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct TablePageHeader {
    next_page_id: U32,
    num_tuples: U16,
    num_deleted_tuples: U16,
}

const _: () = assert!(size_of::<TablePageHeader>() == TABLE_PAGE_HEADER_SIZE);

impl TablePageHeader {
    zerocopy_accessors! {
        next_page_id: u32,
        num_tuples: u16,
        num_deleted_tuples: u16,
    }
}

/// Read-only view over a page buffer.
pub struct TablePageRef<'a> {
    data: &'a [u8],
}

impl<'a> TablePageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    fn header(&self) -> &TablePageHeader {
        TablePageHeader::ref_from_bytes(&self.data[..TABLE_PAGE_HEADER_SIZE]).unwrap()
    }

    pub fn next_page_id(&self) -> u32 {
        self.header().next_page_id()
    }

    pub fn num_tuples(&self) -> u16 {
        self.header().num_tuples()
    }

    pub fn num_deleted_tuples(&self) -> u16 {
        self.header().num_deleted_tuples()
    }

    fn slot_base(slot: u16) -> usize {
        TABLE_PAGE_HEADER_SIZE + slot as usize * TUPLE_SLOT_SIZE
    }

    fn slot(&self, slot: u16) -> (u16, u16) {
        let base = Self::slot_base(slot);
        let offset = u16::from_le_bytes(self.data[base..base + 2].try_into().unwrap());
        let size = u16::from_le_bytes(self.data[base + 2..base + 4].try_into().unwrap());
        (offset, size)
    }

    fn check_slot(&self, slot: u16) -> Result<()> {
        ensure!(
            slot < self.num_tuples(),
            DbError::Execution(format!(
                "slot {slot} out of range (page holds {})",
                self.num_tuples()
            ))
        );
        Ok(())
    }

    pub fn tuple_meta(&self, slot: u16) -> Result<TupleMeta> {
        self.check_slot(slot)?;
        let base = Self::slot_base(slot) + 4;
        Ok(TupleMeta::read_from_bytes(&self.data[base..base + TUPLE_META_SIZE]).unwrap())
    }

    pub fn tuple(&self, rid: Rid) -> Result<(TupleMeta, Tuple)> {
        let meta = self.tuple_meta(rid.slot)?;
        let (offset, size) = self.slot(rid.slot);
        let mut tuple = Tuple::from_bytes(self.data[offset as usize..(offset + size) as usize].to_vec());
        tuple.set_rid(rid);
        Ok((meta, tuple))
    }
}

/// Mutable view over a page buffer.
pub struct TablePageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn as_ref(&self) -> TablePageRef<'_> {
        TablePageRef::new(self.data)
    }

    fn header_mut(&mut self) -> &mut TablePageHeader {
        TablePageHeader::mut_from_bytes(&mut self.data[..TABLE_PAGE_HEADER_SIZE]).unwrap()
    }

    /// Formats an empty table page in place.
    pub fn init(&mut self) {
        let header = self.header_mut();
        header.set_next_page_id(INVALID_PAGE_ID);
        header.set_num_tuples(0);
        header.set_num_deleted_tuples(0);
    }

    pub fn set_next_page_id(&mut self, page_id: u32) {
        self.header_mut().set_next_page_id(page_id);
    }

    /// Where the next tuple of `size` bytes would land, or `None` if the page
    /// cannot fit it alongside one more slot entry.
    fn next_tuple_offset(&self, size: usize) -> Option<usize> {
        let page = self.as_ref();
        let n = page.num_tuples();
        let payload_start = if n == 0 {
            PAGE_SIZE
        } else {
            let (offset, _) = page.slot(n - 1);
            offset as usize
        };
        let offset = payload_start.checked_sub(size)?;
        let directory_end = TABLE_PAGE_HEADER_SIZE + (n as usize + 1) * TUPLE_SLOT_SIZE;
        (offset >= directory_end).then_some(offset)
    }

    /// Appends a tuple, returning its slot index, or `None` if it does not
    /// fit on this page.
    pub fn insert_tuple(&mut self, meta: TupleMeta, tuple: &Tuple) -> Option<u16> {
        let size = tuple.data().len();
        if size > u16::MAX as usize {
            return None;
        }
        let offset = self.next_tuple_offset(size)?;
        let slot = self.as_ref().num_tuples();

        self.data[offset..offset + size].copy_from_slice(tuple.data());
        let base = TablePageRef::slot_base(slot);
        self.data[base..base + 2].copy_from_slice(&(offset as u16).to_le_bytes());
        self.data[base + 2..base + 4].copy_from_slice(&(size as u16).to_le_bytes());
        self.data[base + 4..base + 4 + TUPLE_META_SIZE].copy_from_slice(meta.as_bytes());

        let deleted = meta.is_deleted();
        let header = self.header_mut();
        header.set_num_tuples(slot + 1);
        if deleted {
            let d = header.num_deleted_tuples();
            header.set_num_deleted_tuples(d + 1);
        }
        Some(slot)
    }

    /// Meta-only update; used for commit stamping and tombstoning.
    pub fn update_tuple_meta(&mut self, meta: TupleMeta, slot: u16) -> Result<()> {
        let old = self.as_ref().tuple_meta(slot)?;
        let base = TablePageRef::slot_base(slot) + 4;
        self.data[base..base + TUPLE_META_SIZE].copy_from_slice(meta.as_bytes());
        if meta.is_deleted() != old.is_deleted() {
            let header = self.header_mut();
            let d = header.num_deleted_tuples();
            if meta.is_deleted() {
                header.set_num_deleted_tuples(d + 1);
            } else {
                header.set_num_deleted_tuples(d.saturating_sub(1));
            }
        }
        Ok(())
    }

    /// Overwrites a slot's payload and meta. The new payload must fit the
    /// slot's capacity; slack beyond the new payload is zeroed.
    pub fn update_tuple_in_place(&mut self, meta: TupleMeta, tuple: &Tuple, slot: u16) -> Result<()> {
        let (offset, capacity) = {
            let page = self.as_ref();
            page.check_slot(slot)?;
            page.slot(slot)
        };
        let size = tuple.data().len();
        ensure!(
            size <= capacity as usize,
            DbError::Execution(format!(
                "in-place update grows tuple from {capacity} to {size} bytes"
            ))
        );
        let at = offset as usize;
        self.data[at..at + size].copy_from_slice(tuple.data());
        self.data[at + size..at + capacity as usize].fill(0);
        self.update_tuple_meta(meta, slot)
    }
}
