//! # Buffer Pool Manager
//!
//! A fixed array of page frames fronting the disk manager. Every page access
//! goes through here; the table heap and indexes never touch the disk
//! directly.
//!
//! ## Pin/Latch Protocol
//!
//! ```text
//! fetch_page_read(pid)
//!       │  pool latch: page table lookup / load, pin_count += 1
//!       ▼
//! ReadPageGuard ── holds the page's shared latch
//!       │
//!       ▼ drop
//! unpin: pin_count -= 1; frame becomes evictable at zero
//! ```
//!
//! Guards are self-contained handles: they keep the pool alive (`Arc`), hold
//! the page latch for their lifetime (parking_lot `arc_lock` guards), and
//! unpin on every exit path. A `WritePageGuard` additionally marks the frame
//! dirty when dropped.
//!
//! ## Locking Rules
//!
//! - The pool's internal tables (page table, free list, replacer) sit behind
//!   one mutex; page latches are separate per-frame `RwLock`s.
//! - Disk I/O for a miss happens while the pool mutex is held. That keeps
//!   load races impossible at the cost of serializing misses, which is the
//!   right trade for an educational pool.
//! - Guard drop takes the pool mutex *before* its latch is released, never
//!   while waiting on a latch, so the two lock levels cannot deadlock.
//!
//! ## Failure Model
//!
//! `new_page`/`fetch_page_*` fail with `Io` when every frame is pinned;
//! fetch fails on an I/O error from the disk manager. Eviction writes dirty
//! victims back before reuse.

use crate::config::PAGE_SIZE;
use crate::error::DbError;
use crate::storage::replacer::{ClockReplacer, FrameId, Replacer};
use crate::storage::table_page::{TablePageMut, TablePageRef};
use crate::storage::{DiskManager, PageId, INVALID_PAGE_ID};
use eyre::Result;
use hashbrown::HashMap;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

type PageBuf = Box<[u8]>;

struct Frame {
    data: Arc<RwLock<PageBuf>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    /// Which page each frame currently holds; INVALID_PAGE_ID when free.
    frame_page: Vec<PageId>,
    free_list: Vec<FrameId>,
    replacer: Box<dyn Replacer>,
}

pub struct BufferPoolManager {
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    disk: Mutex<DiskManager>,
    next_page_id: AtomicU32,
}

impl BufferPoolManager {
    pub fn new(num_frames: usize, disk: DiskManager) -> Arc<Self> {
        Self::with_replacer(num_frames, disk, Box::new(ClockReplacer::new(num_frames)))
    }

    /// Builds a pool with a caller-supplied replacement policy.
    pub fn with_replacer(
        num_frames: usize,
        disk: DiskManager,
        replacer: Box<dyn Replacer>,
    ) -> Arc<Self> {
        let frames = (0..num_frames)
            .map(|_| Frame {
                data: Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
                pin_count: AtomicU32::new(0),
                dirty: AtomicBool::new(false),
            })
            .collect();
        Arc::new(Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(num_frames),
                frame_page: vec![INVALID_PAGE_ID; num_frames],
                free_list: (0..num_frames).rev().collect(),
                replacer,
            }),
            disk: Mutex::new(disk),
            next_page_id: AtomicU32::new(0),
        })
    }

    /// Allocates a fresh page id and returns it write-latched and zeroed.
    pub fn new_page(self: &Arc<Self>) -> Result<WritePageGuard> {
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        let frame_id = {
            let mut state = self.state.lock();
            let frame_id = self.obtain_frame(&mut state)?;
            self.frames[frame_id].data.write().fill(0);
            self.frames[frame_id].dirty.store(true, Ordering::Release);
            self.install(&mut state, page_id, frame_id);
            frame_id
        };
        let guard = self.frames[frame_id].data.write_arc();
        Ok(WritePageGuard { bpm: Arc::clone(self), frame_id, page_id, guard })
    }

    /// Fetches a page under its shared latch.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let guard = self.frames[frame_id].data.read_arc();
        Ok(ReadPageGuard { bpm: Arc::clone(self), frame_id, page_id, guard })
    }

    /// Fetches a page under its exclusive latch.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.pin_frame(page_id)?;
        let guard = self.frames[frame_id].data.write_arc();
        Ok(WritePageGuard { bpm: Arc::clone(self), frame_id, page_id, guard })
    }

    /// Writes one resident page back to disk.
    pub fn flush_page(self: &Arc<Self>, page_id: PageId) -> Result<()> {
        let guard = self.fetch_page_read(page_id)?;
        self.disk.lock().write_page(page_id, guard.data())?;
        self.frames[guard.frame_id].dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Writes every resident page back to disk.
    pub fn flush_all(self: &Arc<Self>) -> Result<()> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        self.disk.lock().sync()
    }

    /// Number of frames currently pinned (test/diagnostic hook).
    pub fn pinned_frames(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| f.pin_count.load(Ordering::Acquire) > 0)
            .count()
    }

    /// Pins the frame holding `page_id`, loading it on a miss. Returns with
    /// the pin held and no latch taken.
    fn pin_frame(&self, page_id: PageId) -> Result<FrameId> {
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.frames[frame_id].pin_count.fetch_add(1, Ordering::AcqRel);
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        let frame_id = self.obtain_frame(&mut state)?;
        {
            let mut buf = self.frames[frame_id].data.write();
            self.disk.lock().read_page(page_id, &mut buf)?;
        }
        self.frames[frame_id].dirty.store(false, Ordering::Release);
        self.install(&mut state, page_id, frame_id);
        Ok(frame_id)
    }

    /// Finds a reusable frame: free list first, then the replacer. Dirty
    /// victims are written back before reuse. Caller holds the pool mutex.
    fn obtain_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }
        let Some(victim) = state.replacer.evict() else {
            return Err(DbError::Io("buffer pool exhausted: every frame is pinned".into()).into());
        };
        debug_assert_eq!(self.frames[victim].pin_count.load(Ordering::Acquire), 0);

        let old_page = state.frame_page[victim];
        if self.frames[victim].dirty.swap(false, Ordering::AcqRel) {
            let buf = self.frames[victim].data.read();
            self.disk.lock().write_page(old_page, &buf)?;
        }
        state.page_table.remove(&old_page);
        state.frame_page[victim] = INVALID_PAGE_ID;
        Ok(victim)
    }

    fn install(&self, state: &mut PoolState, page_id: PageId, frame_id: FrameId) {
        state.page_table.insert(page_id, frame_id);
        state.frame_page[frame_id] = page_id;
        self.frames[frame_id].pin_count.store(1, Ordering::Release);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
    }

    fn unpin(&self, frame_id: FrameId, dirty: bool) {
        if dirty {
            self.frames[frame_id].dirty.store(true, Ordering::Release);
        }
        let mut state = self.state.lock();
        let prev = self.frames[frame_id].pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin on unpinned frame");
        if prev == 1 {
            state.replacer.set_evictable(frame_id, true);
        }
    }
}

/// Shared-latched, pinned view of one page.
pub struct ReadPageGuard {
    bpm: Arc<BufferPoolManager>,
    frame_id: FrameId,
    page_id: PageId,
    guard: ArcRwLockReadGuard<RawRwLock, PageBuf>,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }

    pub fn table_page(&self) -> TablePageRef<'_> {
        TablePageRef::new(self.data())
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Unpin before the latch is released; see module docs for ordering.
        self.bpm.unpin(self.frame_id, false);
    }
}

/// Exclusive-latched, pinned view of one page.
pub struct WritePageGuard {
    bpm: Arc<BufferPoolManager>,
    frame_id: FrameId,
    page_id: PageId,
    guard: ArcRwLockWriteGuard<RawRwLock, PageBuf>,
}

impl std::fmt::Debug for WritePageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePageGuard")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id)
            .finish()
    }
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.guard[..]
    }

    pub fn table_page(&self) -> TablePageRef<'_> {
        TablePageRef::new(&self.guard[..])
    }

    pub fn table_page_mut(&mut self) -> TablePageMut<'_> {
        TablePageMut::new(&mut self.guard[..])
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.bpm.unpin(self.frame_id, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(frames: usize) -> Arc<BufferPoolManager> {
        BufferPoolManager::new(frames, DiskManager::in_memory())
    }

    #[test]
    fn new_pages_get_sequential_ids() {
        let bpm = pool(4);
        let a = bpm.new_page().unwrap();
        let b = bpm.new_page().unwrap();
        assert_eq!(a.page_id(), 0);
        assert_eq!(b.page_id(), 1);
    }

    #[test]
    fn written_data_survives_eviction() {
        let bpm = pool(2);
        let first = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 0xCD;
            guard.page_id()
        };

        // Push the first page out through the tiny pool.
        for _ in 0..4 {
            let _ = bpm.new_page().unwrap();
        }

        let guard = bpm.fetch_page_read(first).unwrap();
        assert_eq!(guard.data()[0], 0xCD);
    }

    #[test]
    fn exhausted_pool_reports_io_error() {
        let bpm = pool(2);
        let _a = bpm.new_page().unwrap();
        let _b = bpm.new_page().unwrap();
        let err = bpm.new_page().unwrap_err();
        assert!(matches!(
            crate::error::db_error(&err),
            Some(DbError::Io(_))
        ));
    }

    #[test]
    fn guards_unpin_on_drop() {
        let bpm = pool(2);
        let pid = {
            let guard = bpm.new_page().unwrap();
            assert_eq!(bpm.pinned_frames(), 1);
            guard.page_id()
        };
        assert_eq!(bpm.pinned_frames(), 0);

        let read = bpm.fetch_page_read(pid).unwrap();
        let again = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(read.page_id(), again.page_id());
        drop(read);
        drop(again);
        assert_eq!(bpm.pinned_frames(), 0);
    }

    #[test]
    fn concurrent_readers_share_the_latch() {
        let bpm = pool(4);
        let pid = bpm.new_page().unwrap().page_id();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let bpm = Arc::clone(&bpm);
                std::thread::spawn(move || {
                    let guard = bpm.fetch_page_read(pid).unwrap();
                    assert_eq!(guard.data().len(), PAGE_SIZE);
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(bpm.pinned_frames(), 0);
    }

    #[test]
    fn flush_all_persists_dirty_pages() {
        let bpm = pool(4);
        let pid = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[7] = 0x77;
            guard.page_id()
        };
        bpm.flush_all().unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        bpm.disk.lock().read_page(pid, &mut out).unwrap();
        assert_eq!(out[7], 0x77);
    }
}
