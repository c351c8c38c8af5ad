//! # Disk Manager
//!
//! Page-granular I/O over a single heap file. The buffer pool is the only
//! caller; it reads whole pages into frames and writes whole frames back.
//!
//! Two backings exist:
//! - **File**: positioned reads/writes (`read_at`/`write_at`) against one
//!   flat file of `PAGE_SIZE` pages. Reading past the current end zero-fills,
//!   so freshly allocated pages need no explicit formatting write.
//! - **Memory**: a plain page vector for tests and `:memory:` databases.
//!
//! The manager is deliberately dumb: no free list, no checksums, no
//! scatter/gather. Page allocation policy lives in the buffer pool.

use crate::config::PAGE_SIZE;
use crate::error::DbError;
use eyre::{Result, WrapErr};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

enum Backing {
    File(File),
    Memory(Vec<Box<[u8]>>),
}

pub struct DiskManager {
    backing: Backing,
}

impl DiskManager {
    /// Opens (or creates) the heap file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())
            .wrap_err_with(|| format!("opening heap file {}", path.as_ref().display()))?;
        Ok(Self { backing: Backing::File(file) })
    }

    /// A volatile backing for tests and `:memory:` instances.
    pub fn in_memory() -> Self {
        Self { backing: Backing::Memory(Vec::new()) }
    }

    pub fn read_page(&self, page_id: u32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        match &self.backing {
            Backing::File(file) => {
                let at = page_id as u64 * PAGE_SIZE as u64;
                let len = file.metadata().map_err(io_err)?.len();
                if at >= len {
                    buf.fill(0);
                    return Ok(());
                }
                file.read_exact_at(buf, at).map_err(io_err)?;
            }
            Backing::Memory(pages) => match pages.get(page_id as usize) {
                Some(page) => buf.copy_from_slice(page),
                None => buf.fill(0),
            },
        }
        Ok(())
    }

    pub fn write_page(&mut self, page_id: u32, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        match &mut self.backing {
            Backing::File(file) => {
                let at = page_id as u64 * PAGE_SIZE as u64;
                file.write_all_at(buf, at).map_err(io_err)?;
            }
            Backing::Memory(pages) => {
                if pages.len() <= page_id as usize {
                    pages.resize_with(page_id as usize + 1, || {
                        vec![0u8; PAGE_SIZE].into_boxed_slice()
                    });
                }
                pages[page_id as usize].copy_from_slice(buf);
            }
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if let Backing::File(file) = &self.backing {
            file.sync_data().map_err(io_err)?;
        }
        Ok(())
    }
}

fn io_err(err: std::io::Error) -> eyre::Report {
    DbError::Io(err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backing_round_trips() {
        let mut disk = DiskManager::in_memory();
        let page = vec![0xAB; PAGE_SIZE];
        disk.write_page(3, &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(3, &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn unwritten_pages_read_as_zero() {
        let disk = DiskManager::in_memory();
        let mut out = vec![0xFF; PAGE_SIZE];
        disk.read_page(9, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn file_backing_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heap.qdb");
        let mut disk = DiskManager::open(&path).unwrap();

        let page = vec![0x5C; PAGE_SIZE];
        disk.write_page(2, &page).unwrap();
        disk.sync().unwrap();

        let reopened = DiskManager::open(&path).unwrap();
        let mut out = vec![0u8; PAGE_SIZE];
        reopened.read_page(2, &mut out).unwrap();
        assert_eq!(out, page);

        // Page 1 was never written; the gap reads as zeros.
        reopened.read_page(1, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }
}
