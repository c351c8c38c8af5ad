//! # Write-Ahead Log Observer
//!
//! A best-effort append-only log of transaction and mutation events. It is
//! an observer, not a durability mechanism: records describe what happened
//! (begin/commit/abort, insert/update/delete by RID) and nothing replays
//! them — crash recovery is an explicit non-goal.
//!
//! ## Frame Format
//!
//! ```text
//! [len:u32][crc32:u32][payload: tag:u8 + fields, little-endian]
//! ```
//!
//! The CRC covers the payload so a torn tail is detectable by eye when
//! inspecting a log file.
//!
//! ## Flush Discipline
//!
//! `append` only buffers. A background thread flushes the buffer to the
//! `.wal` sink every `log_timeout` milliseconds (a live session variable,
//! re-read each round); in-memory instances flush into a counter and drop
//! the bytes. The thread is joined by [`LogManager::stop`], which the
//! database calls on shutdown after a final flush.

use crate::config::SessionConfig;
use crate::storage::Rid;
use crate::txn::Ts;
use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Begin { txn: Ts },
    Commit { txn: Ts, commit_ts: Ts },
    Abort { txn: Ts },
    Insert { table_oid: u32, rid: Rid },
    Update { table_oid: u32, rid: Rid },
    Delete { table_oid: u32, rid: Rid },
}

impl LogRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::with_capacity(24);
        match self {
            LogRecord::Begin { txn } => {
                payload.push(0x01);
                payload.extend_from_slice(&txn.to_le_bytes());
            }
            LogRecord::Commit { txn, commit_ts } => {
                payload.push(0x02);
                payload.extend_from_slice(&txn.to_le_bytes());
                payload.extend_from_slice(&commit_ts.to_le_bytes());
            }
            LogRecord::Abort { txn } => {
                payload.push(0x03);
                payload.extend_from_slice(&txn.to_le_bytes());
            }
            LogRecord::Insert { table_oid, rid }
            | LogRecord::Update { table_oid, rid }
            | LogRecord::Delete { table_oid, rid } => {
                payload.push(match self {
                    LogRecord::Insert { .. } => 0x10,
                    LogRecord::Update { .. } => 0x11,
                    _ => 0x12,
                });
                payload.extend_from_slice(&table_oid.to_le_bytes());
                payload.extend_from_slice(&rid.page_id.to_le_bytes());
                payload.extend_from_slice(&rid.slot.to_le_bytes());
            }
        }
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&CRC32.checksum(&payload).to_le_bytes());
        out.extend_from_slice(&payload);
    }
}

pub struct LogManager {
    buffer: Mutex<Vec<u8>>,
    sink: Mutex<Option<File>>,
    config: Arc<SessionConfig>,
    flushed_bytes: AtomicU64,
    shutdown: AtomicBool,
    flusher: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl LogManager {
    /// Starts the manager and its background flush loop. `path` of `None`
    /// keeps the log in memory (flushes only advance the byte counter).
    pub fn start(path: Option<PathBuf>, config: Arc<SessionConfig>) -> Result<Arc<LogManager>> {
        let sink = match path {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| crate::error::DbError::Io(format!("opening wal {}: {e}", path.display())))?,
            ),
            None => None,
        };
        let manager = Arc::new(LogManager {
            buffer: Mutex::new(Vec::new()),
            sink: Mutex::new(sink),
            config,
            flushed_bytes: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            flusher: Mutex::new(None),
        });

        let worker = Arc::clone(&manager);
        let handle = std::thread::Builder::new()
            .name("quiverdb-log-flush".into())
            .spawn(move || worker.flush_loop())
            .expect("spawning log flush thread");
        *manager.flusher.lock() = Some(handle);
        Ok(manager)
    }

    pub fn append(&self, record: &LogRecord) {
        record.encode(&mut self.buffer.lock());
    }

    /// Drains the buffer into the sink. Sink failures are logged and the
    /// bytes dropped; the log is best-effort by contract.
    pub fn flush(&self) {
        let pending = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };
        if let Some(file) = self.sink.lock().as_mut() {
            if let Err(err) = file.write_all(&pending) {
                warn!(%err, "wal flush failed; dropping {} bytes", pending.len());
                return;
            }
        }
        self.flushed_bytes.fetch_add(pending.len() as u64, Ordering::Relaxed);
        debug!(bytes = pending.len(), "wal flush");
    }

    pub fn flushed_bytes(&self) -> u64 {
        self.flushed_bytes.load(Ordering::Relaxed)
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Final flush + joins the background thread. Idempotent.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
        self.flush();
    }

    fn flush_loop(&self) {
        let mut last_flush = Instant::now();
        while !self.shutdown.load(Ordering::SeqCst) {
            // Sleep in short slices so shutdown and log_timeout changes both
            // take effect promptly.
            std::thread::sleep(Duration::from_millis(20));
            let timeout = Duration::from_millis(self.config.log_timeout_ms().max(1));
            if last_flush.elapsed() >= timeout {
                self.flush();
                last_flush = Instant::now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<LogManager> {
        LogManager::start(None, Arc::new(SessionConfig::new())).unwrap()
    }

    #[test]
    fn append_buffers_until_flush() {
        let log = manager();
        log.append(&LogRecord::Begin { txn: crate::config::TXN_PENDING_BIT | 1 });
        assert!(log.pending_bytes() > 0);
        assert_eq!(log.flushed_bytes(), 0);
        log.flush();
        assert_eq!(log.pending_bytes(), 0);
        assert!(log.flushed_bytes() > 0);
        log.stop();
    }

    #[test]
    fn frames_carry_length_and_crc() {
        let mut out = Vec::new();
        LogRecord::Insert { table_oid: 3, rid: Rid::new(4, 5) }.encode(&mut out);
        let len = u32::from_le_bytes(out[0..4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(out[4..8].try_into().unwrap());
        let payload = &out[8..8 + len];
        assert_eq!(out.len(), 8 + len);
        assert_eq!(crc, CRC32.checksum(payload));
        assert_eq!(payload[0], 0x10);
    }

    #[test]
    fn file_sink_receives_flushed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.wal");
        let config = Arc::new(SessionConfig::new());
        let log = LogManager::start(Some(path.clone()), config).unwrap();
        log.append(&LogRecord::Commit { txn: crate::config::TXN_PENDING_BIT | 2, commit_ts: 9 });
        log.flush();
        log.stop();
        let written = std::fs::metadata(&path).unwrap().len();
        assert!(written > 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let log = manager();
        log.stop();
        log.stop();
    }
}
