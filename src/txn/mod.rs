//! # Multi-Version Concurrency Control
//!
//! Snapshot isolation (plus an experimental serializable mode) over per-tuple
//! version chains.
//!
//! ## Version Storage: Inline Newest + Undo Chain
//!
//! The newest version of every tuple lives in its heap slot; older versions
//! are partial-column patches owned by the writing transactions, linked into
//! a chain that leads into the past:
//!
//! ```text
//!        [ heap slot ]                 [ txn 9's undo log ]
//!        ┌──────────────────┐          ┌───────────────────────┐
//!        │ meta.ts = txn9   │   ┌────> │ #0 ts=1 {b:1}  prev ──┼──> INVALID
//!        │ payload (1,3,1)  │   │      └───────────────────────┘
//!        └──────────────────┘   │
//!              version_links ───┘  (rid -> (txn_id, log_idx))
//! ```
//!
//! ## Visibility
//!
//! A reader at `read_ts = r` sees exactly the committed versions with
//! `commit_ts <= r`, plus its own writes. Anything newer (or pending from
//! another transaction) is rewound through the chain by
//! [`version::reconstruct_tuple`].
//!
//! ## Write Conflicts
//!
//! A write to a tuple whose slot carries another live transaction's pending
//! stamp, or a commit stamp newer than the writer's snapshot, is a
//! write-write conflict: the writer is tainted and must abort. Detection
//! happens under the page write latch, so two writers racing one slot cannot
//! both pass.
//!
//! ## Garbage Collection
//!
//! The watermark (minimum live read timestamp, or the commit counter when
//! idle) bounds reclamation: every chain keeps its first entry at or below
//! the watermark and drops everything older, rewriting the chain before any
//! entry is freed. Finished transactions whose entries are all reclaimed
//! leave the transaction map.

pub mod transaction;
pub mod version;
pub mod watermark;

pub use transaction::{
    format_ts, is_pending, txn_seq, IsolationLevel, Transaction, TransactionState, Ts, UndoLink,
    UndoLog,
};
pub use watermark::Watermark;

use crate::catalog::{Catalog, TableInfo, TableOid};
use crate::config::TXN_PENDING_BIT;
use crate::error::DbError;
use crate::storage::{Rid, TupleMeta, Tuple};
use crate::types::Schema;
use eyre::{ensure, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// True if a write stamped `meta_ts` by someone else blocks `txn` from
/// writing the same tuple.
pub fn write_conflicts(meta_ts: Ts, txn: &Transaction) -> bool {
    if is_pending(meta_ts) {
        meta_ts != txn.id()
    } else {
        meta_ts > txn.read_ts()
    }
}

pub struct TransactionManager {
    next_txn_seq: AtomicU64,
    last_commit_ts: AtomicU64,
    txn_map: RwLock<HashMap<Ts, Arc<Transaction>>>,
    /// Chain heads: rid -> newest undo entry. Individual reads/writes are
    /// atomic under the map mutex; writers are additionally serialized per
    /// RID by the page write latch they hold while installing links.
    version_links: Mutex<HashMap<Rid, UndoLink>>,
    watermark: Mutex<Watermark>,
    /// Serializes commit validation with commit-timestamp allocation, and
    /// makes begin's snapshot + watermark registration atomic.
    commit_lock: Mutex<()>,
    catalog: OnceLock<Arc<Catalog>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_seq: AtomicU64::new(1),
            last_commit_ts: AtomicU64::new(0),
            txn_map: RwLock::new(HashMap::new()),
            version_links: Mutex::new(HashMap::new()),
            watermark: Mutex::new(Watermark::new(0)),
            commit_lock: Mutex::new(()),
            catalog: OnceLock::new(),
        }
    }

    /// Post-construction wiring; commit/abort/GC need the catalog to reach
    /// table heaps, and the catalog is built after the manager.
    pub fn wire_catalog(&self, catalog: Arc<Catalog>) {
        let _ = self.catalog.set(catalog);
    }

    fn catalog(&self) -> &Arc<Catalog> {
        self.catalog.get().expect("transaction manager used before catalog wiring")
    }

    pub fn last_commit_ts(&self) -> Ts {
        self.last_commit_ts.load(Ordering::SeqCst)
    }

    pub fn watermark(&self) -> Ts {
        self.watermark.lock().watermark()
    }

    pub fn get_txn(&self, id: Ts) -> Option<Arc<Transaction>> {
        self.txn_map.read().get(&id).cloned()
    }

    /// Looks up a transaction by its human-readable sequence number.
    pub fn get_txn_by_seq(&self, seq: u64) -> Option<Arc<Transaction>> {
        self.get_txn(TXN_PENDING_BIT | seq)
    }

    pub fn active_txns(&self) -> Vec<Arc<Transaction>> {
        self.txn_map
            .read()
            .values()
            .filter(|t| {
                matches!(t.state(), TransactionState::Running | TransactionState::Tainted)
            })
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let _serial = self.commit_lock.lock();
        let seq = self.next_txn_seq.fetch_add(1, Ordering::SeqCst);
        let id = TXN_PENDING_BIT | seq;
        let read_ts = self.last_commit_ts();
        self.watermark.lock().add_txn(read_ts);

        let txn = Arc::new(Transaction::new(id, read_ts, isolation));
        self.txn_map.write().insert(id, Arc::clone(&txn));
        debug!(txn = seq, read_ts, ?isolation, "begin");
        txn
    }

    /// Validates and commits. On success every slot this transaction wrote is
    /// re-stamped with the fresh commit timestamp (clearing the in-flight
    /// marker) before the commit counter advances.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<Ts> {
        ensure!(
            txn.state() == TransactionState::Running,
            DbError::Execution(format!(
                "cannot commit transaction txn{} in state {}",
                txn.seq(),
                txn.state()
            ))
        );

        let _serial = self.commit_lock.lock();
        let writes = txn.write_set_snapshot();

        // Snapshot-isolation validation is local: every write must still
        // carry our in-flight stamp. Conflicts taint at write time, so a
        // foreign stamp here means an invariant was broken upstream.
        for &(oid, rid) in &writes {
            let table = self.table(oid)?;
            let meta = table.heap.get_tuple_meta(rid)?;
            ensure!(
                meta.ts() == txn.id(),
                DbError::Execution(format!(
                    "commit validation failed: tuple {rid} no longer carries txn{}",
                    txn.seq()
                ))
            );
        }

        if txn.isolation() == IsolationLevel::Serializable {
            if let Err(err) = self.validate_serializable(txn) {
                txn.set_state(TransactionState::Tainted);
                return Err(err);
            }
        }

        let commit_ts = self.last_commit_ts() + 1;
        for &(oid, rid) in &writes {
            let table = self.table(oid)?;
            let mut meta = table.heap.get_tuple_meta(rid)?;
            meta.set_ts(commit_ts);
            table.heap.update_tuple_meta(meta, rid)?;
        }

        txn.set_commit_ts(commit_ts);
        txn.set_state(TransactionState::Committed);
        self.last_commit_ts.store(commit_ts, Ordering::SeqCst);
        {
            let mut wm = self.watermark.lock();
            wm.update_commit_ts(commit_ts);
            wm.remove_txn(txn.read_ts());
        }
        debug!(txn = txn.seq(), commit_ts, writes = writes.len(), "commit");
        Ok(commit_ts)
    }

    /// Backward validation for serializable mode: any transaction that
    /// committed after our snapshot and wrote a RID we read is an
    /// anti-dependency cycle risk, so the commit is rejected.
    fn validate_serializable(&self, txn: &Arc<Transaction>) -> Result<()> {
        // A read-only transaction always serializes at its snapshot.
        if txn.write_set_snapshot().is_empty() {
            return Ok(());
        }
        let reads: HashSet<Rid> = txn.read_set_snapshot().into_iter().collect();
        if reads.is_empty() {
            return Ok(());
        }
        let others: Vec<Arc<Transaction>> = self.txn_map.read().values().cloned().collect();
        for other in others {
            if other.id() == txn.id() || other.state() != TransactionState::Committed {
                continue;
            }
            let Some(commit_ts) = other.commit_ts() else { continue };
            if commit_ts <= txn.read_ts() {
                continue;
            }
            for (_, rid) in other.write_set_snapshot() {
                if reads.contains(&rid) {
                    return Err(DbError::Execution(format!(
                        "serializable validation failed: txn{} read tuple {rid} which txn{} wrote at ts {commit_ts}",
                        txn.seq(),
                        other.seq()
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Rolls back by replay: every written slot is rewound to its pre-image
    /// using the transaction's own undo entries, then the chain head is
    /// restored to the pre-transaction link.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        ensure!(
            matches!(txn.state(), TransactionState::Running | TransactionState::Tainted),
            DbError::Execution(format!(
                "cannot abort transaction txn{} in state {}",
                txn.seq(),
                txn.state()
            ))
        );

        for (oid, rid) in txn.write_set_snapshot() {
            let table = self.table(oid)?;
            let link = self.version_link(rid);
            let Some(link) = link.filter(|l| l.prev_txn == txn.id()) else {
                debug_assert!(false, "write-set rid {rid} lacks an owned chain head");
                continue;
            };
            let Some(log) = txn.undo_log(link.prev_log_idx as usize) else {
                continue;
            };

            let (meta, tuple) = table.heap.get_tuple(rid)?;
            debug_assert_eq!(meta.ts(), txn.id());
            match version::reconstruct_tuple(&table.schema, &tuple, &meta, std::slice::from_ref(&log))? {
                Some(restored) => {
                    table.heap.update_tuple_in_place(
                        TupleMeta::new(log.ts, false),
                        &restored,
                        rid,
                        None,
                    )?;
                }
                None => {
                    // Prior version was absent (aborted insert) or a
                    // tombstone: restore the tombstone, keep the payload.
                    table.heap.update_tuple_meta(TupleMeta::new(log.ts, true), rid)?;
                }
            }
            self.set_version_link(rid, log.prev_version.is_valid().then_some(log.prev_version));
        }

        txn.clear_all_undo_logs();
        txn.set_state(TransactionState::Aborted);
        self.watermark.lock().remove_txn(txn.read_ts());
        debug!(txn = txn.seq(), "abort");
        Ok(())
    }

    /// Marks the transaction doomed after a detected write conflict. The
    /// client must still issue ABORT to roll back its writes.
    pub fn taint(&self, txn: &Transaction) {
        if txn.state() == TransactionState::Running {
            debug!(txn = txn.seq(), "taint");
            txn.set_state(TransactionState::Tainted);
        }
    }

    // ------------------------------------------------------------------
    // Version chains
    // ------------------------------------------------------------------

    pub fn version_link(&self, rid: Rid) -> Option<UndoLink> {
        self.version_links.lock().get(&rid).copied()
    }

    pub fn set_version_link(&self, rid: Rid, link: Option<UndoLink>) {
        let mut links = self.version_links.lock();
        match link {
            Some(link) => {
                links.insert(rid, link);
            }
            None => {
                links.remove(&rid);
            }
        }
    }

    /// Resolves one chain link to its undo entry, if the owner still holds
    /// it.
    pub fn undo_log(&self, link: UndoLink) -> Option<UndoLog> {
        let owner = self.get_txn(link.prev_txn)?;
        owner.undo_log(link.prev_log_idx as usize)
    }

    /// Walks the chain for `rid` until the version visible at the reader's
    /// snapshot. `Some(vec![])` means the base version itself is visible;
    /// `None` means no version is visible to this reader.
    pub fn collect_undo_logs(
        &self,
        rid: Rid,
        base_ts: Ts,
        txn: &Transaction,
    ) -> Option<Vec<UndoLog>> {
        if base_ts == txn.id() || (!is_pending(base_ts) && base_ts <= txn.read_ts()) {
            return Some(Vec::new());
        }
        let mut logs = Vec::new();
        let mut link = self.version_link(rid)?;
        loop {
            let log = self.undo_log(link)?;
            let visible = !is_pending(log.ts) && log.ts <= txn.read_ts();
            let prev = log.prev_version;
            logs.push(log);
            if visible {
                return Some(logs);
            }
            if !prev.is_valid() {
                return None;
            }
            link = prev;
        }
    }

    /// The executor-facing MVCC read: rewinds `(base_meta, base_tuple)` at
    /// `rid` to the version visible to `txn`, or `None` if the tuple is
    /// invisible at this snapshot.
    pub fn visible_tuple(
        &self,
        schema: &Schema,
        base_meta: &TupleMeta,
        base_tuple: &Tuple,
        rid: Rid,
        txn: &Transaction,
    ) -> Result<Option<Tuple>> {
        match self.collect_undo_logs(rid, base_meta.ts(), txn) {
            None => Ok(None),
            Some(logs) => {
                let mut out = version::reconstruct_tuple(schema, base_tuple, base_meta, &logs)?;
                if let Some(tuple) = out.as_mut() {
                    tuple.set_rid(rid);
                }
                Ok(out)
            }
        }
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// Reclaims version-chain entries invisible below the watermark, then
    /// sweeps finished transactions whose entries are all gone. Safe to run
    /// concurrently with normal traffic and idempotent.
    pub fn garbage_collect(&self) -> Result<()> {
        let w = self.watermark();
        debug!(watermark = w, "gc start");

        for table in self.catalog().tables() {
            let mut iter = table.heap.eager_iter();
            while let Some((meta, _tuple, rid)) = iter.next()? {
                let Some(head) = self.version_link(rid) else { continue };
                let base_ts = meta.ts();
                if !is_pending(base_ts) && base_ts <= w {
                    // The base version satisfies every live reader; the
                    // whole chain is unreachable.
                    self.set_version_link(rid, None);
                    self.clear_chain(head);
                    continue;
                }
                // Keep the chain down to its first entry visible at the
                // watermark; rewrite that entry's tail link, then drop the
                // rest.
                let mut cur = head;
                loop {
                    let Some(log) = self.undo_log(cur) else { break };
                    if !is_pending(log.ts) && log.ts <= w {
                        if log.prev_version.is_valid() {
                            let dropped = log.prev_version;
                            let mut kept = log;
                            kept.prev_version = UndoLink::INVALID;
                            if let Some(owner) = self.get_txn(cur.prev_txn) {
                                owner.modify_undo_log(cur.prev_log_idx as usize, kept);
                            }
                            self.clear_chain(dropped);
                        }
                        break;
                    }
                    if !log.prev_version.is_valid() {
                        break;
                    }
                    cur = log.prev_version;
                }
            }
        }

        let mut reclaimed = 0usize;
        self.txn_map.write().retain(|_, t| {
            let finished = matches!(
                t.state(),
                TransactionState::Committed | TransactionState::Aborted
            );
            let keep = !(finished && t.live_undo_count() == 0);
            if !keep {
                reclaimed += 1;
            }
            keep
        });
        debug!(watermark = w, reclaimed_txns = reclaimed, "gc done");
        Ok(())
    }

    fn clear_chain(&self, mut link: UndoLink) {
        while link.is_valid() {
            let Some(owner) = self.get_txn(link.prev_txn) else { break };
            let Some(log) = owner.undo_log(link.prev_log_idx as usize) else { break };
            owner.clear_undo_log(link.prev_log_idx as usize);
            link = log.prev_version;
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Renders every slot and version chain of a table (`\dbgmvcc`).
    pub fn dump_table(&self, table: &TableInfo) -> Result<String> {
        use std::fmt::Write;
        let mut out = String::new();
        writeln!(out, "table {} (oid {}) version chains:", table.name, table.oid).unwrap();
        let mut iter = table.heap.eager_iter();
        while let Some((meta, tuple, rid)) = iter.next()? {
            let row = tuple
                .values(&table.schema)
                .map(|vs| vs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))
                .unwrap_or_else(|_| "<undecodable>".into());
            writeln!(
                out,
                "  RID={rid} ts={} {}({row})",
                format_ts(meta.ts()),
                if meta.is_deleted() { "<del> " } else { "" }
            )
            .unwrap();
            let mut link = self.version_link(rid);
            while let Some(l) = link.filter(UndoLink::is_valid) {
                match self.undo_log(l) {
                    Some(log) => {
                        let cols: Vec<String> = log
                            .modified_fields
                            .iter()
                            .enumerate()
                            .filter_map(|(i, &m)| m.then(|| table.schema.column(i).name().to_string()))
                            .collect();
                        writeln!(
                            out,
                            "    txn{}@{} ts={} {}modified=[{}]",
                            txn_seq(l.prev_txn),
                            l.prev_log_idx,
                            log.ts,
                            if log.is_deleted { "<del> " } else { "" },
                            cols.join(",")
                        )
                        .unwrap();
                        link = Some(log.prev_version);
                    }
                    None => {
                        writeln!(out, "    txn{}@{} <reclaimed>", txn_seq(l.prev_txn), l.prev_log_idx)
                            .unwrap();
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    fn table(&self, oid: TableOid) -> Result<Arc<TableInfo>> {
        self.catalog()
            .table_by_oid(oid)
            .ok_or_else(|| DbError::Execution(format!("table oid {oid} vanished")).into())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BufferPoolManager, DiskManager};

    fn manager() -> Arc<TransactionManager> {
        let bpm = BufferPoolManager::new(16, DiskManager::in_memory());
        let config = Arc::new(crate::config::SessionConfig::new());
        let mgr = Arc::new(TransactionManager::new());
        let catalog = Arc::new(Catalog::new(bpm, config));
        mgr.wire_catalog(catalog);
        mgr
    }

    #[test]
    fn begin_snapshots_last_commit_ts() {
        let mgr = manager();
        let t0 = mgr.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(t0.read_ts(), 0);
        assert_eq!(t0.state(), TransactionState::Running);

        mgr.commit(&mgr.begin(IsolationLevel::SnapshotIsolation)).unwrap();
        let t1 = mgr.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(t1.read_ts(), 1);
    }

    #[test]
    fn commit_ts_is_a_total_order() {
        let mgr = manager();
        let a = mgr.begin(IsolationLevel::SnapshotIsolation);
        let b = mgr.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(mgr.commit(&a).unwrap(), 1);
        assert_eq!(mgr.commit(&b).unwrap(), 2);
        assert_eq!(mgr.last_commit_ts(), 2);
    }

    #[test]
    fn watermark_tracks_oldest_live_reader() {
        // Mirrors the timestamp-tracking scenario: an old reader pins the
        // watermark through later commits, then releases it on abort.
        let mgr = manager();
        let txn0 = mgr.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(mgr.watermark(), 0);

        for _ in 0..3 {
            mgr.commit(&mgr.begin(IsolationLevel::SnapshotIsolation)).unwrap();
        }
        assert_eq!(mgr.last_commit_ts(), 3);
        assert_eq!(mgr.watermark(), 0, "live txn0 pins the watermark");

        mgr.abort(&txn0).unwrap();
        assert_eq!(mgr.watermark(), 3);
    }

    #[test]
    fn tainted_transaction_cannot_commit() {
        let mgr = manager();
        let t = mgr.begin(IsolationLevel::SnapshotIsolation);
        mgr.taint(&t);
        assert_eq!(t.state(), TransactionState::Tainted);
        assert!(mgr.commit(&t).is_err());
        mgr.abort(&t).unwrap();
        assert_eq!(t.state(), TransactionState::Aborted);
    }

    #[test]
    fn write_conflict_rule() {
        let mgr = manager();
        mgr.commit(&mgr.begin(IsolationLevel::SnapshotIsolation)).unwrap(); // ts 1
        let t = mgr.begin(IsolationLevel::SnapshotIsolation); // read_ts 1
        let other = mgr.begin(IsolationLevel::SnapshotIsolation);

        // Committed at or before the snapshot: writable.
        assert!(!write_conflicts(1, &t));
        assert!(!write_conflicts(0, &t));
        // Committed after the snapshot: conflict.
        assert!(write_conflicts(2, &t));
        // Another live transaction's pending stamp: conflict; our own is not.
        assert!(write_conflicts(other.id(), &t));
        assert!(!write_conflicts(t.id(), &t));
    }

    #[test]
    fn gc_sweeps_finished_transactions() {
        let mgr = manager();
        let a = mgr.begin(IsolationLevel::SnapshotIsolation);
        mgr.commit(&a).unwrap();
        let b = mgr.begin(IsolationLevel::SnapshotIsolation);
        mgr.abort(&b).unwrap();
        assert!(mgr.get_txn(a.id()).is_some());

        mgr.garbage_collect().unwrap();
        assert!(mgr.get_txn(a.id()).is_none(), "empty committed txn is swept");
        assert!(mgr.get_txn(b.id()).is_none(), "aborted txn is swept");
    }
}
