//! # Transaction State
//!
//! Per-transaction context: identity, snapshot, write/read sets and the
//! append-only undo log that owns this transaction's version-chain entries.
//!
//! ## Timestamps
//!
//! A transaction id is a monotonically increasing sequence number with the
//! in-flight high bit ([`TXN_PENDING_BIT`]) set. Slot metadata stamped with
//! such an id marks an uncommitted version; commit replaces the stamp with
//! the assigned commit timestamp (bit clear). `read_ts` is the last committed
//! commit timestamp at begin and never changes.
//!
//! ## Undo Log Ownership
//!
//! Each transaction exclusively owns its undo entries. Version chains in the
//! transaction manager refer to them by `(txn_id, log_index)`; the slots are
//! `Option<UndoLog>` so garbage collection can clear individual entries
//! without shifting the indices live links rely on.
//!
//! ## States
//!
//! ```text
//! ┌─────────┐  commit()   ┌───────────┐
//! │ RUNNING │ ──────────> │ COMMITTED │
//! └─────────┘             └───────────┘
//!    │    │ abort()       ┌─────────┐
//!    │    └─────────────> │ ABORTED │ <── abort() ──┐
//!    │ taint()            └─────────┘               │
//!    ▼                                              │
//! ┌─────────┐  (write conflict detected; terminal   │
//! │ TAINTED │   until the client issues ABORT) ─────┘
//! └─────────┘
//! ```

use crate::catalog::TableOid;
use crate::config::{INVALID_TS, TXN_PENDING_BIT};
use crate::storage::{Rid, Tuple};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Timestamp domain: either a commit timestamp or (with the pending bit) an
/// in-flight transaction id.
pub type Ts = u64;

/// True if `ts` is an in-flight transaction id rather than a commit stamp.
pub fn is_pending(ts: Ts) -> bool {
    ts & TXN_PENDING_BIT != 0
}

/// The human-readable sequence number of a transaction id.
pub fn txn_seq(ts: Ts) -> u64 {
    ts & !TXN_PENDING_BIT
}

/// Renders a timestamp for diagnostics: `txn7` for pending ids, the plain
/// number for commit stamps.
pub fn format_ts(ts: Ts) -> String {
    if ts == INVALID_TS {
        "∅".to_string()
    } else if is_pending(ts) {
        format!("txn{}", txn_seq(ts))
    } else {
        ts.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    SnapshotIsolation,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    Tainted,
    Committed,
    Aborted,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionState::Running => "RUNNING",
            TransactionState::Tainted => "TAINTED",
            TransactionState::Committed => "COMMITTED",
            TransactionState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Reference to one undo entry: the owning transaction plus the index into
/// its log. `prev_txn == 0` is the chain terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoLink {
    pub prev_txn: Ts,
    pub prev_log_idx: u32,
}

impl UndoLink {
    pub const INVALID: UndoLink = UndoLink { prev_txn: 0, prev_log_idx: 0 };

    pub fn new(prev_txn: Ts, prev_log_idx: u32) -> Self {
        Self { prev_txn, prev_log_idx }
    }

    pub fn is_valid(&self) -> bool {
        self.prev_txn != 0
    }
}

/// One version-chain entry: a partial-column patch that rewinds a tuple to
/// the version committed at `ts`.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoLog {
    /// The prior version was a tombstone (or, for inserts, absent).
    pub is_deleted: bool,
    /// One flag per table column; `tuple` carries exactly the flagged ones.
    pub modified_fields: Vec<bool>,
    /// Packed values of the modified columns under the projected schema.
    pub tuple: Tuple,
    /// Commit timestamp of the version this entry restores.
    pub ts: Ts,
    /// Next-older entry in the chain.
    pub prev_version: UndoLink,
}

pub struct Transaction {
    id: Ts,
    read_ts: Ts,
    isolation: IsolationLevel,
    commit_ts: AtomicU64,
    state: Mutex<TransactionState>,
    undo_logs: Mutex<Vec<Option<UndoLog>>>,
    write_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,
    read_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub(crate) fn new(id: Ts, read_ts: Ts, isolation: IsolationLevel) -> Self {
        debug_assert!(is_pending(id));
        Self {
            id,
            read_ts,
            isolation,
            commit_ts: AtomicU64::new(INVALID_TS),
            state: Mutex::new(TransactionState::Running),
            undo_logs: Mutex::new(Vec::new()),
            write_set: Mutex::new(HashMap::new()),
            read_set: Mutex::new(HashSet::new()),
        }
    }

    /// The in-flight id (pending bit set); this is the stamp written into
    /// slot metadata while the transaction runs.
    pub fn id(&self) -> Ts {
        self.id
    }

    /// The human-readable sequence number.
    pub fn seq(&self) -> u64 {
        txn_seq(self.id)
    }

    pub fn read_ts(&self) -> Ts {
        self.read_ts
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn commit_ts(&self) -> Option<Ts> {
        let ts = self.commit_ts.load(Ordering::Acquire);
        (ts != INVALID_TS).then_some(ts)
    }

    pub(crate) fn set_commit_ts(&self, ts: Ts) {
        self.commit_ts.store(ts, Ordering::Release);
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    // ------------------------------------------------------------------
    // Undo log
    // ------------------------------------------------------------------

    /// Appends an undo entry, returning the link other chains use to reach
    /// it.
    pub fn append_undo_log(&self, log: UndoLog) -> UndoLink {
        let mut logs = self.undo_logs.lock();
        let idx = logs.len() as u32;
        logs.push(Some(log));
        UndoLink::new(self.id, idx)
    }

    /// Rewrites an existing entry in place (merging repeated self-updates,
    /// or truncating a chain during GC).
    pub fn modify_undo_log(&self, idx: usize, log: UndoLog) {
        let mut logs = self.undo_logs.lock();
        debug_assert!(idx < logs.len());
        if let Some(slot) = logs.get_mut(idx) {
            *slot = Some(log);
        }
    }

    /// A copy of entry `idx`, or `None` if it was reclaimed.
    pub fn undo_log(&self, idx: usize) -> Option<UndoLog> {
        self.undo_logs.lock().get(idx).and_then(|slot| slot.clone())
    }

    /// Clears entry `idx` (garbage collection). Indices of other entries are
    /// unaffected.
    pub fn clear_undo_log(&self, idx: usize) {
        if let Some(slot) = self.undo_logs.lock().get_mut(idx) {
            *slot = None;
        }
    }

    pub(crate) fn clear_all_undo_logs(&self) {
        for slot in self.undo_logs.lock().iter_mut() {
            *slot = None;
        }
    }

    /// Total entries ever appended (cleared slots included).
    pub fn undo_log_count(&self) -> usize {
        self.undo_logs.lock().len()
    }

    /// Entries still holding data.
    pub fn live_undo_count(&self) -> usize {
        self.undo_logs.lock().iter().filter(|slot| slot.is_some()).count()
    }

    // ------------------------------------------------------------------
    // Write / read sets
    // ------------------------------------------------------------------

    pub fn record_write(&self, oid: TableOid, rid: Rid) {
        self.write_set.lock().entry(oid).or_default().insert(rid);
    }

    /// Flattened copy of the write set.
    pub fn write_set_snapshot(&self) -> Vec<(TableOid, Rid)> {
        let set = self.write_set.lock();
        set.iter()
            .flat_map(|(&oid, rids)| rids.iter().map(move |&rid| (oid, rid)))
            .collect()
    }

    /// True if this transaction wrote `rid`.
    pub fn wrote(&self, rid: Rid) -> bool {
        self.write_set.lock().values().any(|rids| rids.contains(&rid))
    }

    /// Records an observed RID for serializable validation. Snapshot-isolation
    /// transactions skip the bookkeeping.
    pub fn record_read(&self, rid: Rid) {
        if self.isolation == IsolationLevel::Serializable {
            self.read_set.lock().insert(rid);
        }
    }

    pub fn read_set_snapshot(&self) -> Vec<Rid> {
        self.read_set.lock().iter().copied().collect()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &format_ts(self.id))
            .field("read_ts", &self.read_ts)
            .field("state", &self.state())
            .field("isolation", &self.isolation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(seq: u64) -> Transaction {
        Transaction::new(TXN_PENDING_BIT | seq, 0, IsolationLevel::SnapshotIsolation)
    }

    #[test]
    fn pending_bit_round_trips() {
        let id = TXN_PENDING_BIT | 42;
        assert!(is_pending(id));
        assert_eq!(txn_seq(id), 42);
        assert!(!is_pending(7));
        assert_eq!(format_ts(id), "txn42");
        assert_eq!(format_ts(7), "7");
    }

    #[test]
    fn undo_links_stay_stable_after_clear() {
        let t = txn(1);
        let log = UndoLog {
            is_deleted: false,
            modified_fields: vec![true],
            tuple: Tuple::empty(),
            ts: 3,
            prev_version: UndoLink::INVALID,
        };
        let a = t.append_undo_log(log.clone());
        let b = t.append_undo_log(log.clone());
        assert_eq!(a.prev_log_idx, 0);
        assert_eq!(b.prev_log_idx, 1);

        t.clear_undo_log(0);
        assert!(t.undo_log(0).is_none());
        assert!(t.undo_log(1).is_some());
        assert_eq!(t.undo_log_count(), 2);
        assert_eq!(t.live_undo_count(), 1);
    }

    #[test]
    fn write_set_deduplicates_rids() {
        let t = txn(1);
        let rid = Rid::new(1, 2);
        t.record_write(9, rid);
        t.record_write(9, rid);
        assert_eq!(t.write_set_snapshot().len(), 1);
        assert!(t.wrote(rid));
        assert!(!t.wrote(Rid::new(1, 3)));
    }

    #[test]
    fn read_set_only_tracked_under_serializable() {
        let si = txn(1);
        si.record_read(Rid::new(0, 0));
        assert!(si.read_set_snapshot().is_empty());

        let ser = Transaction::new(TXN_PENDING_BIT | 2, 0, IsolationLevel::Serializable);
        ser.record_read(Rid::new(0, 0));
        assert_eq!(ser.read_set_snapshot().len(), 1);
    }

    #[test]
    fn state_transitions() {
        let t = txn(1);
        assert_eq!(t.state(), TransactionState::Running);
        t.set_state(TransactionState::Tainted);
        assert_eq!(t.state(), TransactionState::Tainted);
        t.set_state(TransactionState::Aborted);
        assert_eq!(t.state(), TransactionState::Aborted);
    }
}
