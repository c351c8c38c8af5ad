//! # Watermark Tracking
//!
//! The watermark is the oldest snapshot any live reader might still need: the
//! minimum read timestamp across active transactions, or the latest commit
//! timestamp when nobody is reading. Everything strictly below it is
//! unreachable and therefore reclaimable by garbage collection.
//!
//! Read timestamps repeat (every transaction begun between two commits shares
//! one), so the live set is a counted multiset over a `BTreeMap`; add,
//! remove and min are all O(log n).

use super::transaction::Ts;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct Watermark {
    commit_ts: Ts,
    /// Multiset of live read timestamps: value is the number of live
    /// transactions sharing that snapshot.
    current_reads: BTreeMap<Ts, u32>,
}

impl Watermark {
    pub fn new(commit_ts: Ts) -> Self {
        Self { commit_ts, current_reads: BTreeMap::new() }
    }

    pub fn add_txn(&mut self, read_ts: Ts) {
        *self.current_reads.entry(read_ts).or_insert(0) += 1;
    }

    pub fn remove_txn(&mut self, read_ts: Ts) {
        match self.current_reads.get_mut(&read_ts) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.current_reads.remove(&read_ts);
            }
            None => debug_assert!(false, "removing unregistered read_ts {read_ts}"),
        }
    }

    pub fn update_commit_ts(&mut self, commit_ts: Ts) {
        debug_assert!(commit_ts >= self.commit_ts);
        self.commit_ts = commit_ts;
    }

    /// Oldest live snapshot, or the commit counter when no reader is live.
    pub fn watermark(&self) -> Ts {
        self.current_reads
            .keys()
            .next()
            .copied()
            .unwrap_or(self.commit_ts)
    }
}
