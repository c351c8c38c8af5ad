//! Garbage collection: chains survive for live readers, reclamation follows
//! the watermark, and finished transactions leave the transaction map.

use quiverdb::types::Value;
use quiverdb::{Database, Session};

fn auto(db: &Database, sql: &str) -> quiverdb::ExecuteResult {
    db.execute(sql, &mut Session::default()).unwrap_or_else(|e| panic!("{sql}: {e}"))
}

fn ints(result: &quiverdb::ExecuteResult) -> Vec<i32> {
    result
        .rows
        .iter()
        .map(|r| match r[0] {
            Value::Integer(v) => v,
            _ => unreachable!(),
        })
        .collect()
}

#[test]
fn live_reader_survives_gc_of_newer_versions() {
    let db = Database::in_memory().unwrap();
    auto(&db, "CREATE TABLE t(a INTEGER)");
    auto(&db, "INSERT INTO t VALUES (1)");

    // A reader pinned at the version a=1.
    let reader = db.begin(false);
    let mut reader_sess = Session { txn: Some(std::sync::Arc::clone(&reader)) };

    // Three newer committed versions stack up behind the slot.
    auto(&db, "UPDATE t SET a = 2");
    auto(&db, "UPDATE t SET a = 3");
    auto(&db, "UPDATE t SET a = 4");

    db.garbage_collect().unwrap();

    // GC must have kept the chain down to the reader's version.
    let got = db.execute("SELECT a FROM t", &mut reader_sess).unwrap();
    assert_eq!(ints(&got), vec![1]);

    // A fresh snapshot sees the newest version.
    assert_eq!(ints(&auto(&db, "SELECT a FROM t")), vec![4]);

    db.abort(&reader).unwrap();
}

#[test]
fn gc_reclaims_once_readers_are_gone() {
    let db = Database::in_memory().unwrap();
    auto(&db, "CREATE TABLE t(a INTEGER)");
    auto(&db, "INSERT INTO t VALUES (1)");
    auto(&db, "UPDATE t SET a = 2");
    auto(&db, "UPDATE t SET a = 3");

    let writer_seqs: Vec<u64> = db
        .txn_manager()
        .active_txns()
        .iter()
        .map(|t| t.seq())
        .collect();
    assert!(writer_seqs.is_empty(), "auto-commit leaves no active txns");

    // No live readers: everything behind the newest committed version is
    // reclaimable, and the finished writers with it.
    db.garbage_collect().unwrap();

    // The update history is gone from the transaction map (seq 1..=3 were
    // the auto-commit writers).
    for seq in 1..=3 {
        assert!(
            db.txn_manager().get_txn_by_seq(seq).is_none(),
            "txn{seq} should have been swept"
        );
    }
    assert_eq!(ints(&auto(&db, "SELECT a FROM t")), vec![3]);
}

#[test]
fn gc_is_idempotent_under_repeat_runs() {
    let db = Database::in_memory().unwrap();
    auto(&db, "CREATE TABLE t(a INTEGER)");
    auto(&db, "INSERT INTO t VALUES (1), (2), (3)");
    auto(&db, "UPDATE t SET a = a + 10");
    auto(&db, "DELETE FROM t WHERE a = 12");

    for _ in 0..3 {
        db.garbage_collect().unwrap();
    }
    assert_eq!(ints(&auto(&db, "SELECT a FROM t ORDER BY a")), vec![11, 13]);
}

#[test]
fn watermark_gates_reclamation() {
    let db = Database::in_memory().unwrap();
    auto(&db, "CREATE TABLE t(a INTEGER)");
    auto(&db, "INSERT INTO t VALUES (1)");

    let reader = db.begin(false);
    auto(&db, "UPDATE t SET a = 2");

    // The reader holds the watermark below the update's commit.
    let before = db.txn_manager().watermark();
    db.garbage_collect().unwrap();

    // The old version is still reconstructible.
    let mut sess = Session { txn: Some(std::sync::Arc::clone(&reader)) };
    assert_eq!(ints(&db.execute("SELECT a FROM t", &mut sess).unwrap()), vec![1]);

    db.abort(&reader).unwrap();
    assert!(db.txn_manager().watermark() > before);
    db.garbage_collect().unwrap();
    assert_eq!(ints(&auto(&db, "SELECT a FROM t")), vec![2]);
}
