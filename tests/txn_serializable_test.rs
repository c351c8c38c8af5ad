//! Serializable-mode commit validation: two transactions flipping disjoint
//! row sets that read each other's writes must not both commit.

use quiverdb::txn::TransactionState;
use quiverdb::types::Value;
use quiverdb::{Database, Session};

fn auto(db: &Database, sql: &str) {
    db.execute(sql, &mut Session::default()).unwrap_or_else(|e| panic!("{sql}: {e}"));
}

#[test]
fn write_skew_is_rejected_at_commit() {
    let db = Database::in_memory().unwrap();
    auto(&db, "CREATE TABLE t(a INTEGER, b INTEGER PRIMARY KEY)");
    auto(&db, "INSERT INTO t VALUES (1, 100), (1, 101), (0, 102), (0, 103)");

    let txn2 = db.begin(true);
    let txn3 = db.begin(true);
    let mut sess2 = Session { txn: Some(std::sync::Arc::clone(&txn2)) };
    let mut sess3 = Session { txn: Some(std::sync::Arc::clone(&txn3)) };

    db.execute("UPDATE t SET a = 0 WHERE a = 1", &mut sess2).unwrap();
    db.execute("UPDATE t SET a = 1 WHERE a = 0", &mut sess3).unwrap();

    // First committer wins.
    db.commit(&txn2).unwrap();

    // The second read rows the first wrote after its snapshot: rejected.
    let err = db.commit(&txn3).unwrap_err();
    assert!(err.to_string().contains("serializable"), "unexpected error: {err}");
    assert_eq!(txn3.state(), TransactionState::Tainted);
    db.abort(&txn3).unwrap();

    // Only txn2's flip took effect.
    let result = db.execute("SELECT a, b FROM t", &mut Session::default()).unwrap();
    let a_values: Vec<&Value> = result.rows.iter().map(|r| &r[0]).collect();
    assert_eq!(
        a_values,
        vec![&Value::Integer(0), &Value::Integer(0), &Value::Integer(0), &Value::Integer(0)]
    );
}

#[test]
fn read_only_serializable_transactions_commit_freely() {
    let db = Database::in_memory().unwrap();
    auto(&db, "CREATE TABLE t(a INTEGER)");
    auto(&db, "INSERT INTO t VALUES (1)");

    let reader = db.begin(true);
    let mut sess = Session { txn: Some(std::sync::Arc::clone(&reader)) };
    db.execute("SELECT a FROM t", &mut sess).unwrap();

    // A concurrent snapshot-isolation writer commits after the reader's
    // snapshot.
    auto(&db, "UPDATE t SET a = 2");

    // Backward validation only rejects read-write overlap when the reader
    // also wrote; a pure reader commits.
    db.commit(&reader).unwrap();
}

#[test]
fn disjoint_serializable_writers_both_commit() {
    let db = Database::in_memory().unwrap();
    auto(&db, "CREATE TABLE a_side(x INTEGER)");
    auto(&db, "CREATE TABLE b_side(x INTEGER)");
    auto(&db, "INSERT INTO a_side VALUES (1)");
    auto(&db, "INSERT INTO b_side VALUES (1)");

    let txn_a = db.begin(true);
    let txn_b = db.begin(true);
    let mut sess_a = Session { txn: Some(std::sync::Arc::clone(&txn_a)) };
    let mut sess_b = Session { txn: Some(std::sync::Arc::clone(&txn_b)) };

    db.execute("UPDATE a_side SET x = 2", &mut sess_a).unwrap();
    db.execute("UPDATE b_side SET x = 2", &mut sess_b).unwrap();

    db.commit(&txn_a).unwrap();
    db.commit(&txn_b).unwrap();
}
