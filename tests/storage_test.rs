//! Storage integration: a file-backed instance pushing the working set well
//! past the buffer pool, and heap round-trips through the full SQL path.

use quiverdb::types::Value;
use quiverdb::{Database, Session};

fn auto(db: &Database, sql: &str) -> quiverdb::ExecuteResult {
    db.execute(sql, &mut Session::default()).unwrap_or_else(|e| panic!("{sql}: {e}"))
}

#[test]
fn working_set_larger_than_the_buffer_pool() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("big.qdb")).unwrap();
    auto(&db, "CREATE TABLE t(id INTEGER, pad VARCHAR(64))");

    // 64 frames x 4 KiB is 256 KiB of pool; 8000 rows of ~70 bytes need far
    // more pages than that, forcing eviction and read-back.
    for chunk in 0..80 {
        let mut batch = Vec::new();
        for i in 0..100 {
            let id = chunk * 100 + i;
            batch.push(format!("({id}, 'row-{id}-padding-padding-padding-padding')"));
        }
        auto(&db, &format!("INSERT INTO t VALUES {}", batch.join(", ")));
    }

    let count = auto(&db, "SELECT count(*) FROM t");
    assert_eq!(count.rows, vec![vec![Value::BigInt(8000)]]);

    let probe = auto(&db, "SELECT pad FROM t WHERE id = 7321");
    assert_eq!(
        probe.rows,
        vec![vec![Value::Varchar(
            "row-7321-padding-padding-padding-padding".into()
        )]]
    );
}

#[test]
fn wal_file_receives_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logged.qdb");
    {
        let db = Database::open(&path).unwrap();
        auto(&db, "CREATE TABLE t(a INTEGER)");
        auto(&db, "INSERT INTO t VALUES (1), (2)");
        // Drop flushes the log.
    }
    let wal = path.with_extension("wal");
    assert!(std::fs::metadata(&wal).unwrap().len() > 0);
}

#[test]
fn varchar_and_timestamp_round_trip() {
    let db = Database::in_memory().unwrap();
    auto(&db, "CREATE TABLE t(s VARCHAR(32), ts TIMESTAMP, d DECIMAL, ok BOOLEAN)");
    auto(&db, "INSERT INTO t VALUES ('it''s fine', 1700000000, 2.5, true)");
    auto(&db, "INSERT INTO t VALUES (NULL, NULL, NULL, NULL)");

    let out = auto(&db, "SELECT s, ts, d, ok FROM t");
    assert_eq!(
        out.rows[0],
        vec![
            Value::Varchar("it's fine".into()),
            Value::Timestamp(1_700_000_000),
            Value::Decimal(2.5),
            Value::Boolean(true),
        ]
    );
    assert!(out.rows[1].iter().all(Value::is_null));
}
