//! Vector search end-to-end: HNSW recall against brute force, IVFFlat
//! probing, operator classes and the distance memoization cache.

use quiverdb::types::Value;
use quiverdb::{Database, Session};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn db() -> Database {
    Database::in_memory().unwrap()
}

fn auto(db: &Database, sql: &str) -> quiverdb::ExecuteResult {
    db.execute(sql, &mut Session::default()).unwrap_or_else(|e| panic!("{sql}: {e}"))
}

fn vector_sql(v: &[f64]) -> String {
    let body: Vec<String> = v.iter().map(|x| format!("{x}")).collect();
    format!("[{}]", body.join(", "))
}

fn seed_vectors(db: &Database, n: usize, dim: usize) -> Vec<Vec<f64>> {
    auto(db, &format!("CREATE TABLE items(id INTEGER, v VECTOR({dim}))"));
    let mut rng = SmallRng::seed_from_u64(0xF00D);
    let mut vectors = Vec::with_capacity(n);
    let mut batch = Vec::new();
    for id in 0..n {
        let v: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        batch.push(format!("({id}, {})", vector_sql(&v)));
        vectors.push(v);
        if batch.len() == 100 {
            auto(db, &format!("INSERT INTO items VALUES {}", batch.join(", ")));
            batch.clear();
        }
    }
    if !batch.is_empty() {
        auto(db, &format!("INSERT INTO items VALUES {}", batch.join(", ")));
    }
    vectors
}

fn l2(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

fn ids(result: &quiverdb::ExecuteResult) -> Vec<i32> {
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
fn hnsw_top_k_ranks_within_exact_top_20() {
    let db = db();
    let vectors = seed_vectors(&db, 1000, 8);
    auto(&db, "CREATE INDEX items_v ON items USING hnsw (v vector_l2_ops) WITH (m = 16, ef_construction = 100)");

    let query: Vec<f64> = vec![0.1, -0.2, 0.3, 0.0, 0.5, -0.4, 0.2, -0.1];
    let sql = format!(
        "SELECT id FROM items ORDER BY v <-> {} LIMIT 10",
        vector_sql(&query)
    );

    let plan = auto(&db, &format!("EXPLAIN {sql}")).message.unwrap();
    assert!(plan.contains("VectorIndexScan"), "plan was:\n{plan}");

    let got = ids(&auto(&db, &sql));
    assert_eq!(got.len(), 10);

    let mut exact: Vec<(f64, i32)> = vectors
        .iter()
        .enumerate()
        .map(|(id, v)| (l2(&query, v), id as i32))
        .collect();
    exact.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    let top20: std::collections::HashSet<i32> = exact.iter().take(20).map(|(_, id)| *id).collect();

    for id in &got {
        assert!(top20.contains(id), "id {id} not in the exact top-20");
    }
}

#[test]
fn hnsw_results_reflect_mvcc_deletes() {
    let db = db();
    let vectors = seed_vectors(&db, 200, 4);
    auto(&db, "CREATE INDEX items_v ON items USING hnsw (v vector_l2_ops)");

    let probe = vector_sql(&vectors[17]);
    let sql = format!("SELECT id FROM items ORDER BY v <-> {probe} LIMIT 1");
    assert_eq!(ids(&auto(&db, &sql)), vec![17]);

    auto(&db, "DELETE FROM items WHERE id = 17");
    let got = ids(&auto(&db, &sql));
    assert_ne!(got, vec![17], "deleted row must not surface through the index");
}

#[test]
fn ivfflat_probes_nearest_lists() {
    let db = db();
    auto(&db, "CREATE TABLE spots(id INTEGER, v VECTOR(2))");
    // Four tight clusters far apart.
    let mut id = 0;
    for (cx, cy) in [(10.0, 10.0), (-10.0, 10.0), (10.0, -10.0), (-10.0, -10.0)] {
        let mut batch = Vec::new();
        for k in 0..25 {
            let offset = (k as f64) * 0.01;
            batch.push(format!("({id}, [{}, {}])", cx + offset, cy - offset));
            id += 1;
        }
        auto(&db, &format!("INSERT INTO spots VALUES {}", batch.join(", ")));
    }
    auto(&db, "CREATE INDEX spots_v ON spots USING ivfflat (v vector_l2_ops) WITH (lists = 4, probe_lists = 1)");

    let got = ids(&auto(&db, "SELECT id FROM spots ORDER BY v <-> [10.0, 10.0] LIMIT 10"));
    assert_eq!(got.len(), 10);
    for id in got {
        assert!((0..25).contains(&id), "id {id} is not from the probed cluster");
    }
}

#[test]
fn operator_classes_select_the_metric() {
    let db = db();
    auto(&db, "CREATE TABLE m(id INTEGER, v VECTOR(2))");
    auto(&db, "INSERT INTO m VALUES (1, [1.0, 0.0]), (2, [10.0, 0.0]), (3, [0.0, 1.0])");
    auto(&db, "CREATE INDEX m_ip ON m USING hnsw (v vector_ip_ops)");

    // Inner product favors the largest dot product, not the closest point.
    let got = ids(&auto(&db, "SELECT id FROM m ORDER BY v <#> [1.0, 0.0] LIMIT 1"));
    assert_eq!(got, vec![2]);

    // The L2 operator has no matching index; the fallback sort agrees on
    // plain geometry.
    let got = ids(&auto(&db, "SELECT id FROM m ORDER BY v <-> [1.0, 0.0] LIMIT 1"));
    assert_eq!(got, vec![1]);
}

#[test]
fn cosine_index_and_operator() {
    let db = db();
    auto(&db, "CREATE TABLE c(id INTEGER, v VECTOR(2))");
    auto(&db, "INSERT INTO c VALUES (1, [5.0, 0.1]), (2, [0.0, 3.0])");
    auto(&db, "CREATE INDEX c_cos ON c USING hnsw (v vector_cosine_ops)");
    let got = ids(&auto(&db, "SELECT id FROM c ORDER BY v <=> [1.0, 0.0] LIMIT 1"));
    assert_eq!(got, vec![1]);
}

#[test]
fn distance_cache_fills_when_enabled() {
    let db = db();
    seed_vectors(&db, 50, 4);
    auto(&db, "CREATE INDEX items_v ON items USING hnsw (v vector_l2_ops)");

    assert!(db.catalog().distance_cache().is_empty());
    auto(&db, "SET cache_enabled = on");
    auto(&db, "SELECT id FROM items ORDER BY v <-> [0.0, 0.0, 0.0, 0.0] LIMIT 5");
    assert!(!db.catalog().distance_cache().is_empty());
}

#[test]
fn fallback_sort_matches_index_for_exact_neighbors() {
    let db = db();
    let vectors = seed_vectors(&db, 300, 4);
    let probe = vector_sql(&vectors[42]);

    // Without any index: exact sort.
    let exact_sql = format!("SELECT id FROM items ORDER BY v <-> {probe} LIMIT 1");
    assert_eq!(ids(&auto(&db, &exact_sql)), vec![42]);

    // With the index: the same nearest neighbor.
    auto(&db, "CREATE INDEX items_v ON items USING hnsw (v vector_l2_ops)");
    assert_eq!(ids(&auto(&db, &exact_sql)), vec![42]);
}
