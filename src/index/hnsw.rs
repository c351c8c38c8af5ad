//! # HNSW Vector Index
//!
//! Hierarchical Navigable Small World graph for approximate nearest-neighbor
//! search: logarithmic search cost with high recall.
//!
//! ```text
//! Level 2:     [A]-------------[B]           (few nodes, long edges)
//!               |               |
//! Level 1:     [A]----[C]------[B]----[D]
//!               |      |        |      |
//! Level 0:     [A]-[E]-[C]-[F]-[B]-[G]-[D]   (all nodes)
//! ```
//!
//! ## Construction
//!
//! Points insert one at a time. Each draws a maximum level from a geometric
//! distribution (`level = floor(-ln(uniform) * 1/ln(m))`), greedily descends
//! from the entry point through the layers above it, then runs a best-first
//! expansion with a bounded candidate set (`ef_construction`) at each layer
//! at and below it. Neighbors are selected with the diversity heuristic: a
//! candidate is kept only if it is closer to the query than to every
//! already-kept neighbor, which prunes dominated edges and keeps the graph
//! navigable. Over-full neighbor lists re-prune with the same heuristic.
//!
//! ## Search
//!
//! Greedy descent to level 1, then a beam search at level 0 with width
//! `max(ef_search, k)`. Two heaps drive the beam: a min-heap of unexplored
//! candidates and a max-heap of the best `ef` results whose worst member
//! bounds further exploration.
//!
//! ## MVCC Integration
//!
//! Deletes tombstone the node. Tombstoned nodes keep their edges and still
//! serve as traversal stepping stones; they are filtered from results, and
//! executors re-validate the surviving RIDs against MVCC visibility anyway.

use super::distance::DistanceComputer;
use super::{DistanceKind, VectorIndex};
use crate::config::{HNSW_DEFAULT_EF_CONSTRUCTION, HNSW_DEFAULT_EF_SEARCH, HNSW_DEFAULT_M};
use crate::storage::Rid;
use hashbrown::HashMap;
use parking_lot::RwLock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswOptions {
    /// Maximum neighbors per node above level 0 (level 0 allows 2m).
    pub m: usize,
    /// Beam width while inserting.
    pub ef_construction: usize,
    /// Beam width while querying.
    pub ef_search: usize,
}

impl Default for HnswOptions {
    fn default() -> Self {
        Self {
            m: HNSW_DEFAULT_M,
            ef_construction: HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: HNSW_DEFAULT_EF_SEARCH,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    node: u32,
    distance: f64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// Reversed: `BinaryHeap<Candidate>` pops the closest first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone, Copy)]
struct FarCandidate(Candidate);

impl PartialEq for FarCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.0.distance == other.0.distance
    }
}

impl Eq for FarCandidate {}

impl PartialOrd for FarCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FarCandidate {
    /// Natural: `BinaryHeap<FarCandidate>` pops the furthest first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .distance
            .partial_cmp(&other.0.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Generation-stamped visited set: clearing is O(1) until the counter wraps.
struct VisitedSet {
    generation: u64,
    stamps: Vec<u64>,
}

impl VisitedSet {
    fn new(capacity: usize) -> Self {
        Self { generation: 1, stamps: vec![0; capacity] }
    }

    fn clear(&mut self) {
        self.generation += 1;
        if self.generation == 0 {
            self.stamps.fill(0);
            self.generation = 1;
        }
    }

    fn insert(&mut self, index: usize) -> bool {
        if index >= self.stamps.len() {
            self.stamps.resize((index + 1).next_power_of_two(), 0);
        }
        if self.stamps[index] == self.generation {
            false
        } else {
            self.stamps[index] = self.generation;
            true
        }
    }
}

struct HnswNode {
    vector: Vec<f64>,
    rid: Rid,
    deleted: bool,
    /// One adjacency list per level, 0..=node_level.
    neighbors: Vec<Vec<u32>>,
}

struct Graph {
    nodes: Vec<HnswNode>,
    by_rid: HashMap<Rid, u32>,
    entry: Option<u32>,
    max_level: u8,
    rng: SmallRng,
    visited: VisitedSet,
}

pub struct HnswIndex {
    options: HnswOptions,
    dist: DistanceComputer,
    graph: RwLock<Graph>,
}

/// Geometric level draw; capped so adjacency vectors stay small.
fn select_level(uniform: f64, ml: f64) -> u8 {
    let level = (-uniform.ln() * ml).floor();
    (level as u8).min(15)
}

fn level_multiplier(m: usize) -> f64 {
    1.0 / (m as f64).ln()
}

impl HnswIndex {
    pub fn new(options: HnswOptions, dist: DistanceComputer) -> Self {
        Self {
            options,
            dist,
            graph: RwLock::new(Graph {
                nodes: Vec::new(),
                by_rid: HashMap::new(),
                entry: None,
                max_level: 0,
                rng: SmallRng::seed_from_u64(0x5eed_9d1f),
                visited: VisitedSet::new(1024),
            }),
        }
    }

    pub fn options(&self) -> HnswOptions {
        self.options
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.dist.distance(a, b)
    }

    /// One greedy step chain at `level`: moves to the closest neighbor until
    /// no neighbor improves.
    fn greedy_at_level(&self, graph: &Graph, query: &[f64], mut ep: u32, level: usize) -> u32 {
        let mut best = self.distance(query, &graph.nodes[ep as usize].vector);
        loop {
            let mut improved = false;
            let neighbors = match graph.nodes[ep as usize].neighbors.get(level) {
                Some(n) => n,
                None => return ep,
            };
            for &n in neighbors {
                let d = self.distance(query, &graph.nodes[n as usize].vector);
                if d < best {
                    best = d;
                    ep = n;
                    improved = true;
                }
            }
            if !improved {
                return ep;
            }
        }
    }

    /// Best-first expansion with a bounded candidate set; returns up to `ef`
    /// nearest nodes at `level`, ascending by distance.
    fn search_layer(
        &self,
        graph: &mut Graph,
        query: &[f64],
        ep: u32,
        ef: usize,
        level: usize,
    ) -> Vec<Candidate> {
        graph.visited.clear();
        let mut candidates = BinaryHeap::with_capacity(ef * 2);
        let mut results: BinaryHeap<FarCandidate> = BinaryHeap::with_capacity(ef + 1);

        let d0 = self.distance(query, &graph.nodes[ep as usize].vector);
        candidates.push(Candidate { node: ep, distance: d0 });
        results.push(FarCandidate(Candidate { node: ep, distance: d0 }));
        graph.visited.insert(ep as usize);

        while let Some(current) = candidates.pop() {
            let worst = results.peek().map(|c| c.0.distance).unwrap_or(f64::INFINITY);
            if current.distance > worst && results.len() >= ef {
                break;
            }
            let neighbors = match graph.nodes[current.node as usize].neighbors.get(level) {
                Some(n) => n.clone(),
                None => continue,
            };
            for n in neighbors {
                if !graph.visited.insert(n as usize) {
                    continue;
                }
                let d = self.distance(query, &graph.nodes[n as usize].vector);
                let worst = results.peek().map(|c| c.0.distance).unwrap_or(f64::INFINITY);
                if results.len() < ef || d < worst {
                    candidates.push(Candidate { node: n, distance: d });
                    results.push(FarCandidate(Candidate { node: n, distance: d }));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|c| c.0).collect();
        out.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        out
    }

    /// Diversity heuristic: keep a candidate only if it is closer to the
    /// query than to every neighbor already kept.
    fn select_neighbors(&self, graph: &Graph, candidates: &[Candidate], m: usize) -> Vec<u32> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        for &c in candidates {
            if selected.len() >= m {
                break;
            }
            let dominated = selected.iter().any(|s| {
                let d = self.distance(
                    &graph.nodes[c.node as usize].vector,
                    &graph.nodes[s.node as usize].vector,
                );
                d < c.distance
            });
            if !dominated {
                selected.push(c);
            }
        }
        // Backfill with dominated candidates if diversity left slots empty.
        if selected.len() < m {
            for &c in candidates {
                if selected.len() >= m {
                    break;
                }
                if !selected.iter().any(|s| s.node == c.node) {
                    selected.push(c);
                }
            }
        }
        selected.into_iter().map(|c| c.node).collect()
    }

    /// Re-prunes an over-full adjacency list around `node`.
    fn prune_neighbors(&self, graph: &mut Graph, node: u32, level: usize, m_max: usize) {
        let list = graph.nodes[node as usize].neighbors[level].clone();
        if list.len() <= m_max {
            return;
        }
        let base = graph.nodes[node as usize].vector.clone();
        let mut candidates: Vec<Candidate> = list
            .iter()
            .map(|&n| Candidate {
                node: n,
                distance: self.distance(&base, &graph.nodes[n as usize].vector),
            })
            .collect();
        candidates.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        let kept = self.select_neighbors(graph, &candidates, m_max);
        graph.nodes[node as usize].neighbors[level] = kept;
    }

    fn insert_vector(&self, vector: &[f64], rid: Rid) {
        let mut graph = self.graph.write();
        let ml = level_multiplier(self.options.m);
        let uniform: f64 = graph.rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = select_level(uniform, ml) as usize;

        let id = graph.nodes.len() as u32;
        graph.nodes.push(HnswNode {
            vector: vector.to_vec(),
            rid,
            deleted: false,
            neighbors: vec![Vec::new(); level + 1],
        });
        graph.by_rid.insert(rid, id);

        let Some(mut ep) = graph.entry else {
            graph.entry = Some(id);
            graph.max_level = level as u8;
            return;
        };

        let graph = &mut *graph;
        let top = graph.max_level as usize;

        // Greedy descent through the layers above the new node's level.
        for l in ((level + 1)..=top).rev() {
            ep = self.greedy_at_level(graph, vector, ep, l);
        }

        // Connect at every layer the node occupies.
        for l in (0..=level.min(top)).rev() {
            let found = self.search_layer(graph, vector, ep, self.options.ef_construction, l);
            let m_max = if l == 0 { self.options.m * 2 } else { self.options.m };
            let selected = self.select_neighbors(graph, &found, self.options.m);
            for &n in &selected {
                graph.nodes[id as usize].neighbors[l].push(n);
                graph.nodes[n as usize].neighbors[l].push(id);
                self.prune_neighbors(graph, n, l, m_max);
            }
            if let Some(nearest) = found.first() {
                ep = nearest.node;
            }
        }

        if level > top {
            graph.max_level = level as u8;
            graph.entry = Some(id);
        }
    }
}

impl VectorIndex for HnswIndex {
    fn build(&self, entries: &[(Vec<f64>, Rid)]) {
        for (vector, rid) in entries {
            self.insert_vector(vector, *rid);
        }
    }

    fn insert_entry(&self, vector: &[f64], rid: Rid) {
        self.insert_vector(vector, rid);
    }

    fn delete_entry(&self, _vector: &[f64], rid: Rid) {
        let mut graph = self.graph.write();
        if let Some(&id) = graph.by_rid.get(&rid) {
            graph.nodes[id as usize].deleted = true;
        }
    }

    fn scan_vector_key(&self, query: &[f64], k: usize) -> Vec<Rid> {
        let mut graph = self.graph.write();
        let Some(mut ep) = graph.entry else {
            return Vec::new();
        };
        let graph = &mut *graph;
        for l in (1..=graph.max_level as usize).rev() {
            ep = self.greedy_at_level(graph, query, ep, l);
        }
        let ef = self.options.ef_search.max(k);
        let found = self.search_layer(graph, query, ep, ef, 0);
        found
            .into_iter()
            .filter(|c| !graph.nodes[c.node as usize].deleted)
            .take(k)
            .map(|c| graph.nodes[c.node as usize].rid)
            .collect()
    }

    fn distance_kind(&self) -> DistanceKind {
        self.dist.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::index::DistanceCache;
    use std::sync::Arc;

    fn computer(kind: DistanceKind) -> DistanceComputer {
        DistanceComputer::new(
            kind,
            Arc::new(SessionConfig::new()),
            Arc::new(DistanceCache::new()),
        )
    }

    fn index() -> HnswIndex {
        HnswIndex::new(HnswOptions::default(), computer(DistanceKind::L2))
    }

    fn random_vectors(n: usize, dim: usize) -> Vec<(Vec<f64>, Rid)> {
        let mut rng = SmallRng::seed_from_u64(42);
        (0..n)
            .map(|i| {
                let v: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
                (v, Rid::new((i / 100) as u32, (i % 100) as u16))
            })
            .collect()
    }

    #[test]
    fn level_selection_is_geometric() {
        let ml = level_multiplier(16);
        assert_eq!(select_level(0.99, ml), 0);
        assert!(select_level(1e-12, ml) > 3);
        assert!(select_level(f64::MIN_POSITIVE, ml) <= 15);
    }

    #[test]
    fn empty_index_returns_nothing() {
        assert!(index().scan_vector_key(&[0.0; 8], 5).is_empty());
    }

    #[test]
    fn exact_match_is_found_first() {
        let idx = index();
        let data = random_vectors(500, 8);
        idx.build(&data);
        let (probe, rid) = data[123].clone();
        let got = idx.scan_vector_key(&probe, 1);
        assert_eq!(got, vec![rid]);
    }

    #[test]
    fn recall_against_brute_force() {
        let idx = index();
        let data = random_vectors(1000, 8);
        idx.build(&data);

        let query: Vec<f64> = (0..8).map(|i| (i as f64) * 0.05 - 0.2).collect();
        let got = idx.scan_vector_key(&query, 10);
        assert_eq!(got.len(), 10);

        // Exact top-20 by brute force; the approximate top-10 must rank
        // within it.
        let mut exact: Vec<(f64, Rid)> = data
            .iter()
            .map(|(v, rid)| (l2_scalar_dist(&query, v), *rid))
            .collect();
        exact.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let top20: std::collections::HashSet<Rid> =
            exact.iter().take(20).map(|(_, rid)| *rid).collect();
        let hits = got.iter().filter(|rid| top20.contains(rid)).count();
        assert!(hits >= 8, "only {hits}/10 results in the exact top-20");
    }

    fn l2_scalar_dist(a: &[f64], b: &[f64]) -> f64 {
        super::super::distance::l2_scalar(a, b)
    }

    #[test]
    fn deleted_entries_are_filtered_from_results() {
        let idx = index();
        let data = random_vectors(200, 4);
        idx.build(&data);
        let (probe, rid) = data[7].clone();
        idx.delete_entry(&probe, rid);
        let got = idx.scan_vector_key(&probe, 5);
        assert!(!got.contains(&rid));
        assert_eq!(got.len(), 5, "tombstones still navigate but never emit");
    }

    #[test]
    fn inner_product_orders_by_negated_dot() {
        let idx = HnswIndex::new(HnswOptions::default(), computer(DistanceKind::InnerProduct));
        idx.insert_entry(&[1.0, 0.0], Rid::new(0, 0));
        idx.insert_entry(&[10.0, 0.0], Rid::new(0, 1));
        let got = idx.scan_vector_key(&[1.0, 0.0], 2);
        assert_eq!(got[0], Rid::new(0, 1), "larger dot product is nearer");
    }
}
