//! # IVFFlat Vector Index
//!
//! Inverted-file index with flat (uncompressed) vectors: k-means coarse
//! quantization partitions the data into `lists` buckets keyed by centroid;
//! a query probes the `probe_lists` nearest centroids and linearly scans
//! their buckets.
//!
//! ```text
//! train:  data ──k-means──> centroids[lists]
//! insert: vector ──nearest centroid──> buckets[c].push((vector, rid))
//! query:  probe nearest `probe_lists` centroids, scan, rank, top-k
//! ```
//!
//! ## Training
//!
//! `build` trains: centroids seed from a random sample, then a fixed number
//! of Lloyd iterations (assign + recompute). Entries inserted before
//! training accumulate in a pending list that is scanned exhaustively, so
//! the index answers correctly (if slowly) until the first `build`.
//!
//! ## Deletes
//!
//! Remove the entry from its bucket; centroids are not retrained. Recall
//! degrades gracefully as the data drifts from the trained centroids, which
//! matches the educational scope.

use super::distance::DistanceComputer;
use super::{DistanceKind, VectorIndex};
use crate::config::{IVF_DEFAULT_LISTS, IVF_DEFAULT_PROBE_LISTS, IVF_KMEANS_ITERATIONS};
use crate::storage::Rid;
use parking_lot::RwLock;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvfFlatOptions {
    /// Number of inverted lists (k-means centroids).
    pub lists: usize,
    /// Lists probed per query.
    pub probe_lists: usize,
}

impl Default for IvfFlatOptions {
    fn default() -> Self {
        Self { lists: IVF_DEFAULT_LISTS, probe_lists: IVF_DEFAULT_PROBE_LISTS }
    }
}

struct IvfState {
    centroids: Vec<Vec<f64>>,
    buckets: Vec<Vec<(Vec<f64>, Rid)>>,
    /// Entries inserted before training; scanned exhaustively.
    pending: Vec<(Vec<f64>, Rid)>,
}

pub struct IvfFlatIndex {
    options: IvfFlatOptions,
    dist: DistanceComputer,
    state: RwLock<IvfState>,
}

impl IvfFlatIndex {
    pub fn new(options: IvfFlatOptions, dist: DistanceComputer) -> Self {
        Self {
            options,
            dist,
            state: RwLock::new(IvfState {
                centroids: Vec::new(),
                buckets: Vec::new(),
                pending: Vec::new(),
            }),
        }
    }

    pub fn options(&self) -> IvfFlatOptions {
        self.options
    }

    pub fn is_trained(&self) -> bool {
        !self.state.read().centroids.is_empty()
    }

    fn nearest_centroid(&self, centroids: &[Vec<f64>], v: &[f64]) -> usize {
        let mut best = 0usize;
        let mut best_d = f64::INFINITY;
        for (i, c) in centroids.iter().enumerate() {
            let d = self.dist.distance(c, v);
            if d < best_d {
                best_d = d;
                best = i;
            }
        }
        best
    }

    /// Lloyd's algorithm over the build set. Assignment uses the index's own
    /// distance metric; recomputation is the coordinate mean. Empty clusters
    /// keep their previous centroid.
    fn train(&self, state: &mut IvfState, data: &[(Vec<f64>, Rid)]) {
        let k = self.options.lists.min(data.len()).max(1);
        let mut rng = SmallRng::seed_from_u64(0x1f1a_75ee_d);
        let mut sample: Vec<usize> = (0..data.len()).collect();
        sample.shuffle(&mut rng);
        state.centroids = sample[..k].iter().map(|&i| data[i].0.clone()).collect();

        let dim = data[0].0.len();
        for _ in 0..IVF_KMEANS_ITERATIONS {
            let mut sums = vec![vec![0.0f64; dim]; k];
            let mut counts = vec![0usize; k];
            for (v, _) in data {
                let c = self.nearest_centroid(&state.centroids, v);
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(v.iter()) {
                    *s += x;
                }
            }
            for c in 0..k {
                if counts[c] == 0 {
                    continue;
                }
                for (dst, s) in state.centroids[c].iter_mut().zip(sums[c].iter()) {
                    *dst = s / counts[c] as f64;
                }
            }
        }

        state.buckets = vec![Vec::new(); k];
        for (v, rid) in data {
            let c = self.nearest_centroid(&state.centroids, v);
            state.buckets[c].push((v.clone(), *rid));
        }
        state.pending.clear();
    }
}

impl VectorIndex for IvfFlatIndex {
    fn build(&self, entries: &[(Vec<f64>, Rid)]) {
        let mut state = self.state.write();
        let mut data: Vec<(Vec<f64>, Rid)> = state.pending.drain(..).collect();
        for bucket in state.buckets.drain(..) {
            data.extend(bucket);
        }
        data.extend(entries.iter().cloned());
        if data.is_empty() {
            state.centroids.clear();
            return;
        }
        self.train(&mut state, &data);
    }

    fn insert_entry(&self, vector: &[f64], rid: Rid) {
        let mut state = self.state.write();
        if state.centroids.is_empty() {
            state.pending.push((vector.to_vec(), rid));
            return;
        }
        let c = self.nearest_centroid(&state.centroids, vector);
        state.buckets[c].push((vector.to_vec(), rid));
    }

    fn delete_entry(&self, vector: &[f64], rid: Rid) {
        let mut state = self.state.write();
        if state.centroids.is_empty() {
            state.pending.retain(|(_, r)| *r != rid);
            return;
        }
        let c = self.nearest_centroid(&state.centroids, vector);
        let before = state.buckets[c].len();
        state.buckets[c].retain(|(_, r)| *r != rid);
        if state.buckets[c].len() < before {
            return;
        }
        // The entry can sit in another bucket when centroids were retrained
        // between insert and delete; fall back to a full sweep.
        for bucket in state.buckets.iter_mut() {
            bucket.retain(|(_, r)| *r != rid);
        }
    }

    fn scan_vector_key(&self, query: &[f64], k: usize) -> Vec<Rid> {
        let state = self.state.read();
        let mut ranked: Vec<(f64, Rid)> = Vec::new();

        if state.centroids.is_empty() {
            ranked.extend(
                state
                    .pending
                    .iter()
                    .map(|(v, rid)| (self.dist.distance(query, v), *rid)),
            );
        } else {
            let mut by_centroid: Vec<(f64, usize)> = state
                .centroids
                .iter()
                .enumerate()
                .map(|(i, c)| (self.dist.distance(query, c), i))
                .collect();
            by_centroid
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            for &(_, c) in by_centroid.iter().take(self.options.probe_lists.max(1)) {
                ranked.extend(
                    state.buckets[c]
                        .iter()
                        .map(|(v, rid)| (self.dist.distance(query, v), *rid)),
                );
            }
        }

        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        ranked.into_iter().take(k).map(|(_, rid)| rid).collect()
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
    use rand::Rng;
    use std::sync::Arc;

    fn index(options: IvfFlatOptions) -> IvfFlatIndex {
        IvfFlatIndex::new(
            options,
            DistanceComputer::new(
                DistanceKind::L2,
                Arc::new(SessionConfig::new()),
                Arc::new(DistanceCache::new()),
            ),
        )
    }

    fn clustered_data() -> Vec<(Vec<f64>, Rid)> {
        // Four well-separated clusters around (+-10, +-10).
        let mut rng = SmallRng::seed_from_u64(7);
        let mut data = Vec::new();
        for (c, center) in [(10.0, 10.0), (-10.0, 10.0), (10.0, -10.0), (-10.0, -10.0)]
            .iter()
            .enumerate()
        {
            for i in 0..50 {
                let v = vec![
                    center.0 + rng.gen_range(-0.5..0.5),
                    center.1 + rng.gen_range(-0.5..0.5),
                ];
                data.push((v, Rid::new(c as u32, i as u16)));
            }
        }
        data
    }

    #[test]
    fn untrained_index_scans_pending_exhaustively() {
        let idx = index(IvfFlatOptions::default());
        idx.insert_entry(&[1.0, 1.0], Rid::new(0, 0));
        idx.insert_entry(&[5.0, 5.0], Rid::new(0, 1));
        assert!(!idx.is_trained());
        assert_eq!(idx.scan_vector_key(&[1.1, 0.9], 1), vec![Rid::new(0, 0)]);
    }

    #[test]
    fn build_trains_centroids_and_answers_by_cluster() {
        let idx = index(IvfFlatOptions { lists: 4, probe_lists: 1 });
        idx.build(&clustered_data());
        assert!(idx.is_trained());

        // Probe near each cluster center: all hits come from that cluster.
        let got = idx.scan_vector_key(&[10.0, 10.0], 10);
        assert_eq!(got.len(), 10);
        assert!(got.iter().all(|rid| rid.page_id == 0));

        let got = idx.scan_vector_key(&[-10.0, -10.0], 10);
        assert!(got.iter().all(|rid| rid.page_id == 3));
    }

    #[test]
    fn probing_more_lists_widens_the_net() {
        let idx = index(IvfFlatOptions { lists: 4, probe_lists: 4 });
        idx.build(&clustered_data());
        // Querying the origin with every list probed sees all clusters.
        let got = idx.scan_vector_key(&[0.0, 0.0], 200);
        assert_eq!(got.len(), 200);
    }

    #[test]
    fn inserts_after_build_land_in_buckets() {
        let idx = index(IvfFlatOptions { lists: 4, probe_lists: 1 });
        idx.build(&clustered_data());
        idx.insert_entry(&[10.2, 9.8], Rid::new(9, 9));
        let got = idx.scan_vector_key(&[10.2, 9.8], 1);
        assert_eq!(got, vec![Rid::new(9, 9)]);
    }

    #[test]
    fn delete_removes_the_entry() {
        let idx = index(IvfFlatOptions { lists: 4, probe_lists: 4 });
        let data = clustered_data();
        idx.build(&data);
        let (v, rid) = data[0].clone();
        idx.delete_entry(&v, rid);
        assert!(!idx.scan_vector_key(&v, 200).contains(&rid));
    }
}
