//! Shared helpers for the end-to-end scenarios.
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallworld_core::{DistanceMetric, GraphInfo, HnswIndex, HnswParams};

/// Seeded uniform random vectors in `[0, 1)^dim`.
pub fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>()).collect())
        .collect()
}

/// L2-normalize every vector in place.
pub fn normalize(vectors: &mut [Vec<f32>]) {
    for v in vectors.iter_mut() {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
    }
}

pub fn build_index(metric: DistanceMetric, capacity: usize) -> HnswIndex<Vec<f32>> {
    let mut params = HnswParams::default();
    params.collection_size = capacity;
    HnswIndex::with_metric(metric, params).unwrap()
}

/// Fraction of `(vector, id)` pairs whose 1-NN query returns the pair's
/// own id.
pub fn recall_at_1(index: &HnswIndex<Vec<f32>>, vectors: &[Vec<f32>], ids: &[u32]) -> f64 {
    assert_eq!(vectors.len(), ids.len());
    let mut hits = 0usize;
    for (v, &id) in vectors.iter().zip(ids) {
        let res = index.knn(v, 1).unwrap();
        if res.first().map_or(false, |r| r.id == id) {
            hits += 1;
        }
    }
    hits as f64 / vectors.len() as f64
}

/// Per-layer total out-degree must equal total in-degree (edge symmetry).
pub fn assert_degree_balance(info: &GraphInfo) {
    for layer in &info.layers {
        let ins = layer
            .in_degrees
            .expect("in-edges are tracked when removals are enabled");
        let total_out = layer.out_degrees.avg * layer.node_count as f64;
        let total_in = ins.avg * layer.node_count as f64;
        assert!(
            (total_out - total_in).abs() < 1e-6,
            "layer {} out/in imbalance: {total_out} vs {total_in}",
            layer.layer
        );
    }
}
