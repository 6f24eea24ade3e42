//! Serialize/deserialize round-trip: a reloaded index must answer every
//! query identically to the original.

mod common;

use common::{build_index, random_vectors};
use smallworld_core::{DistanceMetric, HnswIndex};

const DIM: usize = 32;
const N: usize = 1_000;

#[test]
fn test_serialize_deserialize_identical_results() {
    let vectors = random_vectors(N, DIM, 0xD01);
    let index = build_index(DistanceMetric::SqEuclidean, N);
    for v in &vectors {
        index.add(v.clone()).unwrap().unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.swg");
    index.save(&path).unwrap();
    let loaded = HnswIndex::load_with_metric(&path, DistanceMetric::SqEuclidean).unwrap();

    assert_eq!(loaded.len(), index.len());
    assert_eq!(loaded.entry_point(), index.entry_point());
    loaded.validate_invariants().unwrap();

    for (i, v) in vectors.iter().enumerate() {
        let a = index.knn(v, 5).unwrap();
        let b = loaded.knn(v, 5).unwrap();
        assert_eq!(a.len(), b.len(), "query {i} result count diverged");
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id, "query {i} ids diverged");
            assert_eq!(x.distance, y.distance, "query {i} distances diverged");
            assert_eq!(x.label, y.label, "query {i} labels diverged");
        }
    }
}

#[test]
fn test_snapshot_after_churn() {
    // Snapshots taken after removals and updates must round-trip with the
    // free-id queue and id assignments intact.
    let vectors = random_vectors(400, DIM, 0xD02);
    let index = build_index(DistanceMetric::SqEuclidean, 512);
    let ids: Vec<u32> = index
        .add_batch(vectors.clone())
        .unwrap()
        .into_iter()
        .map(|id| id.unwrap())
        .collect();
    for &id in ids.iter().take(40) {
        index.remove(id).unwrap();
    }
    let moved: Vec<u32> = ids.iter().skip(40).take(20).copied().collect();
    let new_labels = random_vectors(20, DIM, 0xD03);
    index.update(&moved, new_labels).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("churned.swg");
    index.save(&path).unwrap();
    let loaded = HnswIndex::load_with_metric(&path, DistanceMetric::SqEuclidean).unwrap();

    loaded.validate_invariants().unwrap();
    assert_eq!(loaded.len(), index.len());
    for v in vectors.iter().step_by(7) {
        let a: Vec<u32> = index.knn(v, 3).unwrap().iter().map(|r| r.id).collect();
        let b: Vec<u32> = loaded.knn(v, 3).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(a, b);
    }
    // Both indexes reuse the same freed id next
    let a = index.add(vectors[0].clone()).unwrap();
    let b = loaded.add(vectors[0].clone()).unwrap();
    assert_eq!(a, b);
}
