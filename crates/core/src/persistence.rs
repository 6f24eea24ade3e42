//! Snapshot persistence.
//!
//! An index serializes to a single file: `[bincode payload][magic "SWG1"]
//! [CRC32 BE]`. Writes go to a temp file and rename into place so a crash
//! never leaves a torn snapshot. Loading verifies the checksum, re-checks
//! every structural invariant, and rebuilds lock state from scratch; ids
//! are preserved exactly.
//!
//! The distance function and heuristic are not serialized — the caller
//! supplies them again at load time.

use crate::distance::{DistanceFn, DistanceMetric};
use crate::error::{HnswError, Result};
use crate::graph::arena::{Arena, Node};
use crate::graph::locking::RegionLocker;
use crate::graph::visited::VisitedPool;
use crate::heuristic::DiversityHeuristic;
use crate::index::{make_rng, EntryState, HnswIndex};
use crate::params::HnswParams;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Magic bytes before the CRC32 footer.
const SNAPSHOT_MAGIC: &[u8; 4] = b"SWG1";

#[derive(Debug, Serialize, Deserialize)]
struct NodeSnapshot {
    id: u32,
    max_layer: u32,
    out_edges: Vec<Vec<u32>>,
    in_edges: Option<Vec<Vec<u32>>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot<L> {
    params: HnswParams,
    capacity: usize,
    length: usize,
    count: usize,
    entry_point: i64,
    top_layer: usize,
    labels: Vec<(u32, L)>,
    nodes: Vec<NodeSnapshot>,
    free_ids: Vec<u32>,
}

impl<L> Snapshot<L> {
    /// Schema and invariant checks; every failure is a [`HnswError::Corrupt`].
    fn validate(&self) -> Result<()> {
        let corrupt = |msg: String| Err(HnswError::Corrupt(msg));

        self.params
            .validate()
            .map_err(|e| HnswError::Corrupt(format!("bad params: {e}")))?;
        if self.count != self.nodes.len() || self.count != self.labels.len() {
            return corrupt(format!(
                "count {} != nodes {} / labels {}",
                self.count,
                self.nodes.len(),
                self.labels.len()
            ));
        }
        if self.length > self.capacity {
            return corrupt(format!(
                "length {} exceeds capacity {}",
                self.length, self.capacity
            ));
        }
        if self.count + self.free_ids.len() != self.length {
            return corrupt(format!(
                "live {} + free {} != length {}",
                self.count,
                self.free_ids.len(),
                self.length
            ));
        }

        let mut live: HashMap<u32, &NodeSnapshot> = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if node.id as usize >= self.length {
                return corrupt(format!("node id {} beyond length {}", node.id, self.length));
            }
            if node.out_edges.len() != node.max_layer as usize + 1 {
                return corrupt(format!(
                    "node {} has {} edge layers for max_layer {}",
                    node.id,
                    node.out_edges.len(),
                    node.max_layer
                ));
            }
            if let Some(ins) = &node.in_edges {
                if ins.len() != node.out_edges.len() {
                    return corrupt(format!("node {} in/out layer count mismatch", node.id));
                }
            }
            if node.in_edges.is_some() != self.params.allow_removals {
                return corrupt(format!(
                    "node {} in-edge tracking disagrees with allow_removals",
                    node.id
                ));
            }
            if live.insert(node.id, node).is_some() {
                return corrupt(format!("duplicate node id {}", node.id));
            }
        }
        for (id, _) in &self.labels {
            if !live.contains_key(id) {
                return corrupt(format!("label for unknown node {id}"));
            }
        }
        {
            let mut seen = self.free_ids.clone();
            seen.sort_unstable();
            seen.dedup();
            if seen.len() != self.free_ids.len() {
                return corrupt("duplicate ids in free queue".into());
            }
            for &id in &self.free_ids {
                if id as usize >= self.length {
                    return corrupt(format!("free id {id} beyond length {}", self.length));
                }
                if live.contains_key(&id) {
                    return corrupt(format!("id {id} is both live and free"));
                }
            }
        }

        match (self.count, self.entry_point) {
            (0, -1) => {}
            (0, e) => return corrupt(format!("entry point {e} on an empty graph")),
            (_, e) if e < 0 => return corrupt("missing entry point".into()),
            (_, e) => {
                let Some(enode) = live.get(&(e as u32)) else {
                    return corrupt(format!("entry point {e} is not live"));
                };
                if enode.max_layer as usize != self.top_layer {
                    return corrupt(format!(
                        "entry point layer {} != top layer {}",
                        enode.max_layer, self.top_layer
                    ));
                }
                if self
                    .nodes
                    .iter()
                    .any(|n| n.max_layer as usize > self.top_layer)
                {
                    return corrupt("a node sits above the entry point's layer".into());
                }
            }
        }

        for node in &self.nodes {
            for (layer, edges) in node.out_edges.iter().enumerate() {
                if edges.len() > self.params.max_edges_at(layer) {
                    return corrupt(format!(
                        "node {} layer {layer} degree {} over cap {}",
                        node.id,
                        edges.len(),
                        self.params.max_edges_at(layer)
                    ));
                }
                let mut seen = edges.clone();
                seen.sort_unstable();
                seen.dedup();
                if seen.len() != edges.len() {
                    return corrupt(format!("node {} layer {layer} duplicate edges", node.id));
                }
                for &n in edges {
                    if n == node.id {
                        return corrupt(format!("node {} layer {layer} self-loop", node.id));
                    }
                    let Some(target) = live.get(&n) else {
                        return corrupt(format!(
                            "node {} layer {layer} edge to dead id {n}",
                            node.id
                        ));
                    };
                    if (target.max_layer as usize) < layer {
                        return corrupt(format!(
                            "node {} layer {layer} edge to {n} above its top",
                            node.id
                        ));
                    }
                    // Symmetry when reverse adjacency is stored
                    if let Some(ins) = &target.in_edges {
                        if !ins[layer].contains(&node.id) {
                            return corrupt(format!(
                                "edge {} -> {n} at layer {layer} missing reverse entry",
                                node.id
                            ));
                        }
                    }
                }
            }
            if let Some(ins) = &node.in_edges {
                for (layer, edges) in ins.iter().enumerate() {
                    for &n in edges {
                        let Some(source) = live.get(&n) else {
                            return corrupt(format!(
                                "node {} layer {layer} in-edge from dead id {n}",
                                node.id
                            ));
                        };
                        if !source.out_edges[layer].contains(&node.id) {
                            return corrupt(format!(
                                "in-edge {n} -> {} at layer {layer} missing forward entry",
                                node.id
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

impl<L> HnswIndex<L> {
    fn to_snapshot(&self) -> Snapshot<L>
    where
        L: Clone,
    {
        let params = self.params.read().clone();
        let (entry, top_layer) = self.entry_snapshot();
        let view = self.arena.view();
        let live = self.arena.live_ids();

        let mut labels = Vec::with_capacity(live.len());
        let mut nodes = Vec::with_capacity(live.len());
        for &id in &live {
            let Some(node) = view.node(id) else { continue };
            let Some(label) = view.label(id) else { continue };
            labels.push((id, label.clone()));
            let out_edges: Vec<Vec<u32>> = (0..=node.max_layer)
                .map(|l| node.out_read(l).to_vec())
                .collect();
            let in_edges = node.tracks_in().then(|| {
                (0..=node.max_layer)
                    .map(|l| node.in_read(l).to_vec())
                    .collect()
            });
            nodes.push(NodeSnapshot {
                id,
                max_layer: node.max_layer as u32,
                out_edges,
                in_edges,
            });
        }

        Snapshot {
            params,
            capacity: self.arena.capacity(),
            length: self.arena.len(),
            count: nodes.len(),
            entry_point: entry.map_or(-1, |e| e as i64),
            top_layer,
            labels,
            nodes,
            free_ids: self.arena.free_ids_snapshot(),
        }
    }

    /// Encode the index as checksummed snapshot bytes:
    /// `[bincode payload][magic][CRC32 BE]`.
    pub fn to_snapshot_bytes(&self) -> Result<Vec<u8>>
    where
        L: Clone + Serialize,
    {
        let snapshot = self.to_snapshot();
        let bytes = bincode::serialize(&snapshot)
            .map_err(|e| HnswError::Internal(format!("snapshot encode failed: {e}")))?;
        let crc = crc32fast::hash(&bytes);
        let mut out = Vec::with_capacity(bytes.len() + 8);
        out.extend_from_slice(&bytes);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(out)
    }

    /// Decode an index from snapshot bytes produced by
    /// [`HnswIndex::to_snapshot_bytes`], supplying the distance function
    /// anew. Verifies the CRC32 footer and every structural invariant;
    /// failures surface as [`HnswError::Corrupt`].
    pub fn from_snapshot_bytes(raw: &[u8], distance: DistanceFn<L>) -> Result<Self>
    where
        L: DeserializeOwned,
    {
        if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_MAGIC {
            return Err(HnswError::Corrupt("not a smallworld snapshot".into()));
        }
        let payload = &raw[..raw.len() - 8];
        let stored = u32::from_be_bytes([
            raw[raw.len() - 4],
            raw[raw.len() - 3],
            raw[raw.len() - 2],
            raw[raw.len() - 1],
        ]);
        let computed = crc32fast::hash(payload);
        if stored != computed {
            return Err(HnswError::Corrupt(format!(
                "CRC32 mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }

        let snapshot: Snapshot<L> = bincode::deserialize(payload)
            .map_err(|e| HnswError::Corrupt(format!("snapshot decode failed: {e}")))?;
        snapshot.validate()?;
        Ok(Self::from_snapshot(snapshot, distance))
    }

    /// Serialize the index to `path` with an atomic temp-file + rename
    /// write. The snapshot reflects a consistent state only when no
    /// structural writer runs concurrently.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()>
    where
        L: Clone + Serialize,
    {
        let path = path.as_ref();
        let out = self.to_snapshot_bytes()?;

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = tmp_path(path);
        fs::write(&tmp, &out)?;
        fs::rename(&tmp, path)?;
        tracing::info!(
            path = %path.display(),
            nodes = self.len(),
            bytes = out.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load an index from `path`, supplying the distance function anew.
    pub fn load(path: impl AsRef<Path>, distance: DistanceFn<L>) -> Result<Self>
    where
        L: DeserializeOwned,
    {
        let path = path.as_ref();
        let raw = fs::read(path)?;
        let index = Self::from_snapshot_bytes(&raw, distance).map_err(|e| match e {
            HnswError::Corrupt(msg) => {
                HnswError::Corrupt(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        tracing::info!(path = %path.display(), nodes = index.len(), "snapshot loaded");
        Ok(index)
    }

    fn from_snapshot(snapshot: Snapshot<L>, distance: DistanceFn<L>) -> Self {
        let mut labels: HashMap<u32, L> = snapshot.labels.into_iter().collect();
        let entries: Vec<(u32, L, Arc<Node>)> = snapshot
            .nodes
            .into_iter()
            .filter_map(|n| {
                let label = labels.remove(&n.id)?;
                let node = Arc::new(Node::from_snapshot(n.id, n.out_edges, n.in_edges));
                Some((n.id, label, node))
            })
            .collect();
        let capacity = snapshot.capacity.max(snapshot.length).max(1);
        let arena = Arena::from_parts(capacity, snapshot.length, entries, snapshot.free_ids);

        let entry = EntryState {
            id: (snapshot.entry_point >= 0).then(|| snapshot.entry_point as u32),
            top_layer: snapshot.top_layer,
        };
        let rng = make_rng(snapshot.params.random_seed);
        HnswIndex {
            arena,
            locker: RegionLocker::new(capacity),
            visited: VisitedPool::new(capacity),
            entry: Mutex::new(entry),
            rng: Mutex::new(rng),
            distance,
            heuristic: RwLock::new(Arc::new(DiversityHeuristic)),
            params: RwLock::new(snapshot.params),
        }
    }
}

impl HnswIndex<Vec<f32>> {
    /// [`HnswIndex::load`] with a stock metric instead of a closure.
    pub fn load_with_metric(path: impl AsRef<Path>, metric: DistanceMetric) -> Result<Self> {
        Self::load(path, metric.distance_fn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    fn build_index(n: usize) -> HnswIndex<Vec<f32>> {
        let mut params = HnswParams::default();
        params.collection_size = n.max(8);
        params.max_candidates = 32;
        let index = HnswIndex::with_metric(DistanceMetric::SqEuclidean, params).unwrap();
        for i in 0..n {
            index.add(vec![i as f32, (i * i % 13) as f32]).unwrap();
        }
        index
    }

    #[test]
    fn test_roundtrip_preserves_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.swg");
        let index = build_index(60);
        // Exercise id reuse before the snapshot
        index.remove(7).unwrap();
        index.add(vec![7.5, 3.0]).unwrap();
        index.save(&path).unwrap();

        let loaded = HnswIndex::load_with_metric(&path, DistanceMetric::SqEuclidean).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.entry_point(), index.entry_point());
        loaded.validate_invariants().unwrap();

        for i in 0..60 {
            let q = vec![i as f32, 1.0];
            let a = index.knn(&q, 5).unwrap();
            let b = loaded.knn(&q, 5).unwrap();
            let ids_a: Vec<u32> = a.iter().map(|r| r.id).collect();
            let ids_b: Vec<u32> = b.iter().map(|r| r.id).collect();
            assert_eq!(ids_a, ids_b, "query {i} ids diverged after reload");
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.distance, y.distance);
                assert_eq!(x.label, y.label);
            }
        }
    }

    #[test]
    fn test_roundtrip_preserves_free_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.swg");
        let index = build_index(20);
        index.remove(3).unwrap();
        index.remove(11).unwrap();
        index.save(&path).unwrap();

        let loaded = HnswIndex::load_with_metric(&path, DistanceMetric::SqEuclidean).unwrap();
        assert_eq!(loaded.len(), 18);
        // Freed ids are reused in order after reload
        let a = loaded.add(vec![0.5, 0.5]).unwrap().unwrap();
        let b = loaded.add(vec![0.6, 0.6]).unwrap().unwrap();
        assert_eq!((a, b), (3, 11));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.swg");
        build_index(10).save(&path).unwrap();

        let mut raw = fs::read(&path).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xFF;
        fs::write(&path, &raw).unwrap();

        let err = HnswIndex::<Vec<f32>>::load_with_metric(&path, DistanceMetric::SqEuclidean)
            .unwrap_err();
        assert!(matches!(err, HnswError::Corrupt(_)), "got {err}");
    }

    #[test]
    fn test_not_a_snapshot_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.swg");
        fs::write(&path, b"not a snapshot at all").unwrap();
        let err = HnswIndex::<Vec<f32>>::load_with_metric(&path, DistanceMetric::SqEuclidean)
            .unwrap_err();
        assert!(matches!(err, HnswError::Corrupt(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = HnswIndex::<Vec<f32>>::load_with_metric(
            "/nonexistent/dir/graph.swg",
            DistanceMetric::SqEuclidean,
        )
        .unwrap_err();
        assert!(matches!(err, HnswError::Io(_)));
    }

    #[test]
    fn test_empty_index_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.swg");
        let params = HnswParams::default();
        let index = HnswIndex::with_metric(DistanceMetric::Cosine, params).unwrap();
        index.save(&path).unwrap();
        let loaded = HnswIndex::load_with_metric(&path, DistanceMetric::Cosine).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.entry_point(), None);
        assert!(loaded.knn(&vec![1.0], 1).unwrap().is_empty());
    }

    #[test]
    fn test_tampered_edge_fails_validation() {
        // Decode a valid snapshot, break symmetry by hand, re-encode with
        // a fresh CRC: load must reject it as corrupt.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.swg");
        build_index(12).save(&path).unwrap();

        let raw = fs::read(&path).unwrap();
        let payload = &raw[..raw.len() - 8];
        let mut snapshot: Snapshot<Vec<f32>> = bincode::deserialize(payload).unwrap();
        // Point some node at itself
        for node in &mut snapshot.nodes {
            if !node.out_edges[0].is_empty() {
                let id = node.id;
                node.out_edges[0][0] = id;
                break;
            }
        }
        let bytes = bincode::serialize(&snapshot).unwrap();
        let crc = crc32fast::hash(&bytes);
        let mut out = bytes;
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&crc.to_be_bytes());
        fs::write(&path, &out).unwrap();

        let err = HnswIndex::<Vec<f32>>::load_with_metric(&path, DistanceMetric::SqEuclidean)
            .unwrap_err();
        assert!(matches!(err, HnswError::Corrupt(_)), "got {err}");
    }
}
