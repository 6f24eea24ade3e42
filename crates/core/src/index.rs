//! The public index façade.
//!
//! [`HnswIndex`] owns the arena, the region locker, the visited-set pool,
//! the entry point, and the seeded layer sampler, and exposes the public
//! add/remove/update/query surface. Graph wiring lives in
//! [`crate::graph::connect`] and [`crate::graph::update`].

use crate::config;
use crate::distance::{DistanceFn, DistanceMetric};
use crate::error::{HnswError, Result};
use crate::graph::arena::Arena;
use crate::graph::locking::RegionLocker;
use crate::graph::search::{self, Candidate};
use crate::graph::visited::VisitedPool;
use crate::heuristic::{DiversityHeuristic, NeighborSelector};
use crate::params::HnswParams;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::sync::Arc;

/// A query match: id, distance, and a copy of the stored label.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<L> {
    pub id: u32,
    pub distance: f32,
    pub label: L,
}

/// Degree distribution summary for one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegreeStats {
    pub min: usize,
    pub max: usize,
    pub avg: f64,
    pub median: f64,
}

/// Per-layer statistics from [`HnswIndex::info`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    pub layer: usize,
    pub node_count: usize,
    pub out_degrees: DegreeStats,
    /// Present only when removals (and therefore in-edges) are enabled.
    pub in_degrees: Option<DegreeStats>,
}

/// Whole-graph statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphInfo {
    pub node_count: usize,
    pub capacity: usize,
    pub top_layer: Option<usize>,
    pub layers: Vec<LayerInfo>,
}

/// Entry-point state: the id of the current top-layer-holding node and
/// its layer. Guarded by a mutex held only for short critical sections,
/// never across region-lock acquisition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryState {
    pub id: Option<u32>,
    pub top_layer: usize,
}

/// Concurrent HNSW index over labels of type `L`.
///
/// All public operations take `&self` and are safe to call from any
/// thread. Queries never block behind structural writers beyond short
/// per-edge-list read locks.
pub struct HnswIndex<L> {
    pub(crate) params: RwLock<HnswParams>,
    pub(crate) arena: Arena<L>,
    pub(crate) locker: RegionLocker,
    pub(crate) visited: VisitedPool,
    pub(crate) entry: Mutex<EntryState>,
    pub(crate) rng: Mutex<ChaCha8Rng>,
    pub(crate) distance: DistanceFn<L>,
    pub(crate) heuristic: RwLock<Arc<dyn NeighborSelector>>,
}

impl<L> std::fmt::Debug for HnswIndex<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("count", &self.arena.count())
            .field("capacity", &self.arena.capacity())
            .field("params", &*self.params.read())
            .finish_non_exhaustive()
    }
}

pub(crate) fn make_rng(seed: i64) -> ChaCha8Rng {
    if seed < 0 {
        ChaCha8Rng::from_entropy()
    } else {
        ChaCha8Rng::seed_from_u64(seed as u64)
    }
}

impl<L> HnswIndex<L> {
    /// Create an index with a user-supplied distance function.
    pub fn new(distance: DistanceFn<L>, params: HnswParams) -> Result<Self> {
        params.validate()?;
        let capacity = params.collection_size;
        let rng = make_rng(params.random_seed);
        Ok(Self {
            params: RwLock::new(params),
            arena: Arena::with_capacity(capacity),
            locker: RegionLocker::new(capacity),
            visited: VisitedPool::new(capacity),
            entry: Mutex::new(EntryState {
                id: None,
                top_layer: 0,
            }),
            rng: Mutex::new(rng),
            distance,
            heuristic: RwLock::new(Arc::new(DiversityHeuristic)),
        })
    }

    // ── Introspection ──────────────────────────────────────────────────

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.arena.count()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Id of the current entry point, `None` when the graph is empty.
    pub fn entry_point(&self) -> Option<u32> {
        self.entry.lock().id
    }

    /// Top layer of the graph, `None` when empty.
    pub fn top_layer(&self) -> Option<usize> {
        let entry = self.entry.lock();
        entry.id.map(|_| entry.top_layer)
    }

    /// A copy of the current parameters.
    pub fn params(&self) -> HnswParams {
        self.params.read().clone()
    }

    /// A copy of the label stored at `id`, if live.
    pub fn label(&self, id: u32) -> Option<L>
    where
        L: Clone,
    {
        self.arena.view().label(id).cloned()
    }

    pub(crate) fn entry_snapshot(&self) -> (Option<u32>, usize) {
        let entry = self.entry.lock();
        (entry.id, entry.top_layer)
    }

    pub(crate) fn current_heuristic(&self) -> Arc<dyn NeighborSelector> {
        self.heuristic.read().clone()
    }

    pub(crate) fn after_grow(&self, grew: Option<usize>) {
        if let Some(capacity) = grew {
            self.locker.resize(capacity);
            self.visited.set_capacity(capacity);
            tracing::debug!(capacity, "arena capacity grown");
        }
    }

    /// Draw a top layer for a new node: `⌊-ln(U(0,1]) * mL⌋`, shifted down
    /// by one when the base layer is not guaranteed. Negative means the
    /// insert is vetoed.
    pub(crate) fn sample_layer(&self) -> i64 {
        let params = self.params.read();
        let u: f64 = 1.0 - self.rng.lock().gen::<f64>();
        let mut layer = (-(u.ln()) * params.distribution_rate).floor() as i64;
        if !params.zero_layer_guaranteed {
            layer -= 1;
        }
        layer.min(config::LAYER_CAP as i64)
    }

    // ── Mutation ───────────────────────────────────────────────────────

    /// Insert a label. Returns the assigned id, or `None` when the layer
    /// sampler vetoed the insert (possible only with
    /// `zero_layer_guaranteed = false`).
    pub fn add(&self, label: L) -> Result<Option<u32>> {
        let layer = self.sample_layer();
        if layer < 0 {
            return Ok(None);
        }
        let params = self.params.read().clone();
        let (id, grew) = self
            .arena
            .insert(layer as usize, label, params.allow_removals, &params);
        self.after_grow(grew);
        self.connect_new_node(id, &params)?;
        Ok(Some(id))
    }

    /// Insert a batch in parallel. Ids are returned in input order;
    /// contention between overlapping inserts is resolved by the region
    /// locker.
    pub fn add_batch(&self, labels: Vec<L>) -> Result<Vec<Option<u32>>>
    where
        L: Send + Sync,
    {
        labels
            .into_par_iter()
            .map(|label| self.add(label))
            .collect()
    }

    /// Remove a node, repairing the graph around it. The id is queued for
    /// reuse.
    pub fn remove(&self, id: u32) -> Result<()> {
        let params = self.params.read().clone();
        if !params.allow_removals {
            return Err(HnswError::NotSupported(
                "removals are disabled for this index".into(),
            ));
        }
        if !self.arena.is_live(id) {
            return Err(HnswError::InvalidArgument(format!("unknown id {id}")));
        }
        self.remove_node(id, &params)
    }

    /// Remove a batch in parallel.
    pub fn remove_batch(&self, ids: &[u32]) -> Result<()>
    where
        L: Send + Sync,
    {
        ids.par_iter().try_for_each(|&id| self.remove(id))
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// The `k` nearest neighbors of `query` at the base layer.
    pub fn knn(&self, query: &L, k: usize) -> Result<Vec<SearchResult<L>>>
    where
        L: Clone,
    {
        self.knn_in_layer(query, k, None, 0)
    }

    /// Like [`HnswIndex::knn`], returning only ids accepted by `filter`.
    /// Filtered-out nodes are still traversed.
    pub fn knn_filtered(
        &self,
        query: &L,
        k: usize,
        filter: &(dyn Fn(u32) -> bool + Sync),
    ) -> Result<Vec<SearchResult<L>>>
    where
        L: Clone,
    {
        self.knn_in_layer(query, k, Some(filter), 0)
    }

    /// k-NN restricted to a single layer of the hierarchy.
    pub fn knn_in_layer(
        &self,
        query: &L,
        k: usize,
        filter: Option<&(dyn Fn(u32) -> bool + Sync)>,
        layer: usize,
    ) -> Result<Vec<SearchResult<L>>>
    where
        L: Clone,
    {
        if k < 1 {
            return Err(HnswError::InvalidArgument("k must be >= 1".into()));
        }
        let params = self.params.read().clone();
        let ef = params.min_nn.max(k);
        let mut results = self.beam_at_layer(query, layer, ef, filter)?;
        results.truncate(k);
        Ok(self.materialize(results))
    }

    /// All neighbors within `radius` of `query` at the base layer.
    pub fn range(&self, query: &L, radius: f32) -> Result<Vec<SearchResult<L>>>
    where
        L: Clone,
    {
        self.range_in_layer(query, radius, None, 0)
    }

    pub fn range_filtered(
        &self,
        query: &L,
        radius: f32,
        filter: &(dyn Fn(u32) -> bool + Sync),
    ) -> Result<Vec<SearchResult<L>>>
    where
        L: Clone,
    {
        self.range_in_layer(query, radius, Some(filter), 0)
    }

    /// Radius search restricted to a single layer.
    pub fn range_in_layer(
        &self,
        query: &L,
        radius: f32,
        filter: Option<&(dyn Fn(u32) -> bool + Sync)>,
        layer: usize,
    ) -> Result<Vec<SearchResult<L>>>
    where
        L: Clone,
    {
        if !radius.is_finite() || radius < 0.0 {
            return Err(HnswError::InvalidArgument(
                "radius must be finite and non-negative".into(),
            ));
        }
        let Some((entry, top)) = self.live_entry() else {
            return Ok(Vec::new());
        };
        if layer > top {
            return Ok(Vec::new());
        }
        let view = self.arena.view();
        let delta = |id: u32| -> f32 {
            view.label(id)
                .map_or(f32::MAX, |l| (self.distance)(query, l))
        };
        let start = Candidate {
            id: entry,
            distance: delta(entry),
        };
        let peer = search::find_entry_point(&view, start, top, layer, &delta, None);
        let mut visited = self.visited.checkout();
        let filter_dyn: Option<&dyn Fn(u32) -> bool> = match filter {
            Some(f) => Some(f),
            None => None,
        };
        let results =
            search::range_layer(&view, peer, layer, radius, &delta, filter_dyn, &mut visited);
        drop(visited);
        drop(view);
        Ok(self.materialize(results))
    }

    /// k-NN independently at every layer in `min_layer..=max_layer`
    /// (clamped to the current top). Results are returned per layer,
    /// ascending.
    pub fn multi_layer_knn(
        &self,
        query: &L,
        k: usize,
        min_layer: usize,
        max_layer: usize,
    ) -> Result<Vec<Vec<SearchResult<L>>>>
    where
        L: Clone,
    {
        if k < 1 {
            return Err(HnswError::InvalidArgument("k must be >= 1".into()));
        }
        if min_layer > max_layer {
            return Err(HnswError::InvalidArgument(
                "min_layer must be <= max_layer".into(),
            ));
        }
        let params = self.params.read().clone();
        let ef = params.min_nn.max(k);
        let Some((_, top)) = self.live_entry() else {
            return Ok(Vec::new());
        };
        let mut layers = Vec::new();
        for layer in min_layer..=max_layer.min(top) {
            let mut results = self.beam_at_layer(query, layer, ef, None)?;
            results.truncate(k);
            layers.push(self.materialize(results));
        }
        Ok(layers)
    }

    /// Beam search at one layer; shared by the k-NN variants.
    fn beam_at_layer(
        &self,
        query: &L,
        layer: usize,
        ef: usize,
        filter: Option<&(dyn Fn(u32) -> bool + Sync)>,
    ) -> Result<Vec<Candidate>> {
        let Some((entry, top)) = self.live_entry() else {
            return Ok(Vec::new());
        };
        if layer > top {
            return Ok(Vec::new());
        }
        let view = self.arena.view();
        let delta = |id: u32| -> f32 {
            view.label(id)
                .map_or(f32::MAX, |l| (self.distance)(query, l))
        };
        let start = Candidate {
            id: entry,
            distance: delta(entry),
        };
        let peer = search::find_entry_point(&view, start, top, layer, &delta, None);
        let mut visited = self.visited.checkout();
        let filter_dyn: Option<&dyn Fn(u32) -> bool> = match filter {
            Some(f) => Some(f),
            None => None,
        };
        Ok(search::search_layer(
            &view,
            peer,
            layer,
            ef,
            &delta,
            filter_dyn,
            &mut visited,
        ))
    }

    /// Entry snapshot that retries once when the observed entry point was
    /// concurrently removed.
    fn live_entry(&self) -> Option<(u32, usize)> {
        for _ in 0..2 {
            let (id, top) = self.entry_snapshot();
            let id = id?;
            if self.arena.is_live(id) {
                return Some((id, top));
            }
        }
        None
    }

    fn materialize(&self, candidates: Vec<Candidate>) -> Vec<SearchResult<L>>
    where
        L: Clone,
    {
        let view = self.arena.view();
        candidates
            .into_iter()
            .filter_map(|c| {
                view.label(c.id).cloned().map(|label| SearchResult {
                    id: c.id,
                    distance: c.distance,
                    label,
                })
            })
            .collect()
    }

    // ── Statistics ─────────────────────────────────────────────────────

    /// Per-layer node counts and degree distributions.
    pub fn info(&self) -> GraphInfo {
        let (entry, top) = self.entry_snapshot();
        let view = self.arena.view();
        let live = self.arena.live_ids();
        let mut layers = Vec::new();
        if entry.is_some() {
            for layer in 0..=top {
                let mut out_degrees = Vec::new();
                let mut in_degrees = Vec::new();
                let mut tracks_in = false;
                for &id in &live {
                    let Some(node) = view.node(id) else { continue };
                    if layer > node.max_layer {
                        continue;
                    }
                    out_degrees.push(node.out_read(layer).len());
                    if node.tracks_in() {
                        tracks_in = true;
                        in_degrees.push(node.in_read(layer).len());
                    }
                }
                let node_count = out_degrees.len();
                layers.push(LayerInfo {
                    layer,
                    node_count,
                    out_degrees: degree_stats(out_degrees),
                    in_degrees: tracks_in.then(|| degree_stats(in_degrees)),
                });
            }
        }
        GraphInfo {
            node_count: self.arena.count(),
            capacity: self.arena.capacity(),
            top_layer: entry.map(|_| top),
            layers,
        }
    }

    /// Check structural invariants. Meaningful at quiescence (no
    /// concurrent structural writers); mid-mutation states are allowed to
    /// violate these temporarily inside a region lock.
    ///
    /// Checks per-layer degree caps, duplicate and self edges, edge
    /// symmetry (when in-edges are tracked), dangling edges to dead ids,
    /// and the entry-point rules.
    pub fn validate_invariants(&self) -> Result<()> {
        let params = self.params.read().clone();
        let (entry, top) = self.entry_snapshot();
        let view = self.arena.view();
        let live = self.arena.live_ids();

        match entry {
            None => {
                if !live.is_empty() {
                    return Err(HnswError::Internal(format!(
                        "no entry point but {} live nodes",
                        live.len()
                    )));
                }
            }
            Some(eid) => {
                if live.is_empty() {
                    return Err(HnswError::Internal(
                        "entry point set on an empty graph".into(),
                    ));
                }
                let enode = view
                    .node(eid)
                    .ok_or_else(|| HnswError::Internal(format!("entry {eid} has no record")))?;
                if view.label(eid).is_none() {
                    return Err(HnswError::Internal(format!("entry {eid} is not live")));
                }
                if enode.max_layer != top {
                    return Err(HnswError::Internal(format!(
                        "entry {eid} max_layer {} != tracked top {top}",
                        enode.max_layer
                    )));
                }
                for &id in &live {
                    if let Some(node) = view.node(id) {
                        if node.max_layer > top {
                            return Err(HnswError::Internal(format!(
                                "node {id} at layer {} above entry top {top}",
                                node.max_layer
                            )));
                        }
                    }
                }
            }
        }

        for &id in &live {
            let node = view
                .node(id)
                .ok_or_else(|| HnswError::Internal(format!("live id {id} has no record")))?;
            for layer in 0..=node.max_layer {
                let out = node.out_read(layer).to_vec();
                if out.len() > params.max_edges_at(layer) {
                    return Err(HnswError::Internal(format!(
                        "node {id} layer {layer} degree {} exceeds cap {}",
                        out.len(),
                        params.max_edges_at(layer)
                    )));
                }
                let mut seen = out.clone();
                seen.sort_unstable();
                seen.dedup();
                if seen.len() != out.len() {
                    return Err(HnswError::Internal(format!(
                        "node {id} layer {layer} has duplicate edges"
                    )));
                }
                for &n in &out {
                    if n == id {
                        return Err(HnswError::Internal(format!(
                            "node {id} layer {layer} has a self-loop"
                        )));
                    }
                    let Some(nn) = view.node(n) else {
                        return Err(HnswError::Internal(format!(
                            "node {id} layer {layer} points at missing id {n}"
                        )));
                    };
                    if view.label(n).is_none() {
                        return Err(HnswError::Internal(format!(
                            "node {id} layer {layer} points at dead id {n}"
                        )));
                    }
                    if layer > nn.max_layer {
                        return Err(HnswError::Internal(format!(
                            "node {id} layer {layer} points at {n} above its top {}",
                            nn.max_layer
                        )));
                    }
                    if nn.tracks_in() && !nn.in_read(layer).contains(id) {
                        return Err(HnswError::Internal(format!(
                            "edge {id} -> {n} at layer {layer} missing reverse entry"
                        )));
                    }
                }
                if node.tracks_in() {
                    for n in node.in_read(layer).iter() {
                        let Some(nn) = view.node(n) else {
                            return Err(HnswError::Internal(format!(
                                "node {id} layer {layer} in-edge from missing id {n}"
                            )));
                        };
                        if !nn.out_read(layer).contains(id) {
                            return Err(HnswError::Internal(format!(
                                "in-edge {n} -> {id} at layer {layer} missing forward entry"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ── Parameter setters ──────────────────────────────────────────────

    pub fn set_max_edges(&self, max_edges: usize) -> Result<()> {
        if max_edges == 0 {
            return Err(HnswError::InvalidArgument("max_edges must be >= 1".into()));
        }
        self.params.write().max_edges = max_edges;
        Ok(())
    }

    pub fn set_distribution_rate(&self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(HnswError::InvalidArgument(
                "distribution_rate must be positive and finite".into(),
            ));
        }
        self.params.write().distribution_rate = rate;
        Ok(())
    }

    pub fn set_max_candidates(&self, max_candidates: usize) -> Result<()> {
        if max_candidates == 0 {
            return Err(HnswError::InvalidArgument(
                "max_candidates must be >= 1".into(),
            ));
        }
        self.params.write().max_candidates = max_candidates;
        Ok(())
    }

    pub fn set_min_nn(&self, min_nn: usize) -> Result<()> {
        self.params.write().min_nn = min_nn.max(1);
        Ok(())
    }

    /// Raise the arena capacity hint. Growth is immediate; the hint never
    /// shrinks live storage.
    pub fn set_collection_size(&self, collection_size: usize) -> Result<()> {
        if collection_size == 0 {
            return Err(HnswError::InvalidArgument(
                "collection_size must be >= 1".into(),
            ));
        }
        self.params.write().collection_size = collection_size;
        self.after_grow(self.arena.reserve(collection_size));
        Ok(())
    }

    /// Reseed the layer sampler. Negative selects OS entropy.
    pub fn set_random_seed(&self, seed: i64) -> Result<()> {
        self.params.write().random_seed = seed;
        *self.rng.lock() = make_rng(seed);
        Ok(())
    }

    /// Enable or disable removals. In-edge tracking cannot be retrofitted,
    /// so this is only allowed while the index is empty.
    pub fn set_allow_removals(&self, allow: bool) -> Result<()> {
        let mut params = self.params.write();
        if params.allow_removals != allow && !self.arena.is_empty() {
            return Err(HnswError::InvalidArgument(
                "allow_removals can only change while the index is empty".into(),
            ));
        }
        params.allow_removals = allow;
        Ok(())
    }

    pub fn set_zero_layer_guaranteed(&self, guaranteed: bool) -> Result<()> {
        self.params.write().zero_layer_guaranteed = guaranteed;
        Ok(())
    }

    /// Swap the neighbor-selection heuristic.
    pub fn set_heuristic(&self, heuristic: Arc<dyn NeighborSelector>) {
        *self.heuristic.write() = heuristic;
    }
}

impl HnswIndex<Vec<f32>> {
    /// Create an index over `Vec<f32>` labels with a stock metric.
    pub fn with_metric(metric: DistanceMetric, params: HnswParams) -> Result<Self> {
        Self::new(metric.distance_fn(), params)
    }
}

fn degree_stats(mut degrees: Vec<usize>) -> DegreeStats {
    if degrees.is_empty() {
        return DegreeStats {
            min: 0,
            max: 0,
            avg: 0.0,
            median: 0.0,
        };
    }
    degrees.sort_unstable();
    let n = degrees.len();
    let median = if n % 2 == 1 {
        degrees[n / 2] as f64
    } else {
        (degrees[n / 2 - 1] + degrees[n / 2]) as f64 / 2.0
    };
    DegreeStats {
        min: degrees[0],
        max: degrees[n - 1],
        avg: degrees.iter().sum::<usize>() as f64 / n as f64,
        median,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_index() -> HnswIndex<Vec<f32>> {
        let mut params = HnswParams::default();
        params.collection_size = 64;
        HnswIndex::with_metric(DistanceMetric::SqEuclidean, params).unwrap()
    }

    #[test]
    fn test_index_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HnswIndex<Vec<f32>>>();
    }

    #[test]
    fn test_empty_graph_queries() {
        let index = small_index();
        assert!(index.is_empty());
        assert_eq!(index.entry_point(), None);
        assert!(index.knn(&vec![0.0, 0.0], 3).unwrap().is_empty());
        assert!(index.range(&vec![0.0, 0.0], 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_k_zero_is_invalid() {
        let index = small_index();
        let err = index.knn(&vec![0.0, 0.0], 0).unwrap_err();
        assert!(matches!(err, HnswError::InvalidArgument(_)));
    }

    #[test]
    fn test_add_and_query_roundtrip() {
        let index = small_index();
        let points = [
            vec![0.0f32, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![5.0, 5.0],
        ];
        let mut ids = Vec::new();
        for p in &points {
            ids.push(index.add(p.clone()).unwrap().unwrap());
        }
        assert_eq!(index.len(), 4);

        let res = index.knn(&vec![0.1, 0.0], 2).unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].id, ids[1]);
        assert_eq!(res[0].label, points[1]);
        assert!(res[0].distance <= res[1].distance);
    }

    #[test]
    fn test_knn_filtered() {
        let index = small_index();
        for i in 0..10 {
            index.add(vec![i as f32, 0.0]).unwrap();
        }
        let filter = |id: u32| id % 2 == 0;
        let res = index.knn_filtered(&vec![0.0, 0.0], 3, &filter).unwrap();
        assert_eq!(res.len(), 3);
        assert!(res.iter().all(|r| r.id % 2 == 0));
    }

    #[test]
    fn test_range_query() {
        let index = small_index();
        for i in 0..20 {
            index.add(vec![i as f32]).unwrap();
        }
        let res = index.range(&vec![10.0], 4.5).unwrap();
        // Squared euclidean: radius 4.5 covers offsets -2..=2
        let mut ids: Vec<f32> = res.iter().map(|r| r.label[0]).collect();
        ids.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(ids, vec![8.0, 9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_remove_not_supported_when_disabled() {
        let mut params = HnswParams::default();
        params.collection_size = 16;
        params.allow_removals = false;
        let index = HnswIndex::with_metric(DistanceMetric::SqEuclidean, params).unwrap();
        let id = index.add(vec![1.0]).unwrap().unwrap();
        let err = index.remove(id).unwrap_err();
        assert!(matches!(err, HnswError::NotSupported(_)));
    }

    #[test]
    fn test_remove_unknown_id() {
        let index = small_index();
        let err = index.remove(42).unwrap_err();
        assert!(matches!(err, HnswError::InvalidArgument(_)));
    }

    #[test]
    fn test_zero_layer_not_guaranteed_vetoes_some_inserts() {
        let mut params = HnswParams::default();
        params.collection_size = 256;
        params.zero_layer_guaranteed = false;
        let index = HnswIndex::with_metric(DistanceMetric::SqEuclidean, params).unwrap();
        let mut vetoed = 0;
        let mut accepted = 0;
        for i in 0..200 {
            match index.add(vec![i as f32]).unwrap() {
                Some(_) => accepted += 1,
                None => vetoed += 1,
            }
        }
        assert!(vetoed > 0, "shifted sampler should veto some inserts");
        assert_eq!(index.len(), accepted);
    }

    #[test]
    fn test_set_allow_removals_only_while_empty() {
        let index = small_index();
        index.set_allow_removals(false).unwrap();
        index.set_allow_removals(true).unwrap();
        index.add(vec![0.0]).unwrap();
        assert!(index.set_allow_removals(false).is_err());
        // Setting to the current value stays fine
        index.set_allow_removals(true).unwrap();
    }

    #[test]
    fn test_set_collection_size_grows() {
        let index = small_index();
        assert_eq!(index.capacity(), 64);
        index.set_collection_size(256).unwrap();
        assert_eq!(index.capacity(), 256);
        // Hint never shrinks
        index.set_collection_size(8).unwrap();
        assert_eq!(index.capacity(), 256);
    }

    #[test]
    fn test_info_degree_balance() {
        let index = small_index();
        for i in 0..32 {
            index.add(vec![(i % 7) as f32, (i % 5) as f32]).unwrap();
        }
        let info = index.info();
        assert_eq!(info.node_count, 32);
        for layer in &info.layers {
            let ins = layer.in_degrees.expect("in-edges tracked");
            // Edge symmetry: total out-degree equals total in-degree
            let total_out = layer.out_degrees.avg * layer.node_count as f64;
            let total_in = ins.avg * layer.node_count as f64;
            assert!(
                (total_out - total_in).abs() < 1e-6,
                "layer {} degree imbalance: out={total_out} in={total_in}",
                layer.layer
            );
        }
    }

    #[test]
    fn test_multi_layer_knn_shapes() {
        let index = small_index();
        for i in 0..40 {
            index.add(vec![i as f32]).unwrap();
        }
        let top = index.top_layer().unwrap();
        let layers = index.multi_layer_knn(&vec![3.0], 2, 0, top).unwrap();
        assert_eq!(layers.len(), top + 1);
        assert!(!layers[0].is_empty());
        // Per-layer results are sorted ascending
        for layer in &layers {
            for w in layer.windows(2) {
                assert!(w[0].distance <= w[1].distance);
            }
        }
    }

    #[test]
    fn test_label_accessor() {
        let index = small_index();
        let id = index.add(vec![4.0, 2.0]).unwrap().unwrap();
        assert_eq!(index.label(id), Some(vec![4.0, 2.0]));
        assert_eq!(index.label(id + 1), None);
    }
}
