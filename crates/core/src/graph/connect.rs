//! Graph wiring: insert, directed connect with overflow pruning, and
//! removal repair.
//!
//! Structural writers here follow the locking discipline of the region
//! locker: candidate search runs against transient arena views with no
//! locks held, the affected id set is then region-locked, and edge lists
//! are mutated one lock at a time. Arena views are never held while
//! blocking on a region lock.

use crate::error::{HnswError, Result};
use crate::graph::arena::{ArenaView, Node};
use crate::graph::search::{self, Candidate};
use crate::index::HnswIndex;
use crate::params::HnswParams;
use std::sync::Arc;

impl<L> HnswIndex<L> {
    /// Distance between two stored labels; `f32::MAX` when either is gone.
    pub(crate) fn pair_distance(&self, view: &ArenaView<'_, L>, a: u32, b: u32) -> f32 {
        match (view.label(a), view.label(b)) {
            (Some(x), Some(y)) => (self.distance)(x, y),
            _ => f32::MAX,
        }
    }

    /// Wire a freshly allocated node into the graph.
    ///
    /// Descends greedily to the node's top layer, then per layer runs a
    /// beam search, prunes the candidates through the heuristic, and
    /// connects both directions under a region lock over the affected ids.
    pub(crate) fn connect_new_node(&self, id: u32, params: &HnswParams) -> Result<()> {
        let node = self.arena.node(id).ok_or_else(|| {
            HnswError::Internal(format!("node {id} missing right after allocation"))
        })?;

        // First node claims the entry point and is done.
        {
            let mut entry = self.entry.lock();
            if entry.id.is_none() {
                entry.id = Some(id);
                entry.top_layer = node.max_layer;
                return Ok(());
            }
        }

        let (entry_id, entry_top) = self.entry_snapshot();
        let mut peer = match entry_id {
            Some(eid) if eid != id => {
                let view = self.arena.view();
                match view.label(id) {
                    Some(q) => {
                        let delta = |n: u32| {
                            view.label(n)
                                .map_or(f32::MAX, |l| (self.distance)(q, l))
                        };
                        let start = Candidate {
                            id: eid,
                            distance: delta(eid),
                        };
                        search::find_entry_point(&view, start, entry_top, node.max_layer, &delta, None)
                    }
                    // The label vanished before wiring: a concurrent
                    // remove already won, nothing to connect.
                    None => return Ok(()),
                }
            }
            _ => Candidate {
                id,
                distance: 0.0,
            },
        };

        if entry_id.is_some() && entry_id != Some(id) {
            for layer in (0..=node.max_layer.min(entry_top)).rev() {
                peer = self.wire_layer(id, peer, layer, None, params);
            }
        }

        // Becomes the new entry point if it raised the top layer.
        let mut entry = self.entry.lock();
        if entry.id.is_none() || node.max_layer > entry.top_layer {
            entry.id = Some(id);
            entry.top_layer = node.max_layer;
            tracing::debug!(id, top_layer = node.max_layer, "entry point raised");
        }
        Ok(())
    }

    /// Insert-style wiring of `id` at a single layer starting from `peer`.
    ///
    /// Returns the closest accepted candidate to carry into the next lower
    /// layer. With a filter, only filter-passing nodes are candidates;
    /// used by the update path to avoid anchoring on dirty nodes.
    pub(crate) fn wire_layer(
        &self,
        id: u32,
        peer: Candidate,
        layer: usize,
        filter: Option<&dyn Fn(u32, usize) -> bool>,
        params: &HnswParams,
    ) -> Candidate {
        let heuristic = self.current_heuristic();
        let mut visited = self.visited.checkout();

        let (chosen, next_peer) = {
            let view = self.arena.view();
            let Some(q) = view.label(id) else {
                return peer;
            };
            let delta =
                |n: u32| view.label(n).map_or(f32::MAX, |l| (self.distance)(q, l));

            let mut entry_c = Candidate {
                id: peer.id,
                distance: delta(peer.id),
            };
            if entry_c.distance >= f32::MAX {
                // Peer died under us; restart from the global entry point.
                if let (Some(eid), _) = self.entry_snapshot() {
                    if eid != id {
                        entry_c = Candidate {
                            id: eid,
                            distance: delta(eid),
                        };
                    }
                }
            }

            let accept = |n: u32| n != id && filter.map_or(true, |f| f(n, layer));
            let accept_dyn: &dyn Fn(u32) -> bool = &accept;
            let cands = search::search_layer(
                &view,
                entry_c,
                layer,
                params.max_candidates,
                &delta,
                Some(accept_dyn),
                &mut visited,
            );

            let mut pair = |x: u32, y: u32| self.pair_distance(&view, x, y);
            let chosen = heuristic.select(&cands, &mut pair, params.max_edges_at(layer));
            let next = chosen
                .first()
                .and_then(|&c| cands.iter().find(|x| x.id == c).copied())
                .unwrap_or(entry_c);
            (chosen, next)
        };

        if !chosen.is_empty() {
            let mut region = chosen.clone();
            region.push(id);
            let guard = self.locker.lock(&region);
            {
                let view = self.arena.view();
                for &n in &chosen {
                    if view.label(n).is_none() {
                        continue;
                    }
                    self.link(&view, id, n, layer, params);
                    self.link(&view, n, id, layer, params);
                }
            }
            drop(guard);
        }
        next_peer
    }

    /// Add the directed edge `a → b` at `layer`, then prune `a`'s list if
    /// it overflowed the layer cap. In-edges mirror every change.
    pub(crate) fn link(&self, view: &ArenaView<'_, L>, a: u32, b: u32, layer: usize, params: &HnswParams) {
        if a == b {
            return;
        }
        let (Some(na), Some(nb)) = (view.node(a), view.node(b)) else {
            return;
        };
        if layer > na.max_layer || layer > nb.max_layer {
            return;
        }
        {
            let mut out = na.out_write(layer);
            if !out.push_unique(b) {
                return;
            }
        }
        if nb.tracks_in() {
            nb.in_write(layer).push_unique(a);
        }
        if na.out_read(layer).len() > params.max_edges_at(layer) {
            self.prune_overflow(view, na, a, layer, params);
        }
    }

    /// Re-select `a`'s neighbors at `layer` down to the cap, updating the
    /// affected reverse edges.
    fn prune_overflow(
        &self,
        view: &ArenaView<'_, L>,
        na: &Arc<Node>,
        a: u32,
        layer: usize,
        params: &HnswParams,
    ) {
        let cap = params.max_edges_at(layer);
        let old = na.out_read(layer).to_vec();
        if old.len() <= cap {
            return;
        }
        let candidates: Vec<Candidate> = old
            .iter()
            .map(|&x| Candidate {
                id: x,
                distance: self.pair_distance(view, x, a),
            })
            .collect();
        let heuristic = self.current_heuristic();
        let mut pair = |x: u32, y: u32| self.pair_distance(view, x, y);
        let new = heuristic.select(&candidates, &mut pair, cap);

        let removed: Vec<u32> = old.iter().copied().filter(|x| !new.contains(x)).collect();
        let added: Vec<u32> = new.iter().copied().filter(|x| !old.contains(x)).collect();
        na.out_write(layer).replace(&new);

        if na.tracks_in() {
            for &r in &removed {
                if let Some(nr) = view.node(r) {
                    if layer <= nr.max_layer && nr.tracks_in() {
                        nr.in_write(layer).remove(a);
                    }
                }
            }
            for &x in &added {
                if let Some(nx) = view.node(x) {
                    if layer <= nx.max_layer && nx.tracks_in() {
                        nx.in_write(layer).push_unique(a);
                    }
                }
            }
        }
    }

    /// Remove a node and repair the graph around it, layer by layer from
    /// its top down. At the base layer the arena slot is released while
    /// the region lock is still held, so the id cannot be reused before
    /// the last repair finishes.
    pub(crate) fn remove_node(&self, v: u32, params: &HnswParams) -> Result<()> {
        let node = self
            .arena
            .node(v)
            .ok_or_else(|| HnswError::InvalidArgument(format!("unknown id {v}")))?;
        for layer in (0..=node.max_layer).rev() {
            let guard = self.locker.lock_region(&self.arena, v, layer);
            if !self.arena.is_live(v) {
                // A concurrent removal of the same id finished first.
                return Ok(());
            }
            self.detach_layer(&node, v, layer, true, params);
            if layer == 0 {
                self.arena.remove(v);
                tracing::debug!(id = v, "node removed");
            }
            drop(guard);
        }
        Ok(())
    }

    /// Detach `v` from one layer: hand over the entry point if needed,
    /// wipe reverse edges, and repair every in-neighbor by promoting `v`'s
    /// out-neighbors (the donors) under the relative-neighborhood
    /// condition. The caller holds the region lock for `v`'s neighborhood.
    ///
    /// `v`'s own lists are left intact — stale readers that still hold the
    /// record keep a consistent adjacency to walk out of.
    pub(crate) fn detach_layer(
        &self,
        node: &Arc<Node>,
        v: u32,
        layer: usize,
        handover_entry: bool,
        params: &HnswParams,
    ) {
        let view = self.arena.view();
        let donors = node.out_read(layer).to_vec();

        if handover_entry {
            let mut entry = self.entry.lock();
            if entry.id == Some(v) {
                let mut best: Option<(u32, usize)> = None;
                for &n in &donors {
                    if view.label(n).is_none() {
                        continue;
                    }
                    if let Some(cand) = view.node(n) {
                        let degree = cand.out_degree(layer);
                        if best.map_or(true, |(_, d)| degree > d) {
                            best = Some((n, degree));
                        }
                    }
                }
                match best {
                    Some((n, _)) => {
                        entry.top_layer = view.node(n).map_or(0, |c| c.max_layer);
                        entry.id = Some(n);
                        tracing::debug!(from = v, to = n, "entry point handed over");
                    }
                    None if layer == 0 => {
                        entry.id = None;
                        entry.top_layer = 0;
                        tracing::debug!(from = v, "entry point cleared, graph empty");
                    }
                    None => {}
                }
            }
        }

        if !node.tracks_in() {
            return;
        }

        // Wipe reverse edges of v's children.
        for &n in &donors {
            if let Some(nn) = view.node(n) {
                if layer <= nn.max_layer && nn.tracks_in() {
                    nn.in_write(layer).remove(v);
                }
            }
        }

        // Repair the nodes that pointed at v.
        let parents = node.in_read(layer).to_vec();
        let cap = params.max_edges_at(layer);
        for &a in &parents {
            if a == v {
                continue;
            }
            let Some(na) = view.node(a) else { continue };
            if layer > na.max_layer {
                continue;
            }
            na.out_write(layer).remove(v);
            if view.label(a).is_none() {
                continue;
            }

            let mut cands: Vec<Candidate> = donors
                .iter()
                .copied()
                .filter(|&x| x != a && x != v)
                .filter(|&x| !na.out_read(layer).contains(x))
                .map(|x| Candidate {
                    id: x,
                    distance: self.pair_distance(&view, x, a),
                })
                .filter(|c| c.distance < f32::MAX)
                .collect();
            cands.sort_unstable_by(|p, q| {
                p.distance
                    .partial_cmp(&q.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            for c in cands {
                if na.out_read(layer).len() >= cap {
                    break;
                }
                let current = na.out_read(layer).to_vec();
                let admissible = current
                    .iter()
                    .all(|&e| self.pair_distance(&view, e, c.id) >= c.distance);
                if admissible {
                    na.out_write(layer).push(c.id);
                    if let Some(nx) = view.node(c.id) {
                        if layer <= nx.max_layer && nx.tracks_in() {
                            nx.in_write(layer).push_unique(a);
                        }
                    }
                }
            }
        }
    }
}
