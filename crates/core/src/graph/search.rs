//! Graph traversal: greedy descent, best-first beam search, range search.
//!
//! All traversal is read-only and takes no region locks; it works against
//! an [`ArenaView`] and a caller-supplied distance evaluator
//! `δ(id) -> f32`. An evaluator returns `f32::MAX` for ids whose label is
//! gone (a concurrent removal); such ids are traversal dead ends and are
//! never returned.
//!
//! A filter excludes nodes from *results* only — filtered nodes are still
//! traversed so a query cannot get stuck inside a filtered-out region.

use crate::graph::arena::ArenaView;
use crate::graph::visited::VisitedSet;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// A node paired with its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: u32,
    pub distance: f32,
}

/// Expansion-queue entry: max-heap over negated distance = min-heap over
/// distance.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExpandEntry {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ExpandEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for ExpandEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Accepted-set entry: max-heap over distance, farthest on top for O(log n)
/// eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorstEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for WorstEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for WorstEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One greedy sweep layer: repeatedly step to the closest improving
/// neighbor until no neighbor improves.
///
/// With a filter, the cursor may pass through filtered-out nodes but only
/// filter-passing nodes become the returned best.
pub(crate) fn greedy_layer<L>(
    view: &ArenaView<'_, L>,
    start: Candidate,
    layer: usize,
    delta: &dyn Fn(u32) -> f32,
    filter: Option<&dyn Fn(u32, usize) -> bool>,
) -> Candidate {
    let mut cursor = start;
    let mut best = start;
    loop {
        let node = match view.node(cursor.id) {
            Some(n) if layer <= n.max_layer => n,
            _ => break,
        };
        let mut step: Option<Candidate> = None;
        {
            let out = node.out_read(layer);
            for n in out.iter() {
                let d = delta(n);
                if d >= f32::MAX {
                    continue;
                }
                if step.map_or(true, |s| d < s.distance) {
                    step = Some(Candidate { id: n, distance: d });
                }
            }
        }
        match step {
            Some(s) if s.distance < cursor.distance => {
                cursor = s;
                if s.distance < best.distance && filter.map_or(true, |f| f(s.id, layer)) {
                    best = s;
                }
            }
            _ => break,
        }
    }
    if filter.is_some() {
        best
    } else {
        cursor
    }
}

/// Greedy descent from `from_layer` down to `target_layer + 1`, carrying
/// the closest node found at each layer into the next.
pub(crate) fn find_entry_point<L>(
    view: &ArenaView<'_, L>,
    start: Candidate,
    from_layer: usize,
    target_layer: usize,
    delta: &dyn Fn(u32) -> f32,
    filter: Option<&dyn Fn(u32, usize) -> bool>,
) -> Candidate {
    let mut cur = start;
    let mut layer = from_layer;
    while layer > target_layer {
        cur = greedy_layer(view, cur, layer, delta, filter);
        layer -= 1;
    }
    cur
}

/// Best-first beam search on a single layer.
///
/// Maintains a min-heap of expansion candidates and a max-heap of up to
/// `ef` accepted results; stops when the closest unexpanded candidate is
/// farther than the worst accepted result (the HNSW early exit). Returns
/// candidates sorted by ascending distance.
pub(crate) fn search_layer<L>(
    view: &ArenaView<'_, L>,
    entry: Candidate,
    layer: usize,
    ef: usize,
    delta: &dyn Fn(u32) -> f32,
    filter: Option<&dyn Fn(u32) -> bool>,
    visited: &mut VisitedSet,
) -> Vec<Candidate> {
    let ef = ef.max(1);
    visited.begin();

    let mut expand: BinaryHeap<ExpandEntry> = BinaryHeap::with_capacity(ef * 2);
    let mut accepted: BinaryHeap<WorstEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst accepted distance — avoids repeated peeks in the hot loop.
    let mut worst = f32::MAX;

    visited.first_visit(entry.id);
    if entry.distance < f32::MAX {
        expand.push(ExpandEntry {
            neg_distance: OrderedFloat(-entry.distance),
            id: entry.id,
        });
        let member = view
            .node(entry.id)
            .map_or(false, |n| layer <= n.max_layer);
        if member && filter.map_or(true, |f| f(entry.id)) {
            accepted.push(WorstEntry {
                distance: OrderedFloat(entry.distance),
                id: entry.id,
            });
            worst = entry.distance;
        }
    }

    while let Some(c) = expand.pop() {
        let c_dist = -c.neg_distance.0;
        if accepted.len() >= ef && c_dist > worst {
            break;
        }
        let node = match view.node(c.id) {
            Some(n) if layer <= n.max_layer => n,
            _ => continue,
        };
        let neighbors = node.out_read(layer).to_vec();
        for n in neighbors {
            if !visited.first_visit(n) {
                continue;
            }
            let d = delta(n);
            if d >= f32::MAX {
                continue;
            }
            if accepted.len() < ef || d < worst {
                expand.push(ExpandEntry {
                    neg_distance: OrderedFloat(-d),
                    id: n,
                });
                if filter.map_or(true, |f| f(n)) {
                    accepted.push(WorstEntry {
                        distance: OrderedFloat(d),
                        id: n,
                    });
                    if accepted.len() > ef {
                        accepted.pop();
                    }
                    worst = accepted.peek().map_or(f32::MAX, |w| w.distance.0);
                }
            }
        }
    }

    accepted
        .into_sorted_vec()
        .into_iter()
        .map(|e| Candidate {
            id: e.id,
            distance: e.distance.0,
        })
        .collect()
}

/// Radius search on a single layer: same skeleton as [`search_layer`],
/// admitting a node iff its distance is within `radius` and exiting once
/// the closest unexpanded candidate falls outside it. The entry node is
/// always expanded so a descent landing just outside the radius still
/// reaches matches inside it.
pub(crate) fn range_layer<L>(
    view: &ArenaView<'_, L>,
    entry: Candidate,
    layer: usize,
    radius: f32,
    delta: &dyn Fn(u32) -> f32,
    filter: Option<&dyn Fn(u32) -> bool>,
    visited: &mut VisitedSet,
) -> Vec<Candidate> {
    visited.begin();

    let mut expand: BinaryHeap<ExpandEntry> = BinaryHeap::new();
    let mut results: Vec<Candidate> = Vec::new();

    visited.first_visit(entry.id);
    if entry.distance < f32::MAX {
        expand.push(ExpandEntry {
            neg_distance: OrderedFloat(-entry.distance),
            id: entry.id,
        });
        let member = view
            .node(entry.id)
            .map_or(false, |n| layer <= n.max_layer);
        if member && entry.distance <= radius && filter.map_or(true, |f| f(entry.id)) {
            results.push(entry);
        }
    }

    let mut expanded_any = false;
    while let Some(c) = expand.pop() {
        let c_dist = -c.neg_distance.0;
        if expanded_any && c_dist > radius {
            break;
        }
        expanded_any = true;
        let node = match view.node(c.id) {
            Some(n) if layer <= n.max_layer => n,
            _ => continue,
        };
        let neighbors = node.out_read(layer).to_vec();
        for n in neighbors {
            if !visited.first_visit(n) {
                continue;
            }
            let d = delta(n);
            if d >= f32::MAX {
                continue;
            }
            if d <= radius {
                expand.push(ExpandEntry {
                    neg_distance: OrderedFloat(-d),
                    id: n,
                });
                if filter.map_or(true, |f| f(n)) {
                    results.push(Candidate { id: n, distance: d });
                }
            }
        }
    }

    results.sort_unstable_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}
