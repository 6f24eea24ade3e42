//! Pluggable neighbor selection.
//!
//! Given candidates with their distances to a base point, a selector
//! returns at most `m` candidate ids, no duplicates. The default
//! [`DiversityHeuristic`] applies relative-neighborhood pruning;
//! [`NearestNeighbors`] is the naive alternative — higher raw recall at
//! the cost of hub formation.

use crate::graph::search::Candidate;
use std::fmt;

/// Selects which candidates become a node's neighbors.
///
/// `pair_distance` evaluates the distance between two candidate ids; a
/// conforming implementation returns at most `m` ids drawn from
/// `candidates` with no duplicates.
pub trait NeighborSelector: fmt::Debug + Send + Sync {
    fn select(
        &self,
        candidates: &[Candidate],
        pair_distance: &mut dyn FnMut(u32, u32) -> f32,
        m: usize,
    ) -> Vec<u32>;
}

/// Relative-neighborhood pruning.
///
/// Walking candidates by ascending distance, a candidate is accepted iff
/// no already-accepted neighbor is closer to it than the base point is.
/// This favors diverse directions over raw nearness and keeps the graph
/// navigable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiversityHeuristic;

impl NeighborSelector for DiversityHeuristic {
    fn select(
        &self,
        candidates: &[Candidate],
        pair_distance: &mut dyn FnMut(u32, u32) -> f32,
        m: usize,
    ) -> Vec<u32> {
        if candidates.len() < m {
            return dedup_ids(candidates);
        }
        let mut sorted = candidates.to_vec();
        sorted.sort_unstable_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut result: Vec<u32> = Vec::with_capacity(m);
        for c in sorted {
            if result.len() == m {
                break;
            }
            if result.contains(&c.id) {
                continue;
            }
            let diverse = result
                .iter()
                .all(|&r| pair_distance(r, c.id) >= c.distance);
            if diverse {
                result.push(c.id);
            }
        }
        result
    }
}

/// Naive selection: the `m` nearest candidates by distance.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestNeighbors;

impl NeighborSelector for NearestNeighbors {
    fn select(
        &self,
        candidates: &[Candidate],
        _pair_distance: &mut dyn FnMut(u32, u32) -> f32,
        m: usize,
    ) -> Vec<u32> {
        let mut sorted = candidates.to_vec();
        sorted.sort_unstable_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut result: Vec<u32> = Vec::with_capacity(m);
        for c in sorted {
            if result.len() == m {
                break;
            }
            if !result.contains(&c.id) {
                result.push(c.id);
            }
        }
        result
    }
}

fn dedup_ids(candidates: &[Candidate]) -> Vec<u32> {
    let mut ids: Vec<u32> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if !ids.contains(&c.id) {
            ids.push(c.id);
        }
    }
    ids
}
