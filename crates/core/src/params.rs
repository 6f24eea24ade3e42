//! Runtime-mutable index parameters.
//!
//! Controls the trade-off between build speed, query speed, recall, and
//! memory usage. All fields can be changed through the index façade's
//! setters; changes apply to subsequent operations.

use crate::config;
use crate::error::{HnswError, Result};
use serde::{Deserialize, Serialize};

/// Tuning parameters for an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    /// Out-degree cap for layers ≥ 1 (`M`). The base layer allows `2 * max_edges`.
    pub max_edges: usize,
    /// Layer sampler scale (`mL`). A node's top layer is `⌊-ln(U) * mL⌋`.
    pub distribution_rate: f64,
    /// Beam width during insertion and update (`efConstruction`).
    pub max_candidates: usize,
    /// Minimum beam width during queries; the effective beam is `max(min_nn, k)`.
    pub min_nn: usize,
    /// Initial capacity hint for the node arena.
    pub collection_size: usize,
    /// Seed for the layer sampler. Negative selects OS entropy.
    pub random_seed: i64,
    /// When false, in-edges are never tracked, halving per-node memory;
    /// `remove` and `update` become errors.
    pub allow_removals: bool,
    /// When false, the layer sample is shifted down by one and inserts
    /// drawing a negative layer are vetoed.
    pub zero_layer_guaranteed: bool,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_edges: config::DEFAULT_MAX_EDGES,
            distribution_rate: config::default_distribution_rate(),
            max_candidates: config::DEFAULT_MAX_CANDIDATES,
            min_nn: config::DEFAULT_MIN_NN,
            collection_size: config::DEFAULT_COLLECTION_SIZE,
            random_seed: config::DEFAULT_RANDOM_SEED,
            allow_removals: true,
            zero_layer_guaranteed: true,
        }
    }
}

impl HnswParams {
    /// Out-degree cap at the given layer: `2 * max_edges` at the base
    /// layer, `max_edges` above it.
    pub fn max_edges_at(&self, layer: usize) -> usize {
        if layer == 0 {
            self.max_edges * 2
        } else {
            self.max_edges
        }
    }

    /// Reject parameter combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_edges == 0 {
            return Err(HnswError::InvalidArgument("max_edges must be >= 1".into()));
        }
        if self.max_candidates == 0 {
            return Err(HnswError::InvalidArgument(
                "max_candidates must be >= 1".into(),
            ));
        }
        if !(self.distribution_rate.is_finite() && self.distribution_rate > 0.0) {
            return Err(HnswError::InvalidArgument(
                "distribution_rate must be positive and finite".into(),
            ));
        }
        if self.collection_size == 0 {
            return Err(HnswError::InvalidArgument(
                "collection_size must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = HnswParams::default();
        assert_eq!(p.max_edges, 16);
        assert_eq!(p.max_candidates, 100);
        assert_eq!(p.min_nn, 5);
        assert_eq!(p.collection_size, 65_536);
        assert_eq!(p.random_seed, 31_337);
        assert!(p.allow_removals);
        assert!(p.zero_layer_guaranteed);
        assert!((p.distribution_rate - 1.0 / 16f64.ln()).abs() < 1e-12);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_layer_caps() {
        let p = HnswParams::default();
        assert_eq!(p.max_edges_at(0), 32);
        assert_eq!(p.max_edges_at(1), 16);
        assert_eq!(p.max_edges_at(7), 16);
    }

    #[test]
    fn test_validate_rejects_degenerate() {
        let mut p = HnswParams::default();
        p.max_edges = 0;
        assert!(p.validate().is_err());

        let mut p = HnswParams::default();
        p.distribution_rate = f64::NAN;
        assert!(p.validate().is_err());

        let mut p = HnswParams::default();
        p.collection_size = 0;
        assert!(p.validate().is_err());
    }
}
