//! Global configuration constants for smallworld.
//!
//! Defaults for every runtime parameter live here as named constants;
//! the runtime container is [`crate::params::HnswParams`].

/// Default number of out-edges per node for layers ≥ 1.
///
/// The base layer allows `2 * max_edges`. Higher values improve recall
/// but increase memory and build time. Typical range: 8–64.
pub const DEFAULT_MAX_EDGES: usize = 16;

/// Default beam width during insertion and update.
///
/// Size of the dynamic candidate list while wiring a node into the graph.
/// Higher values produce a better graph but slow down construction.
pub const DEFAULT_MAX_CANDIDATES: usize = 100;

/// Default minimum beam width during queries.
///
/// The effective beam for a k-NN query is `max(min_nn, k)`.
pub const DEFAULT_MIN_NN: usize = 5;

/// Default initial capacity hint for the node arena.
///
/// Capacity doubles when exceeded; growth is transparent to callers.
pub const DEFAULT_COLLECTION_SIZE: usize = 65_536;

/// Default seed for the layer sampler. Negative values select OS entropy.
pub const DEFAULT_RANDOM_SEED: i64 = 31_337;

/// Upper bound on a sampled node layer.
///
/// The geometric layer distribution makes layers this high unreachable in
/// practice; the cap only guards against degenerate `distribution_rate`
/// settings.
pub const LAYER_CAP: usize = 64;

/// Returns the default layer-distribution scale `1 / ln(max_edges)`.
pub fn default_distribution_rate() -> f64 {
    1.0 / (DEFAULT_MAX_EDGES as f64).ln()
}
