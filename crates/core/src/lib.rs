//! # smallworld-core
//!
//! Concurrent in-memory approximate nearest neighbor index based on the
//! Hierarchical Navigable Small World (HNSW) graph.
//!
//! The index supports concurrent insertion, removal, in-place update, and
//! query from plain OS threads without global serialization: structural
//! writers coordinate through a re-entrant per-node region-lock protocol,
//! while queries traverse the graph taking only short per-edge-list read
//! locks. Distance functions and the neighbor-selection heuristic are
//! pluggable.
//!
//! This is the core library crate with zero async dependencies — suitable
//! for embedding directly in Rust or behind the C ABI shipped in the
//! companion `smallworld-ffi` crate.

/// Global configuration constants: defaults and tuning parameters.
pub mod config;
/// Distance metrics and the pluggable distance-function type.
pub mod distance;
/// Library error type covering argument, support, corruption, and internal failures.
pub mod error;
/// The multi-layer graph engine: arena, edge lists, locking, traversal, wiring.
pub mod graph;
/// Pluggable neighbor-selection heuristics.
pub mod heuristic;
/// The public index façade: add/remove/update/knn/range and statistics.
pub mod index;
/// Runtime-mutable index parameters.
pub mod params;
/// Snapshot persistence: save/load with CRC32 integrity checking.
pub mod persistence;

pub use distance::{DistanceFn, DistanceMetric};
pub use error::{HnswError, Result};
pub use graph::search::Candidate;
pub use heuristic::{DiversityHeuristic, NearestNeighbors, NeighborSelector};
pub use index::{DegreeStats, GraphInfo, HnswIndex, LayerInfo, SearchResult};
pub use params::HnswParams;
