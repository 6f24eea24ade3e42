//! Error type for index operations.
//!
//! Mutating operations either complete or leave the graph in a valid
//! state; queries never mutate and report failures as empty results or
//! `InvalidArgument`.

use thiserror::Error;

/// Errors produced by index operations.
#[derive(Debug, Error)]
pub enum HnswError {
    /// A caller-supplied argument is out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is disabled by the index configuration.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A snapshot failed schema or invariant checks during load.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    /// An internal invariant was violated. Indicates a bug in the index.
    #[error("internal error: {0}")]
    Internal(String),

    /// Snapshot file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HnswError>;
