//! Error taxonomy for the particle store, the LPT generator and the PM solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Ensemble or mesh storage could not be reserved.
    #[error("allocation of {requested} {what} failed")]
    Allocation { what: &'static str, requested: usize },

    /// resize/append past the reserved capacity. The ensemble is unchanged.
    #[error("requested length {requested} exceeds capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// Malformed power-spectrum table or unsupported field selector.
    #[error("format error: {0}")]
    FileFormat(String),

    /// A particle lies outside every node's region.
    #[error("particle {index} on node {rank} at ({x}, {y}, {z}) is outside the decomposition")]
    DecompositionMismatch {
        rank: usize,
        index: usize,
        x: f64,
        y: f64,
        z: f64,
    },

    /// Nodes issued collective calls in different order.
    #[error("collective mismatch on node {rank}: {message}")]
    CollectiveMismatch { rank: usize, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Fatal errors abort the whole run; the others can be handled by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Allocation { .. }
                | Error::DecompositionMismatch { .. }
                | Error::CollectiveMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
