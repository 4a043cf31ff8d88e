//! Error types for coupled-tree

use thiserror::Error;

/// Result type alias using [`TreeError`]
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors reported by tree construction and write operations.
///
/// A failed write never leaves a partial mutation behind: the tree keeps the
/// shape it had before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Rejected configuration or argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Node storage could not grow, or the configured node limit is reached
    #[error("Out of memory: could not allocate {requested} node slot(s)")]
    OutOfMemory {
        /// Number of slots that were requested
        requested: usize,
    },
}

impl TreeError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TreeError::InvalidArgument(msg.into())
    }

    /// Create an out of memory error for `requested` slots
    pub fn out_of_memory(requested: usize) -> Self {
        TreeError::OutOfMemory { requested }
    }

    /// Whether this error came from allocation failure.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, TreeError::OutOfMemory { .. })
    }
}
