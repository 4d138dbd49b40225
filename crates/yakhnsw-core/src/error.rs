//! Error types shared by the graph, the codecs and the wrapper.

use std::io;

use thiserror::Error;

use crate::pq::PqError;

/// Boxed error returned by external vector loaders.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from graph operations and (de)serialization
#[derive(Error, Debug)]
pub enum HnswError {
    /// Invalid M / Ml / EfSearch or an inconsistent PQ codebook shape
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Bad magic, unknown version, truncated or corrupt input
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation not valid for the graph's current state
    #[error("invalid state: {0}")]
    State(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to load vector for key {key}: {source}")]
    VectorLoad {
        key: String,
        #[source]
        source: LoadError,
    },

    #[error(transparent)]
    Pq(#[from] PqError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HnswError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        HnswError::Protocol(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        HnswError::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, HnswError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = HnswError::DimensionMismatch {
            expected: 3,
            actual: 4,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 3, got 4");

        let err = HnswError::protocol("bad magic \"NOPE\"");
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_pq_error_converts() {
        let err: HnswError = PqError::InsufficientData {
            count: 2,
            minimum: 16,
        }
        .into();
        assert!(matches!(err, HnswError::Pq(_)));
        assert!(err.to_string().contains("2 vectors"));
    }
}
