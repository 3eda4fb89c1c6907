//! Error types for tsp-types

use thiserror::Error;

/// Errors that can occur when working with digest algorithms
#[derive(Error, Debug)]
pub enum Error {
    /// The requested digest algorithm is not in the registry
    #[error("Unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The supplied digest does not have the algorithm's output length
    #[error("Digest length mismatch for {algorithm}: expected {expected} bytes, got {actual}")]
    DigestLengthMismatch {
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Result type for tsp-types operations
pub type Result<T> = std::result::Result<T, Error>;
