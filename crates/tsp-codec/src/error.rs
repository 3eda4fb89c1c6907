//! Error types for tsp-codec

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in timestamp codec and verification operations
///
/// Semantic request/response mismatches (digest, nonce, policy) are not
/// errors; they are collected into a
/// [`VerificationResult`](crate::response::VerificationResult).
#[derive(Error, Debug)]
pub enum Error {
    /// ASN.1 encoding error
    #[error("ASN.1 error: {0}")]
    Asn1(String),

    /// Structurally invalid timestamp response
    #[error("Malformed timestamp response: {0}")]
    Malformed(String),

    /// Failed to write the encoded request
    #[error("Failed to write request to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No timestamp token in response
    #[error("No timestamp token in response")]
    NoToken,

    /// No TSTInfo in timestamp token
    #[error("No TSTInfo in timestamp token")]
    NoTstInfo,

    /// Algorithm is not supported by the verifier
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A recomputed hash does not match the value carried in the token
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Failed to verify the token signature
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Signer certificate does not chain to any supplied trust anchor
    #[error("Untrusted signer: {0}")]
    UntrustedSigner(String),

    /// Certificate could not be processed for chain validation
    #[error("Certificate validation failed: {0}")]
    CertificateValidation(String),

    /// Digest algorithm registry error
    #[error(transparent)]
    Types(#[from] tsp_types::Error),
}

/// Result type for tsp-codec operations
pub type Result<T> = std::result::Result<T, Error>;
