//! Shared types for the RFC 3161 Time-Stamp Protocol
//!
//! This crate provides the digest algorithm registry used when constructing
//! and validating timestamp message imprints.

pub mod digest;
pub mod error;

pub use digest::DigestAlgorithm;
pub use error::{Error, Result};
