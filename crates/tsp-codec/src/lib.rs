//! RFC 3161 Time-Stamp Protocol codec and verifier
//!
//! This crate implements the core of the Time-Stamp Protocol as specified in
//! RFC 3161: constructing and DER-encoding a `TimeStampReq`, parsing a
//! `TimeStampResp`, validating the cryptographic binding between a request
//! and the signed token it produced, and verifying the token signature
//! against the TSA certificate and an optional trust anchor chain.
//!
//! Transport to a TSA (HTTP or otherwise) is deliberately out of scope; the
//! encoded request bytes are handed to an external collaborator and the raw
//! response bytes come back the same way.

pub mod asn1;
pub mod error;
pub mod request;
pub mod response;
pub mod verify;

pub use asn1::{
    AlgorithmIdentifier, MessageImprint, PkiFailureInfo, PkiStatus, PkiStatusInfo, TimeStampReq,
    TimeStampResp, TstInfo,
};
pub use error::{Error, Result};
pub use request::{RequestBuilder, TimestampRequest};
pub use response::{Mismatch, TimestampResponse, VerificationResult};
pub use verify::{verify_message_imprint, verify_signature, TimestampVerification, VerifyOpts};
