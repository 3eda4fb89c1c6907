//! Timestamp request construction
//!
//! [`RequestBuilder`] assembles a `TimeStampReq`; calling [`RequestBuilder::build`]
//! consumes it and produces an immutable [`TimestampRequest`] whose DER
//! encoding is computed once and memoized. Mutation after build is therefore
//! impossible by construction, not merely rejected at runtime.

use std::fs;
use std::path::Path;

use const_oid::ObjectIdentifier;
use der::asn1::Int;
use tsp_types::DigestAlgorithm;

use crate::asn1::{self, MessageImprint, TimeStampReq};
use crate::error::{Error, Result};

/// Builder for an RFC 3161 timestamp request
///
/// ```no_run
/// use tsp_codec::RequestBuilder;
/// use tsp_types::DigestAlgorithm;
///
/// # fn main() -> tsp_codec::Result<()> {
/// let digest = vec![0u8; 32];
/// let request = RequestBuilder::new(DigestAlgorithm::Sha256, digest)?
///     .cert_req(true)
///     .random_nonce()
///     .build()?;
/// request.write_to_file("request.tsq")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    algorithm: DigestAlgorithm,
    digest: Vec<u8>,
    policy: Option<ObjectIdentifier>,
    nonce: Option<Vec<u8>>,
    cert_req: bool,
}

impl RequestBuilder {
    /// Start a request for the given digest
    ///
    /// Fails with a digest length mismatch when `digest` does not have the
    /// algorithm's output length.
    pub fn new(algorithm: DigestAlgorithm, digest: Vec<u8>) -> Result<Self> {
        algorithm.validate(&digest)?;
        Ok(Self {
            algorithm,
            digest,
            policy: None,
            nonce: None,
            cert_req: false,
        })
    }

    /// Set whether the TSA should include its certificate in the response
    pub fn cert_req(mut self, cert_req: bool) -> Self {
        self.cert_req = cert_req;
        self
    }

    /// Set the policy OID the TSA should issue the token under
    pub fn policy(mut self, policy: ObjectIdentifier) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the nonce from big-endian bytes of a positive integer
    ///
    /// The bytes are canonicalized (redundant leading zeros stripped, sign
    /// padding added where needed) so that equal values encode identically.
    pub fn nonce(mut self, nonce: &[u8]) -> Self {
        self.nonce = Some(asn1::positive_int_bytes(nonce));
        self
    }

    /// Set a freshly generated 64-bit random nonce
    pub fn random_nonce(mut self) -> Self {
        self.nonce = Some(asn1::generate_positive_nonce_bytes());
        self
    }

    /// Build the immutable request, encoding it to DER exactly once
    pub fn build(self) -> Result<TimestampRequest> {
        let nonce = match &self.nonce {
            Some(bytes) => Some(
                Int::new(bytes).map_err(|e| Error::Asn1(format!("invalid nonce: {e}")))?,
            ),
            None => None,
        };

        let message_imprint = MessageImprint::new(self.algorithm.into(), self.digest)
            .map_err(|e| Error::Asn1(format!("invalid message imprint: {e}")))?;

        let req = TimeStampReq {
            version: 1,
            message_imprint,
            req_policy: self.policy,
            nonce,
            cert_req: self.cert_req,
            extensions: None,
        };

        let der = req
            .to_der_bytes()
            .map_err(|e| Error::Asn1(format!("failed to encode request: {e}")))?;

        Ok(TimestampRequest {
            algorithm: self.algorithm,
            req,
            der,
        })
    }
}

/// An immutable, fully encoded timestamp request
///
/// Safely shareable across threads; the DER bytes returned by
/// [`TimestampRequest::as_der`] never change after construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimestampRequest {
    algorithm: DigestAlgorithm,
    req: TimeStampReq,
    der: Vec<u8>,
}

impl TimestampRequest {
    /// The digest algorithm of the message imprint
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The digest bytes of the message imprint
    pub fn digest(&self) -> &[u8] {
        self.req.message_imprint.hashed_message.as_bytes()
    }

    /// The message imprint as its ASN.1 structure
    pub fn message_imprint(&self) -> &MessageImprint {
        &self.req.message_imprint
    }

    /// The nonce content bytes, if a nonce was set
    pub fn nonce(&self) -> Option<&[u8]> {
        self.req.nonce.as_ref().map(|n| n.as_bytes())
    }

    /// The requested policy OID, if set
    pub fn policy(&self) -> Option<ObjectIdentifier> {
        self.req.req_policy
    }

    /// Whether the TSA certificate was requested
    pub fn cert_req(&self) -> bool {
        self.req.cert_req
    }

    /// The underlying ASN.1 structure
    pub fn as_asn1(&self) -> &TimeStampReq {
        &self.req
    }

    /// The memoized DER encoding
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Reconstruct a request from its DER encoding
    ///
    /// Fails when the bytes are structurally invalid, the digest algorithm
    /// is not registered, or the digest length does not match it.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let req = TimeStampReq::from_der_bytes(bytes)
            .map_err(|e| Error::Malformed(format!("failed to decode TimeStampReq: {e}")))?;

        let oid = &req.message_imprint.hash_algorithm.algorithm;
        let algorithm = DigestAlgorithm::from_oid(oid)
            .ok_or_else(|| Error::UnsupportedAlgorithm(oid.to_string()))?;
        algorithm.validate(req.message_imprint.hashed_message.as_bytes())?;

        Ok(Self {
            algorithm,
            req,
            der: bytes.to_vec(),
        })
    }

    /// Write the DER encoding to a file
    ///
    /// The file handle is scoped to the write and released on every exit
    /// path; any underlying I/O error (including a partial write) surfaces
    /// as [`Error::Io`] with the target path attached.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tracing::debug!(
            "writing {} byte timestamp request to {}",
            self.der.len(),
            path.display()
        );
        fs::write(path, &self.der).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
