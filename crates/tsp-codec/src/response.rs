//! RFC 3161 timestamp response parsing and semantic validation
//!
//! [`TimestampResponse::parse`] decodes the outer `TimeStampResp` and, when a
//! token is present, drills through the CMS layers down to `TSTInfo`:
//!
//! ```text
//! TimeStampResp ::= SEQUENCE {
//!   status PKIStatusInfo,
//!   timeStampToken TimeStampToken OPTIONAL }
//!
//! TimeStampToken ::= ContentInfo          -- id-signedData
//! SignedData.encapContentInfo.eContent    -- OCTET STRING holding TSTInfo
//! ```
//!
//! The exact eContent bytes are retained as parsed, never re-encoded, so the
//! verifier checks the signature over the same bytes the TSA signed.

use chrono::{DateTime, Utc};
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::{Decode, Encode};

use crate::asn1::{
    PkiFailureInfo, PkiStatusInfo, TimeStampResp, TstInfo, OID_SIGNED_DATA, OID_TST_INFO,
};
use crate::error::{Error, Result};
use crate::request::TimestampRequest;

/// A parsed timestamp response
///
/// All fields are derived at parse time and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct TimestampResponse {
    resp: TimeStampResp,
    token: Option<Token>,
}

/// The decoded CMS layers of a granted response
#[derive(Clone, Debug)]
pub(crate) struct Token {
    pub(crate) signed_data: SignedData,
    pub(crate) tst_info: TstInfo,
    /// The eContent bytes exactly as they appeared on the wire
    pub(crate) tst_info_der: Vec<u8>,
}

impl Token {
    fn decode(token: &der::Any) -> Result<Self> {
        let token_der = token
            .to_der()
            .map_err(|e| Error::Malformed(format!("failed to re-encode token: {e}")))?;

        let content_info = ContentInfo::from_der(&token_der)
            .map_err(|e| Error::Malformed(format!("failed to decode ContentInfo: {e}")))?;

        if content_info.content_type != OID_SIGNED_DATA {
            return Err(Error::Malformed(format!(
                "token content type is not id-signedData: {}",
                content_info.content_type
            )));
        }

        let signed_data_der = content_info
            .content
            .to_der()
            .map_err(|e| Error::Malformed(format!("failed to encode SignedData content: {e}")))?;
        let signed_data = SignedData::from_der(&signed_data_der)
            .map_err(|e| Error::Malformed(format!("failed to decode SignedData: {e}")))?;

        if signed_data.encap_content_info.econtent_type != OID_TST_INFO {
            return Err(Error::Malformed(format!(
                "encapsulated content type is not id-ct-TSTInfo: {}",
                signed_data.encap_content_info.econtent_type
            )));
        }

        // The eContent is an Any wrapping an OCTET STRING whose value is the
        // TSTInfo DER, exactly as signed.
        let econtent = signed_data
            .encap_content_info
            .econtent
            .as_ref()
            .ok_or(Error::NoTstInfo)?;
        let tst_info_der = econtent.value().to_vec();

        let tst_info = TstInfo::from_der_bytes(&tst_info_der)
            .map_err(|e| Error::Malformed(format!("failed to decode TSTInfo: {e}")))?;

        Ok(Self {
            signed_data,
            tst_info,
            tst_info_der,
        })
    }
}

impl TimestampResponse {
    /// Parse a DER-encoded `TimeStampResp`
    ///
    /// Structural ASN.1 violations fail with [`Error::Malformed`]. The RFC
    /// 3161 invariant that a token is present exactly when the status is
    /// granted is enforced here, so later stages never see a granted
    /// response without a token.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let resp = TimeStampResp::from_der_bytes(bytes)
            .map_err(|e| Error::Malformed(format!("failed to decode TimeStampResp: {e}")))?;

        let token = match (&resp.time_stamp_token, resp.status.is_success()) {
            (Some(token), true) => Some(Token::decode(token)?),
            (None, false) => None,
            (Some(_), false) => {
                return Err(Error::Malformed(format!(
                    "timeStampToken present with non-granted status {}",
                    resp.status.status
                )));
            }
            (None, true) => {
                return Err(Error::Malformed(
                    "granted status without timeStampToken".to_string(),
                ));
            }
        };

        tracing::debug!(
            "parsed timestamp response, status {}, token: {}",
            resp.status.status,
            token.is_some()
        );

        Ok(Self { resp, token })
    }

    /// The response status info
    pub fn status(&self) -> &PkiStatusInfo {
        &self.resp.status
    }

    /// The decoded TSTInfo, when the response was granted
    pub fn tst_info(&self) -> Option<&TstInfo> {
        self.token.as_ref().map(|t| &t.tst_info)
    }

    /// The decoded CMS SignedData, when the response was granted
    pub fn signed_data(&self) -> Option<&SignedData> {
        self.token.as_ref().map(|t| &t.signed_data)
    }

    /// The exact TSTInfo bytes as signed by the TSA
    pub fn tst_info_der(&self) -> Option<&[u8]> {
        self.token.as_ref().map(|t| t.tst_info_der.as_slice())
    }

    /// The token generation time
    pub fn gen_time(&self) -> Option<DateTime<Utc>> {
        let tst_info = self.tst_info()?;
        let duration = tst_info.gen_time.to_unix_duration();
        DateTime::from_timestamp(duration.as_secs() as i64, duration.subsec_nanos())
    }

    /// Validate this response against the request that produced it
    ///
    /// This is the cryptographic binding check: the digest, algorithm and
    /// (when the request carried one) the nonce inside the signed token must
    /// be exactly what was asked for, otherwise an old valid token could be
    /// spliced onto a different digest. Mismatches are collected, not
    /// returned as errors, so the caller sees every failure reason at once.
    ///
    /// A non-granted status short-circuits with a single
    /// [`Mismatch::Rejected`] reason; no field comparisons run.
    pub fn validate_against(&self, request: &TimestampRequest) -> VerificationResult {
        let mut reasons = Vec::new();

        // parse() guarantees the token is absent exactly when the status is
        // not granted, so its absence carries the rejection
        let Some(token) = &self.token else {
            reasons.push(Mismatch::Rejected {
                status: self.resp.status.status,
                status_string: self.resp.status.status_text(),
                fail_info: self.resp.status.failure_info(),
            });
            return VerificationResult::new(reasons);
        };

        let got = &token.tst_info.message_imprint;
        let want = request.message_imprint();

        if got.hash_algorithm.algorithm != want.hash_algorithm.algorithm {
            reasons.push(Mismatch::Digest {
                detail: format!(
                    "algorithm OID {} does not match requested {}",
                    got.hash_algorithm.algorithm, want.hash_algorithm.algorithm
                ),
            });
        }
        if got.hashed_message != want.hashed_message {
            reasons.push(Mismatch::Digest {
                detail: format!(
                    "digest {} does not match requested {}",
                    hex::encode(got.hashed_message.as_bytes()),
                    hex::encode(want.hashed_message.as_bytes())
                ),
            });
        }

        // A nonce is only required to echo when the request carried one.
        // DER INTEGER contents are canonical, so numeric equality is byte
        // equality; in particular a negative echo whose content bytes match
        // the magnitude of the requested value is still a mismatch.
        if let Some(expected) = request.nonce() {
            let actual = token.tst_info.nonce.as_ref().map(|n| n.as_bytes());
            if actual != Some(expected) {
                reasons.push(Mismatch::Nonce {
                    expected: expected.to_vec(),
                    actual: actual.map(|bytes| bytes.to_vec()),
                });
            }
        }

        if let Some(expected) = request.policy() {
            if token.tst_info.policy != expected {
                reasons.push(Mismatch::Policy {
                    expected,
                    actual: token.tst_info.policy,
                });
            }
        }

        VerificationResult::new(reasons)
    }
}

/// A single reason a response failed validation against its request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mismatch {
    /// The TSA did not grant the request
    Rejected {
        /// Raw PKIStatus value
        status: u8,
        /// Joined PKIFreeText lines, when present
        status_string: Option<String>,
        /// Named PKIFailureInfo bits, when present
        fail_info: Vec<PkiFailureInfo>,
    },
    /// Message imprint digest or algorithm differs from the request
    Digest { detail: String },
    /// Nonce absent or its canonical INTEGER content differs from the
    /// request's nonce
    Nonce {
        expected: Vec<u8>,
        actual: Option<Vec<u8>>,
    },
    /// Token policy differs from the requested policy
    Policy {
        expected: const_oid::ObjectIdentifier,
        actual: const_oid::ObjectIdentifier,
    },
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Rejected {
                status,
                status_string,
                fail_info,
            } => {
                write!(f, "request rejected with status {status}")?;
                if let Some(text) = status_string {
                    write!(f, ": {text}")?;
                }
                if !fail_info.is_empty() {
                    write!(f, " ({fail_info:?})")?;
                }
                Ok(())
            }
            Mismatch::Digest { detail } => write!(f, "message imprint mismatch: {detail}"),
            Mismatch::Nonce { expected, actual } => match actual {
                Some(actual) => write!(
                    f,
                    "nonce mismatch: expected {}, got {}",
                    hex::encode(expected),
                    hex::encode(actual)
                ),
                None => write!(
                    f,
                    "nonce mismatch: expected {}, token has none",
                    hex::encode(expected)
                ),
            },
            Mismatch::Policy { expected, actual } => {
                write!(f, "policy mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

/// Outcome of validating a response against its request
///
/// Built fresh per [`TimestampResponse::validate_against`] call.
#[derive(Clone, Debug)]
pub struct VerificationResult {
    /// True iff no mismatch was found
    pub matched: bool,
    /// Every mismatch found, in check order
    pub reasons: Vec<Mismatch>,
}

impl VerificationResult {
    fn new(reasons: Vec<Mismatch>) -> Self {
        Self {
            matched: reasons.is_empty(),
            reasons,
        }
    }
}
