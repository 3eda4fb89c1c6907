//! ASN.1 structures for the RFC 3161 Time-Stamp Protocol
//!
//! DER encoding and decoding is delegated entirely to the `der` crate; this
//! module only declares the RFC 3161 SEQUENCEs and a few helpers around them.

use const_oid::ObjectIdentifier;
use der::{
    asn1::{BitString, GeneralizedTime, Int, OctetString},
    Decode, Encode, Sequence,
};
use rand::Rng;
use tsp_types::DigestAlgorithm;
use x509_cert::{ext::pkix::name::GeneralName, ext::Extensions};

/// OID for id-ct-TSTInfo: 1.2.840.113549.1.9.16.1.4
pub const OID_TST_INFO: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

/// OID for id-signedData: 1.2.840.113549.1.7.2
pub const OID_SIGNED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// Generates a random nonce suitable for RFC 3161 timestamp requests.
///
/// The nonce is 8 random bytes, prefixed with 0x00 when the high bit is set
/// so the DER INTEGER is always interpreted as positive.
pub fn generate_positive_nonce_bytes() -> Vec<u8> {
    let mut rng = rand::rng();
    let nonce_random: [u8; 8] = rng.random();

    if nonce_random[0] & 0x80 != 0 {
        let mut padded = vec![0x00];
        padded.extend_from_slice(&nonce_random);
        padded
    } else {
        nonce_random.to_vec()
    }
}

/// Canonicalize big-endian bytes into a positive DER INTEGER content.
///
/// Redundant leading zero bytes are stripped, keeping a single 0x00 prefix
/// when the first significant byte has its high bit set. An all-zero input
/// yields the single byte 0x00.
pub fn positive_int_bytes(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0);
    match first {
        None => vec![0x00],
        Some(idx) => {
            if bytes[idx] & 0x80 != 0 {
                let mut padded = vec![0x00];
                padded.extend_from_slice(&bytes[idx..]);
                padded
            } else {
                bytes[idx..].to_vec()
            }
        }
    }
}

/// Algorithm identifier with optional parameters
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct AlgorithmIdentifier {
    /// Algorithm OID
    pub algorithm: ObjectIdentifier,
    /// Optional parameters (usually absent for hash algorithms)
    #[asn1(optional = "true")]
    pub parameters: Option<der::Any>,
}

impl AlgorithmIdentifier {
    /// Try to map back to a registered digest algorithm
    pub fn to_digest_algorithm(&self) -> Option<DigestAlgorithm> {
        DigestAlgorithm::from_oid(&self.algorithm)
    }
}

impl From<DigestAlgorithm> for AlgorithmIdentifier {
    fn from(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm: algorithm.oid(),
            parameters: None,
        }
    }
}

/// Message imprint: the (algorithm, digest) pair being timestamped
///
/// RFC 3161 Section 2.4.1
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    /// Hash algorithm used
    pub hash_algorithm: AlgorithmIdentifier,
    /// Hashed message
    pub hashed_message: OctetString,
}

impl MessageImprint {
    /// Create a new message imprint
    ///
    /// The digest length must already have been validated against the
    /// algorithm; arbitrary bytes are accepted here.
    pub fn new(algorithm: AlgorithmIdentifier, digest: Vec<u8>) -> der::Result<Self> {
        Ok(Self {
            hash_algorithm: algorithm,
            hashed_message: OctetString::new(digest)?,
        })
    }
}

/// Time-stamp request
///
/// RFC 3161 Section 2.4.1. Built via
/// [`RequestBuilder`](crate::request::RequestBuilder) rather than directly.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    /// Version (must be 1)
    pub version: u8,
    /// Message imprint to be timestamped
    pub message_imprint: MessageImprint,
    /// Optional policy OID the TSA should issue under
    #[asn1(optional = "true")]
    pub req_policy: Option<ObjectIdentifier>,
    /// Optional nonce for replay protection
    #[asn1(optional = "true")]
    pub nonce: Option<Int>,
    /// Whether the TSA certificate should be included in the response.
    /// DEFAULT FALSE; a false value is elided from the encoding per DER.
    #[asn1(default = "default_false")]
    pub cert_req: bool,
    /// Request extensions
    #[asn1(context_specific = "0", optional = "true", tag_mode = "IMPLICIT")]
    pub extensions: Option<Extensions>,
}

fn default_false() -> bool {
    false
}

impl TimeStampReq {
    /// Encode to DER
    pub fn to_der_bytes(&self) -> der::Result<Vec<u8>> {
        self.to_der()
    }

    /// Decode from DER bytes
    pub fn from_der_bytes(bytes: &[u8]) -> der::Result<Self> {
        Self::from_der(bytes)
    }
}

/// PKI status values
///
/// RFC 3161 Section 2.4.2
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PkiStatus {
    /// Granted
    Granted = 0,
    /// Granted with modifications
    GrantedWithMods = 1,
    /// Rejection
    Rejection = 2,
    /// Waiting
    Waiting = 3,
    /// Revocation warning
    RevocationWarning = 4,
    /// Revocation notification
    RevocationNotification = 5,
}

impl TryFrom<u8> for PkiStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PkiStatus::Granted),
            1 => Ok(PkiStatus::GrantedWithMods),
            2 => Ok(PkiStatus::Rejection),
            3 => Ok(PkiStatus::Waiting),
            4 => Ok(PkiStatus::RevocationWarning),
            5 => Ok(PkiStatus::RevocationNotification),
            _ => Err(()),
        }
    }
}

/// Named PKIFailureInfo bits
///
/// RFC 3161 Section 2.4.2
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PkiFailureInfo {
    /// Unrecognized or unsupported algorithm identifier
    BadAlg = 0,
    /// Transaction not permitted or supported
    BadRequest = 2,
    /// The data submitted has the wrong format
    BadDataFormat = 5,
    /// The TSA's time source is not available
    TimeNotAvailable = 14,
    /// The requested policy is not supported by the TSA
    UnacceptedPolicy = 15,
    /// The requested extension is not supported by the TSA
    UnacceptedExtension = 16,
    /// The additional information requested could not be understood
    AddInfoNotAvailable = 17,
    /// The request cannot be handled due to system failure
    SystemFailure = 25,
}

impl PkiFailureInfo {
    /// All named failure bits
    pub const ALL: [PkiFailureInfo; 8] = [
        PkiFailureInfo::BadAlg,
        PkiFailureInfo::BadRequest,
        PkiFailureInfo::BadDataFormat,
        PkiFailureInfo::TimeNotAvailable,
        PkiFailureInfo::UnacceptedPolicy,
        PkiFailureInfo::UnacceptedExtension,
        PkiFailureInfo::AddInfoNotAvailable,
        PkiFailureInfo::SystemFailure,
    ];

    /// Bit position within the PKIFailureInfo BIT STRING
    pub fn bit(self) -> usize {
        self as usize
    }
}

/// PKI status info
///
/// RFC 3161 Section 2.4.2
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    /// Status value
    pub status: u8,
    /// Optional free-text status (PKIFreeText, a SEQUENCE OF UTF8String)
    #[asn1(optional = "true")]
    pub status_string: Option<Vec<String>>,
    /// Optional failure info bit flags
    #[asn1(optional = "true")]
    pub fail_info: Option<BitString>,
}

impl PkiStatusInfo {
    /// Check if the status indicates success
    pub fn is_success(&self) -> bool {
        self.status == PkiStatus::Granted as u8 || self.status == PkiStatus::GrantedWithMods as u8
    }

    /// Get the status as an enum
    pub fn status_enum(&self) -> Option<PkiStatus> {
        PkiStatus::try_from(self.status).ok()
    }

    /// Join the PKIFreeText lines into a single readable string
    pub fn status_text(&self) -> Option<String> {
        self.status_string
            .as_ref()
            .filter(|lines| !lines.is_empty())
            .map(|lines| lines.join("; "))
    }

    /// Decode the named failure bits set in `fail_info`
    pub fn failure_info(&self) -> Vec<PkiFailureInfo> {
        let Some(bits) = &self.fail_info else {
            return Vec::new();
        };
        let bytes = bits.raw_bytes();

        PkiFailureInfo::ALL
            .into_iter()
            .filter(|flag| {
                let bit = flag.bit();
                bytes
                    .get(bit / 8)
                    .is_some_and(|byte| byte & (0x80 >> (bit % 8)) != 0)
            })
            .collect()
    }
}

/// Accuracy of the timestamp
///
/// RFC 3161 Section 2.4.2
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Accuracy {
    /// Seconds
    #[asn1(optional = "true")]
    pub seconds: Option<u64>,
    /// Milliseconds (1-999)
    #[asn1(context_specific = "0", optional = "true", tag_mode = "IMPLICIT")]
    pub millis: Option<u16>,
    /// Microseconds (1-999)
    #[asn1(context_specific = "1", optional = "true", tag_mode = "IMPLICIT")]
    pub micros: Option<u16>,
}

/// TSTInfo: the signed payload inside a timestamp token
///
/// RFC 3161 Section 2.4.2
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TstInfo {
    /// Version (must be 1)
    pub version: u8,
    /// Policy the token was issued under
    pub policy: ObjectIdentifier,
    /// Message imprint copied from the request
    pub message_imprint: MessageImprint,
    /// Serial number, unique per TSA
    pub serial_number: Int,
    /// Generation time
    pub gen_time: GeneralizedTime,
    /// Accuracy of genTime
    #[asn1(optional = "true")]
    pub accuracy: Option<Accuracy>,
    /// Whether genTime values are strictly ordered across tokens
    #[asn1(default = "default_false")]
    pub ordering: bool,
    /// Nonce echoed from the request
    #[asn1(optional = "true")]
    pub nonce: Option<Int>,
    /// TSA name
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub tsa: Option<GeneralName>,
    /// Extensions
    #[asn1(context_specific = "1", optional = "true", tag_mode = "IMPLICIT")]
    pub extensions: Option<Extensions>,
}

impl TstInfo {
    /// Decode from DER bytes
    pub fn from_der_bytes(bytes: &[u8]) -> der::Result<Self> {
        Self::from_der(bytes)
    }
}

/// Time-stamp response
///
/// RFC 3161 Section 2.4.2
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampResp {
    /// Status information
    pub status: PkiStatusInfo,
    /// Time-stamp token (a CMS ContentInfo), present iff granted
    #[asn1(optional = "true")]
    pub time_stamp_token: Option<der::Any>,
}

impl TimeStampResp {
    /// Decode from DER bytes
    pub fn from_der_bytes(bytes: &[u8]) -> der::Result<Self> {
        Self::from_der(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_imprint_encode() {
        let digest = vec![0xabu8; 32];
        let imprint =
            MessageImprint::new(DigestAlgorithm::Sha256.into(), digest).unwrap();
        let der = imprint.to_der().unwrap();
        assert!(!der.is_empty());

        let decoded = MessageImprint::from_der(&der).unwrap();
        assert_eq!(decoded, imprint);
        assert_eq!(
            decoded.hash_algorithm.to_digest_algorithm(),
            Some(DigestAlgorithm::Sha256)
        );
    }

    #[test]
    fn test_generate_positive_nonce_bytes() {
        // Exercise both paths (high bit set and clear)
        for _ in 0..100 {
            let nonce_bytes = generate_positive_nonce_bytes();

            assert!(
                nonce_bytes.len() == 8 || nonce_bytes.len() == 9,
                "Nonce length should be 8 or 9 bytes, got {}",
                nonce_bytes.len()
            );

            if nonce_bytes.len() == 9 {
                assert_eq!(nonce_bytes[0], 0x00);
                assert!(nonce_bytes[1] & 0x80 != 0);
            } else {
                assert!(nonce_bytes[0] & 0x80 == 0);
            }

            assert!(Int::new(&nonce_bytes).is_ok());
        }
    }

    #[test]
    fn test_positive_int_bytes() {
        assert_eq!(positive_int_bytes(&[0x00, 0x00, 0x07, 0x5b]), vec![0x07, 0x5b]);
        assert_eq!(positive_int_bytes(&[0x00, 0x80]), vec![0x00, 0x80]);
        assert_eq!(positive_int_bytes(&[0x80]), vec![0x00, 0x80]);
        assert_eq!(positive_int_bytes(&[0x00, 0x00]), vec![0x00]);
        assert_eq!(positive_int_bytes(&[0x01]), vec![0x01]);
    }

    #[test]
    fn test_pki_status() {
        assert_eq!(PkiStatus::try_from(0), Ok(PkiStatus::Granted));
        assert_eq!(PkiStatus::try_from(5), Ok(PkiStatus::RevocationNotification));
        assert!(PkiStatus::try_from(6).is_err());
    }

    #[test]
    fn test_status_info_roundtrip_with_free_text() {
        let info = PkiStatusInfo {
            status: PkiStatus::Rejection as u8,
            status_string: Some(vec!["policy not supported".to_string()]),
            fail_info: None,
        };
        let der = info.to_der().unwrap();
        let decoded = PkiStatusInfo::from_der(&der).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(
            decoded.status_text().as_deref(),
            Some("policy not supported")
        );
        assert!(!decoded.is_success());
    }

    #[test]
    fn test_failure_info_bits() {
        // unacceptedPolicy is bit 15: second byte, lowest bit
        let bits = BitString::from_bytes(&[0x00, 0x01]).unwrap();
        let info = PkiStatusInfo {
            status: PkiStatus::Rejection as u8,
            status_string: None,
            fail_info: Some(bits),
        };
        assert_eq!(info.failure_info(), vec![PkiFailureInfo::UnacceptedPolicy]);

        // badAlg is bit 0: first byte, highest bit
        let bits = BitString::from_bytes(&[0x80]).unwrap();
        let info = PkiStatusInfo {
            status: PkiStatus::Rejection as u8,
            status_string: None,
            fail_info: Some(bits),
        };
        assert_eq!(info.failure_info(), vec![PkiFailureInfo::BadAlg]);
    }

    #[test]
    fn test_failure_info_absent() {
        let info = PkiStatusInfo {
            status: PkiStatus::Granted as u8,
            status_string: None,
            fail_info: None,
        };
        assert!(info.failure_info().is_empty());
        assert!(info.is_success());
    }
}
