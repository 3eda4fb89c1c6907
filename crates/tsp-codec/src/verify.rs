//! Timestamp token signature and trust verification
//!
//! The cryptographic primitives (hashing, asymmetric signature checks, chain
//! walking) are delegated to `aws-lc-rs` and `rustls-webpki`; this module's
//! own job is extracting the signed content bytes exactly as the TSA signed
//! them and resolving the declared signer identity.

use aws_lc_rs::{digest, signature::UnparsedPublicKey, signature::VerificationAlgorithm};
use chrono::{DateTime, Utc};
use cms::cert::CertificateChoices;
use cms::signed_data::{SignedData, SignerIdentifier};
use const_oid::ObjectIdentifier;
use der::{Decode, Encode};
use rustls_pki_types::{CertificateDer, UnixTime};
use tsp_types::DigestAlgorithm;
use webpki::{anchor_from_trusted_cert, EndEntityCert, KeyUsage, ALL_VERIFICATION_ALGS};
use x509_cert::Certificate;

use crate::asn1::TstInfo;
use crate::error::{Error, Result};
use crate::response::TimestampResponse;

const ID_KP_TIME_STAMPING: ObjectIdentifier = const_oid::db::rfc5280::ID_KP_TIME_STAMPING;
const ID_CE_SUBJECT_KEY_IDENTIFIER: ObjectIdentifier =
    const_oid::db::rfc5280::ID_CE_SUBJECT_KEY_IDENTIFIER;
const OID_MESSAGE_DIGEST: ObjectIdentifier = const_oid::db::rfc6268::ID_MESSAGE_DIGEST;
const OID_EC_PUBLIC_KEY: ObjectIdentifier = const_oid::db::rfc5912::ID_EC_PUBLIC_KEY;
const OID_RSA_ENCRYPTION: ObjectIdentifier = const_oid::db::rfc5912::RSA_ENCRYPTION;
const OID_SECP256R1: ObjectIdentifier = const_oid::db::rfc5912::SECP_256_R_1;
const OID_SECP384R1: ObjectIdentifier = const_oid::db::rfc5912::SECP_384_R_1;

/// Trust material for verifying a timestamp token
#[derive(Debug, Clone, Default)]
pub struct VerifyOpts<'a> {
    /// Trust anchors; when empty, chain validation is skipped and only the
    /// token signature itself is checked
    pub roots: Vec<CertificateDer<'a>>,

    /// Additional intermediates for chain building
    pub intermediates: Vec<CertificateDer<'a>>,

    /// Out-of-band TSA certificate, for tokens that do not embed theirs
    pub tsa_certificate: Option<CertificateDer<'a>>,
}

impl<'a> VerifyOpts<'a> {
    /// Create empty verification options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trust anchor
    pub fn with_root(mut self, root: CertificateDer<'a>) -> Self {
        self.roots.push(root);
        self
    }

    /// Add an intermediate certificate
    pub fn with_intermediate(mut self, intermediate: CertificateDer<'a>) -> Self {
        self.intermediates.push(intermediate);
        self
    }

    /// Set the TSA certificate
    pub fn with_tsa_certificate(mut self, cert: CertificateDer<'a>) -> Self {
        self.tsa_certificate = Some(cert);
        self
    }
}

/// Successful verification outcome
#[derive(Debug, Clone)]
pub struct TimestampVerification {
    /// The genTime asserted by the token
    pub time: DateTime<Utc>,
    /// The certificate that signed the token
    pub signer: Certificate,
}

/// Verify the signature of a parsed timestamp response
///
/// Checks, in order: the message-digest signed attribute against the exact
/// TSTInfo bytes, the CMS signature over the signed attributes (or over the
/// TSTInfo bytes directly when no signed attributes are present), and, when
/// trust anchors are supplied, the signer chain at the token's genTime with
/// the TimeStamping extended key usage required.
///
/// Signature and trust failures are fatal errors, distinct from the semantic
/// mismatches reported by
/// [`validate_against`](TimestampResponse::validate_against): a response
/// whose signature does not verify cannot be trusted regardless of content.
pub fn verify_signature(
    response: &TimestampResponse,
    opts: &VerifyOpts<'_>,
) -> Result<TimestampVerification> {
    let signed_data = response.signed_data().ok_or(Error::NoToken)?;
    let tst_info_der = response.tst_info_der().ok_or(Error::NoTstInfo)?;

    tracing::debug!("starting timestamp token signature verification");

    let signer_info = signed_data
        .signer_infos
        .0
        .get(0)
        .ok_or_else(|| Error::SignatureVerification("no signer info found".to_string()))?;

    let mut certificates = extract_certificates(signed_data);
    if let Some(tsa_cert) = &opts.tsa_certificate {
        let cert = Certificate::from_der(tsa_cert.as_ref()).map_err(|e| {
            Error::CertificateValidation(format!("failed to decode TSA certificate: {e}"))
        })?;
        certificates.push(cert);
    }

    let signer_cert = find_signer_certificate(&signer_info.sid, &certificates)?;

    let digest_alg_oid = &signer_info.digest_alg.oid;
    let signature = signer_info.signature.as_bytes();

    // RFC 5652: with signed attributes present, the signature covers the
    // attributes re-encoded as a plain SET OF, and the message-digest
    // attribute must hash to the encapsulated content. Without them, the
    // signature covers the content bytes directly.
    match &signer_info.signed_attrs {
        Some(signed_attrs) => {
            verify_message_digest_attribute(signed_attrs, tst_info_der, digest_alg_oid)?;
            let message = encode_signed_attrs(signed_attrs)?;
            verify_raw_signature(signature, &message, &signer_cert, digest_alg_oid)?;
        }
        None => {
            verify_raw_signature(signature, tst_info_der, &signer_cert, digest_alg_oid)?;
        }
    }
    tracing::debug!("token signature verified");

    let time = response
        .gen_time()
        .ok_or_else(|| Error::Malformed("genTime outside representable range".to_string()))?;

    if opts.roots.is_empty() {
        tracing::debug!("no trust anchors provided, skipping chain validation");
    } else {
        validate_certificate_chain(&signer_cert, time, opts, &certificates)?;
        tracing::debug!("signer chain validated to a trust anchor");
    }

    Ok(TimestampVerification {
        time,
        signer: signer_cert,
    })
}

/// Verify that a token's message imprint matches the original message
///
/// Hashes `message` with the imprint's declared algorithm and compares the
/// result byte for byte, failing with [`Error::HashMismatch`] on divergence.
pub fn verify_message_imprint(tst_info: &TstInfo, message: &[u8]) -> Result<()> {
    let imprint = &tst_info.message_imprint;
    let computed = digest_for_oid(&imprint.hash_algorithm.algorithm, message)?;
    let expected = imprint.hashed_message.as_bytes();

    if computed.as_ref() != expected {
        return Err(Error::HashMismatch {
            expected: hex::encode(expected),
            actual: hex::encode(computed.as_ref()),
        });
    }

    Ok(())
}

/// Hash data with the algorithm named by an OID
fn digest_for_oid(oid: &ObjectIdentifier, data: &[u8]) -> Result<digest::Digest> {
    let algorithm = match DigestAlgorithm::from_oid(oid) {
        Some(DigestAlgorithm::Sha1) => &digest::SHA1_FOR_LEGACY_USE_ONLY,
        Some(DigestAlgorithm::Sha256) => &digest::SHA256,
        Some(DigestAlgorithm::Sha384) => &digest::SHA384,
        Some(DigestAlgorithm::Sha512) => &digest::SHA512,
        None => return Err(Error::UnsupportedAlgorithm(oid.to_string())),
    };
    Ok(digest::digest(algorithm, data))
}

/// Extract X.509 certificates embedded in the SignedData
fn extract_certificates(signed_data: &SignedData) -> Vec<Certificate> {
    let mut certificates = Vec::new();

    if let Some(cert_set) = &signed_data.certificates {
        for cert_choice in cert_set.0.iter() {
            match cert_choice {
                CertificateChoices::Certificate(cert) => certificates.push(cert.clone()),
                CertificateChoices::Other(_) => {
                    tracing::debug!("skipping non-standard certificate format");
                }
            }
        }
    }

    certificates
}

/// Find the certificate matching the SignerIdentifier
fn find_signer_certificate(
    signer_id: &SignerIdentifier,
    certificates: &[Certificate],
) -> Result<Certificate> {
    match signer_id {
        SignerIdentifier::IssuerAndSerialNumber(issuer_serial) => {
            for cert in certificates {
                if cert.tbs_certificate.issuer == issuer_serial.issuer
                    && cert.tbs_certificate.serial_number == issuer_serial.serial_number
                {
                    return Ok(cert.clone());
                }
            }
            Err(Error::SignatureVerification(
                "no certificate matches issuer and serial number".to_string(),
            ))
        }
        SignerIdentifier::SubjectKeyIdentifier(ski) => {
            for cert in certificates {
                let Some(extensions) = &cert.tbs_certificate.extensions else {
                    continue;
                };
                for ext in extensions.iter() {
                    if ext.extn_id != ID_CE_SUBJECT_KEY_IDENTIFIER {
                        continue;
                    }
                    if let Ok(cert_ski) = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(
                        ext.extn_value.as_bytes(),
                    ) {
                        if &cert_ski == ski {
                            return Ok(cert.clone());
                        }
                    }
                }
            }
            Err(Error::SignatureVerification(
                "no certificate matches subject key identifier".to_string(),
            ))
        }
    }
}

/// Check the message-digest signed attribute against the TSTInfo bytes
fn verify_message_digest_attribute(
    signed_attrs: &x509_cert::attr::Attributes,
    tst_info_der: &[u8],
    digest_alg_oid: &ObjectIdentifier,
) -> Result<()> {
    use der::asn1::OctetStringRef;

    let attribute = signed_attrs
        .iter()
        .find(|attr| attr.oid == OID_MESSAGE_DIGEST)
        .ok_or_else(|| {
            Error::SignatureVerification("message-digest attribute not found".to_string())
        })?;

    if attribute.values.len() != 1 {
        return Err(Error::SignatureVerification(
            "message-digest attribute must have exactly one value".to_string(),
        ));
    }
    let value = attribute.values.get(0).ok_or_else(|| {
        Error::SignatureVerification("missing message-digest attribute value".to_string())
    })?;
    let declared = value.decode_as::<OctetStringRef>().map_err(|e| {
        Error::SignatureVerification(format!("message-digest is not an OCTET STRING: {e}"))
    })?;

    let computed = digest_for_oid(digest_alg_oid, tst_info_der)?;
    if computed.as_ref() != declared.as_bytes() {
        return Err(Error::HashMismatch {
            expected: hex::encode(declared.as_bytes()),
            actual: hex::encode(computed.as_ref()),
        });
    }

    Ok(())
}

/// Re-encode signed attributes for signature verification
///
/// RFC 5652: the attributes are stored under an \[0\] IMPLICIT tag in
/// SignerInfo but are signed as a generic SET OF, so the default SET tag
/// (0x31) must be applied before hashing.
fn encode_signed_attrs(attrs: &x509_cert::attr::Attributes) -> Result<Vec<u8>> {
    use der::asn1::SetOfVec;

    let attrs_vec: Vec<x509_cert::attr::Attribute> = attrs.iter().cloned().collect();
    let generic_set = SetOfVec::try_from(attrs_vec).map_err(|e| {
        Error::SignatureVerification(format!("failed to re-encode attributes: {e}"))
    })?;

    generic_set
        .to_der()
        .map_err(|e| Error::SignatureVerification(format!("failed to encode SET OF: {e}")))
}

/// Verify a signature using the certificate's public key
fn verify_raw_signature(
    signature: &[u8],
    message: &[u8],
    certificate: &Certificate,
    digest_alg_oid: &ObjectIdentifier,
) -> Result<()> {
    let spki = &certificate.tbs_certificate.subject_public_key_info;
    let public_key_bytes = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| Error::SignatureVerification("invalid public key encoding".to_string()))?;

    let algorithm = select_verification_algorithm(certificate, digest_alg_oid)?;

    UnparsedPublicKey::new(algorithm, public_key_bytes)
        .verify(message, signature)
        .map_err(|_| Error::SignatureVerification("signature verification failed".to_string()))
}

/// Pick the aws-lc-rs verification algorithm for a key/digest combination
fn select_verification_algorithm(
    certificate: &Certificate,
    digest_alg_oid: &ObjectIdentifier,
) -> Result<&'static dyn VerificationAlgorithm> {
    use aws_lc_rs::signature::{
        ECDSA_P256_SHA256_ASN1, ECDSA_P384_SHA256_ASN1, ECDSA_P384_SHA384_ASN1,
        RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_2048_8192_SHA384, RSA_PKCS1_2048_8192_SHA512,
    };

    let spki = &certificate.tbs_certificate.subject_public_key_info;
    let key_alg = &spki.algorithm.oid;

    if *key_alg == OID_EC_PUBLIC_KEY {
        let params = spki.algorithm.parameters.as_ref().ok_or_else(|| {
            Error::SignatureVerification("missing EC curve parameters".to_string())
        })?;
        let curve_oid = params.decode_as::<ObjectIdentifier>().map_err(|e| {
            Error::SignatureVerification(format!("failed to decode curve OID: {e}"))
        })?;

        match (&curve_oid, digest_alg_oid) {
            (&OID_SECP256R1, &tsp_types::digest::OID_SHA256) => Ok(&ECDSA_P256_SHA256_ASN1),
            (&OID_SECP384R1, &tsp_types::digest::OID_SHA256) => Ok(&ECDSA_P384_SHA256_ASN1),
            (&OID_SECP384R1, &tsp_types::digest::OID_SHA384) => Ok(&ECDSA_P384_SHA384_ASN1),
            _ => Err(Error::UnsupportedAlgorithm(format!(
                "curve/digest combination {curve_oid} / {digest_alg_oid}"
            ))),
        }
    } else if *key_alg == OID_RSA_ENCRYPTION {
        match DigestAlgorithm::from_oid(digest_alg_oid) {
            Some(DigestAlgorithm::Sha256) => Ok(&RSA_PKCS1_2048_8192_SHA256),
            Some(DigestAlgorithm::Sha384) => Ok(&RSA_PKCS1_2048_8192_SHA384),
            Some(DigestAlgorithm::Sha512) => Ok(&RSA_PKCS1_2048_8192_SHA512),
            _ => Err(Error::UnsupportedAlgorithm(format!(
                "RSA with digest {digest_alg_oid}"
            ))),
        }
    } else {
        Err(Error::UnsupportedAlgorithm(format!(
            "key algorithm {key_alg}"
        )))
    }
}

/// Walk the signer chain to a supplied trust anchor
///
/// The chain is evaluated at the token's genTime and the end entity must
/// carry the TimeStamping extended key usage. Failure to reach an anchor is
/// [`Error::UntrustedSigner`].
fn validate_certificate_chain(
    signer_cert: &Certificate,
    time: DateTime<Utc>,
    opts: &VerifyOpts<'_>,
    embedded_certs: &[Certificate],
) -> Result<()> {
    let signer_cert_der = signer_cert.to_der().map_err(|e| {
        Error::CertificateValidation(format!("failed to encode signer certificate: {e}"))
    })?;
    let signer_cert_der = CertificateDer::from(signer_cert_der);
    let end_entity = EndEntityCert::try_from(&signer_cert_der).map_err(|e| {
        Error::CertificateValidation(format!("failed to parse end-entity certificate: {e}"))
    })?;

    let trust_anchors: Vec<_> = opts
        .roots
        .iter()
        .map(|cert| {
            anchor_from_trusted_cert(cert)
                .map(|anchor| anchor.to_owned())
                .map_err(|e| {
                    Error::CertificateValidation(format!("failed to create trust anchor: {e}"))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut intermediates: Vec<CertificateDer<'static>> = Vec::new();
    for cert in embedded_certs {
        if cert == signer_cert {
            continue;
        }
        let cert_der = cert.to_der().map_err(|e| {
            Error::CertificateValidation(format!("failed to encode embedded certificate: {e}"))
        })?;
        intermediates.push(CertificateDer::from(cert_der));
    }
    intermediates.extend(opts.intermediates.iter().map(|c| c.clone().into_owned()));

    let verification_time =
        UnixTime::since_unix_epoch(std::time::Duration::from_secs(time.timestamp() as u64));

    end_entity
        .verify_for_usage(
            ALL_VERIFICATION_ALGS,
            &trust_anchors,
            &intermediates,
            verification_time,
            KeyUsage::required(ID_KP_TIME_STAMPING.as_bytes()),
            None,
            None,
        )
        .map_err(|e| Error::UntrustedSigner(format!("chain validation failed: {e}")))?;

    Ok(())
}
