//! End-to-end request/response tests
//!
//! Builds a real request, round-trips it through DER, then validates it
//! against synthetic TSA responses assembled from the same CMS layers a real
//! TSA would produce (minus the signature, which semantic validation does
//! not cover).

use std::time::Duration;

use aws_lc_rs::digest::{digest, SHA256};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerInfos};
use const_oid::ObjectIdentifier;
use der::asn1::{BitString, GeneralizedTime, Int, SetOfVec};
use der::{Any, Encode, Tag};
use tsp_codec::asn1::{
    MessageImprint, PkiFailureInfo, PkiStatusInfo, TimeStampResp, TstInfo, OID_SIGNED_DATA,
    OID_TST_INFO,
};
use tsp_codec::{Mismatch, RequestBuilder, TimestampRequest, TimestampResponse};
use tsp_types::DigestAlgorithm;

const NONCE: u64 = 123456789;

fn test_request() -> TimestampRequest {
    let digest = digest(&SHA256, b"test").as_ref().to_vec();
    RequestBuilder::new(DigestAlgorithm::Sha256, digest)
        .unwrap()
        .nonce(&NONCE.to_be_bytes())
        .cert_req(true)
        .build()
        .unwrap()
}

/// TSTInfo echoing the request, with no policy requested so any policy is fine
fn matching_tst_info(request: &TimestampRequest) -> TstInfo {
    TstInfo {
        version: 1,
        policy: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.13762.3"),
        message_imprint: request.message_imprint().clone(),
        serial_number: Int::new(&[0x2a]).unwrap(),
        gen_time: GeneralizedTime::from_unix_duration(Duration::from_secs(1_700_000_000)).unwrap(),
        accuracy: None,
        ordering: false,
        nonce: request.nonce().map(|n| Int::new(n).unwrap()),
        tsa: None,
        extensions: None,
    }
}

/// Wrap a TSTInfo in ContentInfo/SignedData and a granted TimeStampResp
fn granted_response(tst_info: &TstInfo) -> Vec<u8> {
    let tst_info_der = tst_info.to_der().unwrap();
    let econtent = Any::new(Tag::OctetString, tst_info_der).unwrap();

    let signed_data = SignedData {
        version: CmsVersion::V3,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: OID_TST_INFO,
            econtent: Some(econtent),
        },
        certificates: None,
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let content_info = ContentInfo {
        content_type: OID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).unwrap(),
    };

    let resp = TimeStampResp {
        status: PkiStatusInfo {
            status: 0,
            status_string: None,
            fail_info: None,
        },
        time_stamp_token: Some(Any::encode_from(&content_info).unwrap()),
    };
    resp.to_der().unwrap()
}

#[test]
fn request_roundtrip_preserves_fields() {
    let request = test_request();

    let decoded = TimestampRequest::from_der(request.as_der()).unwrap();
    assert_eq!(decoded.algorithm(), DigestAlgorithm::Sha256);
    assert_eq!(decoded.digest(), digest(&SHA256, b"test").as_ref());
    assert_eq!(decoded.nonce(), Some(&[0x07, 0x5b, 0xcd, 0x15][..]));
    assert!(decoded.cert_req());
    assert!(decoded.policy().is_none());

    // Re-encoding the decoded request yields the original bytes
    assert_eq!(decoded.as_der(), request.as_der());
}

#[test]
fn matching_response_validates() {
    let request = test_request();
    let response_der = granted_response(&matching_tst_info(&request));

    let response = TimestampResponse::parse(&response_der).unwrap();
    assert!(response.status().is_success());
    assert!(response.gen_time().is_some());

    let result = response.validate_against(&request);
    assert!(result.matched, "unexpected reasons: {:?}", result.reasons);
    assert!(result.reasons.is_empty());
}

#[test]
fn tampered_nonce_is_flagged() {
    let request = test_request();
    let mut tst_info = matching_tst_info(&request);
    tst_info.nonce = Some(Int::new(&999u16.to_be_bytes()).unwrap());

    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    let result = response.validate_against(&request);

    assert!(!result.matched);
    assert_eq!(result.reasons.len(), 1);
    assert!(matches!(result.reasons[0], Mismatch::Nonce { .. }));
}

#[test]
fn negative_response_nonce_is_flagged() {
    // Requested +133, canonical content [0x00, 0x85]. A response nonce with
    // content [0x85] is -123; reading it by magnitude would make the two
    // collide, so it must be reported as a mismatch.
    let digest = digest(&SHA256, b"test").as_ref().to_vec();
    let request = RequestBuilder::new(DigestAlgorithm::Sha256, digest)
        .unwrap()
        .nonce(&[0x85])
        .build()
        .unwrap();
    assert_eq!(request.nonce(), Some(&[0x00, 0x85][..]));

    let mut tst_info = matching_tst_info(&request);
    tst_info.nonce = Some(Int::new(&[0x85]).unwrap());

    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    let result = response.validate_against(&request);

    assert!(!result.matched);
    assert_eq!(result.reasons.len(), 1);
    assert!(matches!(result.reasons[0], Mismatch::Nonce { .. }));
}

#[test]
fn missing_nonce_is_flagged_when_requested() {
    let request = test_request();
    let mut tst_info = matching_tst_info(&request);
    tst_info.nonce = None;

    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    let result = response.validate_against(&request);

    assert!(!result.matched);
    assert!(matches!(
        result.reasons[0],
        Mismatch::Nonce { actual: None, .. }
    ));
}

#[test]
fn nonceless_request_accepts_any_response_nonce() {
    let digest = digest(&SHA256, b"test").as_ref().to_vec();
    let request = RequestBuilder::new(DigestAlgorithm::Sha256, digest)
        .unwrap()
        .build()
        .unwrap();

    // Response with a nonce the request never asked for
    let mut tst_info = matching_tst_info(&request);
    tst_info.nonce = Some(Int::new(&[0x11, 0x22]).unwrap());
    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    assert!(response.validate_against(&request).matched);

    // And one without
    let mut tst_info = matching_tst_info(&request);
    tst_info.nonce = None;
    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    assert!(response.validate_against(&request).matched);
}

#[test]
fn wrong_digest_is_flagged() {
    let request = test_request();
    let mut tst_info = matching_tst_info(&request);
    tst_info.message_imprint =
        MessageImprint::new(DigestAlgorithm::Sha256.into(), vec![0u8; 32]).unwrap();

    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    let result = response.validate_against(&request);

    assert!(!result.matched);
    assert_eq!(result.reasons.len(), 1);
    assert!(matches!(result.reasons[0], Mismatch::Digest { .. }));
}

#[test]
fn wrong_algorithm_is_flagged() {
    let request = test_request();
    let mut tst_info = matching_tst_info(&request);
    // Same byte length, different algorithm OID
    tst_info.message_imprint = MessageImprint::new(
        DigestAlgorithm::Sha512.into(),
        request.digest().to_vec(),
    )
    .unwrap();

    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    let result = response.validate_against(&request);

    assert!(!result.matched);
    assert!(matches!(result.reasons[0], Mismatch::Digest { .. }));
}

#[test]
fn policy_mismatch_is_flagged_only_when_requested() {
    let digest = digest(&SHA256, b"test").as_ref().to_vec();
    let requested_policy = ObjectIdentifier::new_unwrap("1.2.3.4.1");
    let request = RequestBuilder::new(DigestAlgorithm::Sha256, digest)
        .unwrap()
        .policy(requested_policy)
        .build()
        .unwrap();

    // TSA issued under a different policy
    let tst_info = matching_tst_info(&request);
    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    let result = response.validate_against(&request);
    assert!(!result.matched);
    assert!(matches!(result.reasons[0], Mismatch::Policy { .. }));

    // Same request without a policy accepts whatever the TSA used
    let request = test_request();
    let tst_info = matching_tst_info(&request);
    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    assert!(response.validate_against(&request).matched);
}

#[test]
fn rejection_short_circuits() {
    let request = test_request();

    let resp = TimeStampResp {
        status: PkiStatusInfo {
            status: 2,
            status_string: Some(vec!["policy not supported".to_string()]),
            fail_info: Some(BitString::from_bytes(&[0x00, 0x01]).unwrap()),
        },
        time_stamp_token: None,
    };
    let response = TimestampResponse::parse(&resp.to_der().unwrap()).unwrap();

    let result = response.validate_against(&request);
    assert!(!result.matched);
    assert_eq!(result.reasons.len(), 1, "no field checks may run");
    match &result.reasons[0] {
        Mismatch::Rejected {
            status,
            status_string,
            fail_info,
        } => {
            assert_eq!(*status, 2);
            assert_eq!(status_string.as_deref(), Some("policy not supported"));
            assert_eq!(fail_info, &vec![PkiFailureInfo::UnacceptedPolicy]);
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[test]
fn multiple_mismatches_are_all_reported() {
    let request = test_request();
    let mut tst_info = matching_tst_info(&request);
    tst_info.message_imprint =
        MessageImprint::new(DigestAlgorithm::Sha256.into(), vec![0u8; 32]).unwrap();
    tst_info.nonce = None;

    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    let result = response.validate_against(&request);

    assert!(!result.matched);
    assert_eq!(result.reasons.len(), 2);
    assert!(matches!(result.reasons[0], Mismatch::Digest { .. }));
    assert!(matches!(result.reasons[1], Mismatch::Nonce { .. }));
}

#[test]
fn exact_signed_bytes_are_preserved() {
    let request = test_request();
    let tst_info = matching_tst_info(&request);
    let tst_info_der = tst_info.to_der().unwrap();

    let response = TimestampResponse::parse(&granted_response(&tst_info)).unwrap();
    assert_eq!(response.tst_info_der(), Some(tst_info_der.as_slice()));
    assert_eq!(response.tst_info(), Some(&tst_info));
}
