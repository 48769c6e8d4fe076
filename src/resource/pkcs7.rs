//! PKCS#7 (RFC 5652) signed-data used as a certificates-only bundle:
//! no content, no signer infos, just a certificate set. This is the
//! same degenerate form OpenSSL produces for `-certfile` bundles.

use crate::certificate::Certificate;
use crate::error::{Error, Result};

use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{EncapsulatedContentInfo, SignedData};
use der::asn1::{Any, ObjectIdentifier, SetOfVec};
use der::{Decode, Encode};
use x509_cert::Certificate as X509CertCertificate;

const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
const OID_DATA: &str = "1.2.840.113549.1.7.1";

/// Encode an end-entity certificate plus chain as a certs-only
/// PKCS#7 signed-data structure, DER-encoded.
pub fn encode(end_entity: Option<&Certificate>, chain: &[Certificate]) -> Result<Vec<u8>> {
    let mut certs = SetOfVec::new();
    if let Some(ee) = end_entity {
        let parsed = X509CertCertificate::from_der(ee.der())
            .map_err(|e| Error::invalid(format!("re-parsing end-entity cert failed: {e}")))?;
        certs
            .insert(CertificateChoices::Certificate(parsed))
            .map_err(|e| Error::invalid(format!("building certificate set failed: {e}")))?;
    }
    for ca in chain {
        let parsed = X509CertCertificate::from_der(ca.der())
            .map_err(|e| Error::invalid(format!("re-parsing chain cert failed: {e}")))?;
        certs
            .insert(CertificateChoices::Certificate(parsed))
            .map_err(|e| Error::invalid(format!("building certificate set failed: {e}")))?;
    }

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ObjectIdentifier::new_unwrap(OID_DATA),
            econtent: None,
        },
        certificates: Some(certs),
        crls: None,
        signer_infos: SetOfVec::new(),
    };

    let signed_data_der = signed_data
        .to_der()
        .map_err(|e| Error::invalid(format!("encoding PKCS#7 signed-data failed: {e}")))?;
    let content = Any::from_der(&signed_data_der)
        .map_err(|e| Error::invalid(format!("wrapping signed-data as ANY failed: {e}")))?;

    let content_info = ContentInfo {
        content_type: ObjectIdentifier::new_unwrap(OID_SIGNED_DATA),
        content,
    };
    content_info
        .to_der()
        .map_err(|e| Error::invalid(format!("encoding PKCS#7 content-info failed: {e}")))
}

/// Decode a certs-only PKCS#7 bundle back into an end-entity
/// certificate (first entry) plus the remaining chain, in the order
/// they appeared.
pub fn decode(der: &[u8]) -> Result<(Option<Certificate>, Vec<Certificate>)> {
    let content_info =
        ContentInfo::from_der(der).map_err(|e| Error::invalid(format!("malformed PKCS#7: {e}")))?;
    if content_info.content_type != ObjectIdentifier::new_unwrap(OID_SIGNED_DATA) {
        return Err(Error::invalid("PKCS#7 content type is not signed-data"));
    }
    let signed_data: SignedData = content_info
        .content
        .decode_as()
        .map_err(|e| Error::invalid(format!("malformed PKCS#7 signed-data: {e}")))?;

    let mut out = Vec::new();
    if let Some(certs) = signed_data.certificates {
        for choice in certs.into_vec() {
            if let CertificateChoices::Certificate(c) = choice {
                let der = c
                    .to_der()
                    .map_err(|e| Error::invalid(format!("re-encoding bundled certificate failed: {e}")))?;
                out.push(Certificate::from_der(&der)?);
            }
        }
    }
    if out.is_empty() {
        return Ok((None, Vec::new()));
    }
    let end_entity = out.remove(0);
    Ok((Some(end_entity), out))
}
