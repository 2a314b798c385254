//! OCSP response parsing (RFC 6960 Section 4.2)
//!
//! ```asn1
//! OCSPResponse ::= SEQUENCE {
//!     responseStatus      OCSPResponseStatus,
//!     responseBytes       [0] EXPLICIT ResponseBytes OPTIONAL
//! }
//!
//! ResponseBytes ::= SEQUENCE {
//!     responseType        OBJECT IDENTIFIER,
//!     response            OCTET STRING
//! }
//!
//! BasicOCSPResponse ::= SEQUENCE {
//!     tbsResponseData     ResponseData,
//!     signatureAlgorithm  AlgorithmIdentifier,
//!     signature           BIT STRING,
//!     certs               [0] EXPLICIT SEQUENCE OF Certificate OPTIONAL
//! }
//!
//! ResponseData ::= SEQUENCE {
//!     version             [0] EXPLICIT Version DEFAULT v1,
//!     responderID         ResponderID,
//!     producedAt          GeneralizedTime,
//!     responses           SEQUENCE OF SingleResponse,
//!     responseExtensions  [1] EXPLICIT Extensions OPTIONAL
//! }
//!
//! SingleResponse ::= SEQUENCE {
//!     certID              CertID,
//!     certStatus          CertStatus,
//!     thisUpdate          GeneralizedTime,
//!     nextUpdate          [0] EXPLICIT GeneralizedTime OPTIONAL,
//!     singleExtensions    [1] EXPLICIT Extensions OPTIONAL
//! }
//! ```

use crate::chain::{hex_string, timestamp_to_utc};
use crate::der::{read_single, tag, Element};
use crate::error::OcspError;
use crate::verify::{verify_issued_by, SignedData};
use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

/// id-pkix-ocsp-basic (1.3.6.1.5.5.7.48.1.1)
const OID_OCSP_BASIC: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1, 1];

/// OCSP response status (RFC 6960 Section 2.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspResponseStatus {
    /// Response has valid confirmations
    Successful = 0,
    /// Illegal confirmation request
    MalformedRequest = 1,
    /// Internal error in issuer
    InternalError = 2,
    /// Try again later
    TryLater = 3,
    /// Must sign the request
    SigRequired = 5,
    /// Request unauthorized
    Unauthorized = 6,
}

impl OcspResponseStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Successful),
            1 => Some(Self::MalformedRequest),
            2 => Some(Self::InternalError),
            3 => Some(Self::TryLater),
            5 => Some(Self::SigRequired),
            6 => Some(Self::Unauthorized),
            _ => None,
        }
    }
}

/// Certificate status in OCSP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    /// Certificate is not revoked
    Good,
    /// Certificate has been revoked
    Revoked {
        /// Revocation time
        revocation_time: DateTime<Utc>,
        /// Revocation reason (if present)
        reason: Option<u8>,
    },
    /// Certificate status is unknown
    Unknown,
}

/// Delegated responder certificate embedded in a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderCertificate {
    /// DER encoding
    pub der: Vec<u8>,
    /// End of the responder certificate's validity
    pub not_after: DateTime<Utc>,
}

/// Parsed and signature-checked OCSP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspResponse {
    /// Status of the certificate in question
    pub cert_status: CertificateStatus,
    /// When the responder signed this response
    pub produced_at: DateTime<Utc>,
    /// Time at which the status is known to be correct
    pub this_update: DateTime<Utc>,
    /// Time at or before which newer information will be available
    pub next_update: Option<DateTime<Utc>>,
    /// Responder certificate, when the response was signed by a delegate
    pub responder_certificate: Option<ResponderCertificate>,
    /// Serial number the selected SingleResponse refers to
    pub serial: Vec<u8>,
    /// Raw DER bytes, as stapled to handshakes
    pub raw_bytes: Vec<u8>,
}

impl OcspResponse {
    /// Parse a response without knowledge of the issuer
    ///
    /// The signature is checked against an embedded responder certificate when
    /// one is present; otherwise it is not checked at all. The first
    /// SingleResponse is used. Stapled bytes loaded from storage are parsed
    /// this way.
    pub fn parse(der_bytes: &[u8]) -> Result<Self, OcspError> {
        Self::decode(der_bytes, None, None)
    }

    /// Parse a response and verify it was issued for `serial` by `issuer`
    ///
    /// When `serial` is `None` the first SingleResponse is used.
    pub fn parse_and_verify(
        der_bytes: &[u8],
        issuer: &[u8],
        serial: Option<&[u8]>,
    ) -> Result<Self, OcspError> {
        Self::decode(der_bytes, Some(issuer), serial)
    }

    fn decode(
        der_bytes: &[u8],
        issuer: Option<&[u8]>,
        serial: Option<&[u8]>,
    ) -> Result<Self, OcspError> {
        let basic = unwrap_basic_response(der_bytes)?;

        let basic_fields = read_single(basic)?
            .expect(tag::SEQUENCE, "BasicOCSPResponse")?
            .children()?;
        if basic_fields.len() < 3 {
            return Err(OcspError::ParseError(format!(
                "BasicOCSPResponse has {} fields, expected at least 3",
                basic_fields.len()
            )));
        }

        let signed =
            SignedData::from_elements(&basic_fields[0], &basic_fields[1], &basic_fields[2])?;

        let responder_certificate = match basic_fields.get(3) {
            Some(certs) if certs.is_context(0) => first_embedded_certificate(certs)?,
            _ => None,
        };

        match (&responder_certificate, issuer) {
            (Some(responder), issuer) => {
                signed.verify_with(&responder.der).map_err(|e| {
                    OcspError::InvalidSignature(format!(
                        "bad signature on embedded responder certificate: {}",
                        e
                    ))
                })?;
                // An issuer may embed its own certificate
                if let Some(issuer) = issuer.filter(|issuer| *issuer != responder.der.as_slice()) {
                    verify_issued_by(&responder.der, issuer).map_err(|e| {
                        OcspError::InvalidSignature(format!(
                            "responder certificate not issued by issuer: {}",
                            e
                        ))
                    })?;
                }
            }
            (None, Some(issuer)) => signed.verify_with(issuer)?,
            (None, None) => {}
        }

        let data = ResponseData::parse(&basic_fields[0])?;

        let single = match serial {
            Some(serial) => data
                .responses
                .into_iter()
                .find(|single| single.serial == serial)
                .ok_or_else(|| OcspError::NoMatchingResponse(hex_string(serial)))?,
            None => data
                .responses
                .into_iter()
                .next()
                .ok_or_else(|| OcspError::ParseError("no SingleResponse".to_string()))?,
        };

        Ok(Self {
            cert_status: single.cert_status,
            produced_at: data.produced_at,
            this_update: single.this_update,
            next_update: single.next_update,
            responder_certificate,
            serial: single.serial,
            raw_bytes: der_bytes.to_vec(),
        })
    }

    /// Whether the certificate is reported good
    pub fn is_good(&self) -> bool {
        self.cert_status == CertificateStatus::Good
    }

    /// Check if the certificate is revoked according to this response
    pub fn is_revoked(&self) -> bool {
        matches!(self.cert_status, CertificateStatus::Revoked { .. })
    }
}

/// Strip the OCSPResponse envelope, returning the BasicOCSPResponse DER
fn unwrap_basic_response(der_bytes: &[u8]) -> Result<&[u8], OcspError> {
    let outer = read_single(der_bytes)?
        .expect(tag::SEQUENCE, "OCSPResponse")?
        .children()?;

    let status_element = outer
        .first()
        .ok_or_else(|| OcspError::ParseError("OCSPResponse is empty".to_string()))?
        .expect(tag::ENUMERATED, "responseStatus")?;
    let status_value = status_element.small_uint()?;
    let status = u8::try_from(status_value)
        .ok()
        .and_then(OcspResponseStatus::from_u8)
        .ok_or_else(|| {
            OcspError::ParseError(format!("Invalid OCSP response status: {}", status_value))
        })?;

    if status != OcspResponseStatus::Successful {
        return Err(OcspError::Unsuccessful(status));
    }

    let response_bytes = match outer.get(1) {
        Some(element) if element.is_context(0) => element.explicit_inner()?,
        _ => {
            return Err(OcspError::ParseError(
                "successful OCSPResponse without responseBytes".to_string(),
            ))
        }
    };

    let fields = response_bytes
        .expect(tag::SEQUENCE, "ResponseBytes")?
        .children()?;
    match fields.as_slice() {
        [response_type, response] => {
            if !response_type.is_oid(OID_OCSP_BASIC) {
                return Err(OcspError::ParseError(
                    "responseType is not id-pkix-ocsp-basic".to_string(),
                ));
            }
            Ok(response.expect(tag::OCTET_STRING, "response")?.contents)
        }
        _ => Err(OcspError::ParseError(format!(
            "ResponseBytes has {} fields",
            fields.len()
        ))),
    }
}

/// First certificate of the `certs [0] EXPLICIT SEQUENCE OF Certificate` field
fn first_embedded_certificate(
    certs: &Element<'_>,
) -> Result<Option<ResponderCertificate>, OcspError> {
    let list = certs
        .explicit_inner()?
        .expect(tag::SEQUENCE, "certs")?
        .children()?;

    let Some(first) = list.first() else {
        return Ok(None);
    };

    let (_, cert) = parse_x509_certificate(first.raw).map_err(|e| {
        OcspError::CertificateError(format!("Failed to parse responder certificate: {}", e))
    })?;

    Ok(Some(ResponderCertificate {
        der: first.raw.to_vec(),
        not_after: timestamp_to_utc(cert.validity().not_after.timestamp())?,
    }))
}

/// Decoded tbsResponseData
struct ResponseData {
    produced_at: DateTime<Utc>,
    responses: Vec<SingleResponse>,
}

impl ResponseData {
    fn parse(element: &Element<'_>) -> Result<Self, OcspError> {
        let mut fields = element
            .expect(tag::SEQUENCE, "ResponseData")?
            .children()?
            .into_iter()
            .peekable();

        // Optional version [0]
        if fields.peek().is_some_and(|field| field.is_context(0)) {
            fields.next();
        }

        // responderID: byName [1] or byKey [2]
        match fields.next() {
            Some(field) if field.is_context(1) || field.is_context(2) => {}
            _ => {
                return Err(OcspError::ParseError(
                    "ResponseData is missing responderID".to_string(),
                ))
            }
        }

        let produced_at = fields
            .next()
            .ok_or_else(|| OcspError::ParseError("missing producedAt".to_string()))?
            .generalized_time()?;

        let responses = fields
            .next()
            .ok_or_else(|| OcspError::ParseError("missing responses".to_string()))?
            .expect(tag::SEQUENCE, "responses")?
            .children()?
            .iter()
            .map(SingleResponse::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            produced_at,
            responses,
        })
    }
}

/// Decoded SingleResponse
struct SingleResponse {
    serial: Vec<u8>,
    cert_status: CertificateStatus,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
}

impl SingleResponse {
    fn parse(element: &Element<'_>) -> Result<Self, OcspError> {
        let fields = element.expect(tag::SEQUENCE, "SingleResponse")?.children()?;
        if fields.len() < 3 {
            return Err(OcspError::ParseError(format!(
                "SingleResponse has {} fields",
                fields.len()
            )));
        }

        // CertID: hashAlgorithm, issuerNameHash, issuerKeyHash, serialNumber
        let cert_id = fields[0].expect(tag::SEQUENCE, "CertID")?.children()?;
        let serial = cert_id
            .get(3)
            .ok_or_else(|| OcspError::ParseError("CertID is missing serialNumber".to_string()))?
            .expect(tag::INTEGER, "serialNumber")?
            .contents
            .to_vec();

        let cert_status = parse_cert_status(&fields[1])?;
        let this_update = fields[2].generalized_time()?;

        let next_update = match fields.get(3) {
            Some(field) if field.is_context(0) => Some(field.explicit_inner()?.generalized_time()?),
            _ => None,
        };

        Ok(Self {
            serial,
            cert_status,
            this_update,
            next_update,
        })
    }
}

/// Parse CertStatus
///
/// ```asn1
/// CertStatus ::= CHOICE {
///     good        [0] IMPLICIT NULL,
///     revoked     [1] IMPLICIT RevokedInfo,
///     unknown     [2] IMPLICIT UnknownInfo
/// }
///
/// RevokedInfo ::= SEQUENCE {
///     revocationTime  GeneralizedTime,
///     revocationReason [0] EXPLICIT CRLReason OPTIONAL
/// }
/// ```
fn parse_cert_status(element: &Element<'_>) -> Result<CertificateStatus, OcspError> {
    if element.is_context(0) {
        return Ok(CertificateStatus::Good);
    }
    if element.is_context(2) {
        return Ok(CertificateStatus::Unknown);
    }
    if !element.is_context(1) {
        return Err(OcspError::ParseError(format!(
            "Unknown CertStatus tag: {:?}/{}",
            element.class, element.tag
        )));
    }

    let revoked = element.children()?;
    let revocation_time = revoked
        .first()
        .ok_or_else(|| OcspError::ParseError("RevokedInfo is empty".to_string()))?
        .generalized_time()?;

    let reason = match revoked.get(1) {
        Some(field) if field.is_context(0) => {
            let value = field
                .explicit_inner()?
                .expect(tag::ENUMERATED, "CRLReason")?
                .small_uint()?;
            u8::try_from(value).ok()
        }
        _ => None,
    };

    Ok(CertificateStatus::Revoked {
        revocation_time,
        reason,
    })
}
