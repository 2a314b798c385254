//! OCSP request building (RFC 6960 Section 4.1)
//!
//! ```asn1
//! OCSPRequest ::= SEQUENCE {
//!     tbsRequest          TBSRequest,
//!     optionalSignature   [0] EXPLICIT Signature OPTIONAL
//! }
//!
//! TBSRequest ::= SEQUENCE {
//!     version             [0] EXPLICIT Version DEFAULT v1,
//!     requestorName       [1] EXPLICIT GeneralName OPTIONAL,
//!     requestList         SEQUENCE OF Request,
//!     requestExtensions   [2] EXPLICIT Extensions OPTIONAL
//! }
//!
//! Request ::= SEQUENCE {
//!     reqCert                     CertID,
//!     singleRequestExtensions     [0] EXPLICIT Extensions OPTIONAL
//! }
//!
//! CertID ::= SEQUENCE {
//!     hashAlgorithm       AlgorithmIdentifier,
//!     issuerNameHash      OCTET STRING,
//!     issuerKeyHash       OCTET STRING,
//!     serialNumber        CertificateSerialNumber
//! }
//! ```

use crate::der::{der_integer, der_null, der_octet_string, der_oid, der_sequence, integer_content};
use crate::error::OcspError;
use crate::verify::SubjectKey;
use sha1::{Digest, Sha1};
use x509_parser::prelude::*;

const OID_SHA1: &[u64] = &[1, 3, 14, 3, 2, 26];

/// OCSP request builder
///
/// Builds an unsigned OCSP request for a single certificate, with a SHA-1
/// CertID (RFC 5019) and no nonce. Stapled responses are shared by many
/// clients, so responders and caches in front of them must be free to answer
/// with a pre-produced response.
#[derive(Debug, Clone)]
pub struct OcspRequestBuilder {
    /// Certificate serial number, exactly as encoded in the CertID
    serial_number: Vec<u8>,
    /// DER of the issuer's subject name
    issuer_name: Vec<u8>,
    /// Issuer public key (BIT STRING value of the SPKI)
    issuer_key: Vec<u8>,
}

impl OcspRequestBuilder {
    /// Create a builder for `cert` issued by `issuer` (both DER-encoded)
    pub fn new(cert: &[u8], issuer: &[u8]) -> Result<Self, OcspError> {
        let (_, cert_parsed) = parse_x509_certificate(cert).map_err(|e| {
            OcspError::CertificateError(format!("Failed to parse certificate: {}", e))
        })?;

        let (_, issuer_parsed) = parse_x509_certificate(issuer).map_err(|e| {
            OcspError::CertificateError(format!("Failed to parse issuer certificate: {}", e))
        })?;

        let raw_serial = cert_parsed.raw_serial();
        if raw_serial.is_empty() {
            return Err(OcspError::CertificateError(
                "certificate has an empty serial number".to_string(),
            ));
        }

        let issuer_key = SubjectKey::from_spki(issuer_parsed.public_key().raw)?;

        Ok(Self {
            serial_number: integer_content(raw_serial),
            issuer_name: issuer_parsed.subject().as_raw().to_vec(),
            issuer_key: issuer_key.key.to_vec(),
        })
    }

    /// Query a different serial number than the certificate's own
    #[cfg(any(test, feature = "test-util"))]
    pub fn with_serial_number(mut self, serial_number: Vec<u8>) -> Self {
        self.serial_number = integer_content(&serial_number);
        self
    }

    /// Serial number being queried (INTEGER content octets as sent)
    ///
    /// Responses name the certificate with these same octets.
    pub fn serial_number(&self) -> &[u8] {
        &self.serial_number
    }

    /// Build the OCSP request as DER-encoded bytes
    pub fn build(&self) -> Result<Vec<u8>, OcspError> {
        // Request wraps CertID; no singleRequestExtensions
        let request = der_sequence(&self.cert_id_der());

        // version, requestorName and requestExtensions omitted
        let tbs = der_sequence(&request);

        // Unsigned request: no optionalSignature
        Ok(der_sequence(&der_sequence(&tbs)))
    }

    /// Encoded CertID identifying the certificate
    pub fn cert_id_der(&self) -> Vec<u8> {
        let mut hash_algo = der_oid(OID_SHA1);
        hash_algo.extend_from_slice(&der_null());

        let mut cert_id = der_sequence(&hash_algo);
        cert_id.extend_from_slice(&der_octet_string(&Sha1::digest(&self.issuer_name)));
        cert_id.extend_from_slice(&der_octet_string(&Sha1::digest(&self.issuer_key)));
        cert_id.extend_from_slice(&der_integer(&self.serial_number));

        der_sequence(&cert_id)
    }
}
