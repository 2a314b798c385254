//! Signature verification for OCSP responses and responder certificates
//!
//! A response is trusted when it is signed either directly by the issuer of
//! the certificate in question, or by a responder certificate embedded in the
//! response which itself carries a valid signature from that issuer.

use crate::der::{oid_content, read_single, tag, Element};
use crate::error::OcspError;
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use x509_parser::prelude::*;

const OID_EC_PUBLIC_KEY: &[u64] = &[1, 2, 840, 10045, 2, 1];
const OID_CURVE_P256: &[u64] = &[1, 2, 840, 10045, 3, 1, 7];
const OID_CURVE_P384: &[u64] = &[1, 3, 132, 0, 34];
const OID_RSA_ENCRYPTION: &[u64] = &[1, 2, 840, 113549, 1, 1, 1];
const OID_ED25519: &[u64] = &[1, 3, 101, 112];

const OID_ECDSA_SHA256: &[u64] = &[1, 2, 840, 10045, 4, 3, 2];
const OID_ECDSA_SHA384: &[u64] = &[1, 2, 840, 10045, 4, 3, 3];
const OID_RSA_SHA1: &[u64] = &[1, 2, 840, 113549, 1, 1, 5];
const OID_RSA_SHA256: &[u64] = &[1, 2, 840, 113549, 1, 1, 11];
const OID_RSA_SHA384: &[u64] = &[1, 2, 840, 113549, 1, 1, 12];
const OID_RSA_SHA512: &[u64] = &[1, 2, 840, 113549, 1, 1, 13];

/// Public key algorithm of a SubjectPublicKeyInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAlgorithm {
    EcdsaP256,
    EcdsaP384,
    Rsa,
    Ed25519,
    Unsupported,
}

/// A decoded SubjectPublicKeyInfo
///
/// ```asn1
/// SubjectPublicKeyInfo ::= SEQUENCE {
///     algorithm           AlgorithmIdentifier,
///     subjectPublicKey    BIT STRING
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubjectKey<'a> {
    algorithm: KeyAlgorithm,
    /// Content of the subjectPublicKey BIT STRING
    pub(crate) key: &'a [u8],
}

impl<'a> SubjectKey<'a> {
    pub(crate) fn from_spki(spki: &'a [u8]) -> Result<Self, OcspError> {
        let fields = read_single(spki)?
            .expect(tag::SEQUENCE, "SubjectPublicKeyInfo")?
            .children()?;
        if fields.len() != 2 {
            return Err(OcspError::ParseError(format!(
                "SubjectPublicKeyInfo has {} fields",
                fields.len()
            )));
        }

        let algorithm_id = fields[0]
            .expect(tag::SEQUENCE, "AlgorithmIdentifier")?
            .children()?;
        let algorithm = match algorithm_id.as_slice() {
            [oid, ..] if oid.is_oid(OID_RSA_ENCRYPTION) => KeyAlgorithm::Rsa,
            [oid] if oid.is_oid(OID_ED25519) => KeyAlgorithm::Ed25519,
            [oid, curve] if oid.is_oid(OID_EC_PUBLIC_KEY) => {
                if curve.is_oid(OID_CURVE_P256) {
                    KeyAlgorithm::EcdsaP256
                } else if curve.is_oid(OID_CURVE_P384) {
                    KeyAlgorithm::EcdsaP384
                } else {
                    KeyAlgorithm::Unsupported
                }
            }
            _ => KeyAlgorithm::Unsupported,
        };

        Ok(Self {
            algorithm,
            key: fields[1].bit_string_bytes()?,
        })
    }

    /// Verify `signature` over `message` using the given signature algorithm
    fn verify(
        &self,
        signature_algorithm: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), OcspError> {
        let algorithm = verification_algorithm(self.algorithm, signature_algorithm)?;
        UnparsedPublicKey::new(algorithm, self.key)
            .verify(message, signature)
            .map_err(|_| OcspError::InvalidSignature("signature does not verify".to_string()))
    }
}

/// Map a (key algorithm, signature algorithm) pair to a ring verifier
fn verification_algorithm(
    key: KeyAlgorithm,
    signature_algorithm: &[u8],
) -> Result<&'static dyn VerificationAlgorithm, OcspError> {
    let is = |oid: &[u64]| signature_algorithm == oid_content(oid).as_slice();

    let algorithm: &'static dyn VerificationAlgorithm = match key {
        KeyAlgorithm::EcdsaP256 if is(OID_ECDSA_SHA256) => &signature::ECDSA_P256_SHA256_ASN1,
        KeyAlgorithm::EcdsaP256 if is(OID_ECDSA_SHA384) => &signature::ECDSA_P256_SHA384_ASN1,
        KeyAlgorithm::EcdsaP384 if is(OID_ECDSA_SHA256) => &signature::ECDSA_P384_SHA256_ASN1,
        KeyAlgorithm::EcdsaP384 if is(OID_ECDSA_SHA384) => &signature::ECDSA_P384_SHA384_ASN1,
        KeyAlgorithm::Rsa if is(OID_RSA_SHA256) => &signature::RSA_PKCS1_2048_8192_SHA256,
        KeyAlgorithm::Rsa if is(OID_RSA_SHA384) => &signature::RSA_PKCS1_2048_8192_SHA384,
        KeyAlgorithm::Rsa if is(OID_RSA_SHA512) => &signature::RSA_PKCS1_2048_8192_SHA512,
        // Still produced by a number of public responders
        KeyAlgorithm::Rsa if is(OID_RSA_SHA1) => {
            &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY
        }
        KeyAlgorithm::Ed25519 if is(OID_ED25519) => &signature::ED25519,
        _ => {
            return Err(OcspError::UnsupportedAlgorithm(format!(
                "{:?} key with signature algorithm {}",
                key,
                crate::chain::hex_string(signature_algorithm)
            )))
        }
    };

    Ok(algorithm)
}

/// The three parts of a signed ASN.1 structure
///
/// Both certificates and BasicOCSPResponse are shaped
/// `SEQUENCE { tbs, AlgorithmIdentifier, BIT STRING, ... }`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SignedData<'a> {
    /// Raw encoding of the signed portion
    pub(crate) data: &'a [u8],
    /// Content octets of the signature algorithm OID
    pub(crate) algorithm: &'a [u8],
    /// Signature value
    pub(crate) signature: &'a [u8],
}

impl<'a> SignedData<'a> {
    /// Build from the leading `tbs, algorithm, signature` elements
    pub(crate) fn from_elements(
        tbs: &Element<'a>,
        algorithm: &Element<'a>,
        signature: &Element<'a>,
    ) -> Result<Self, OcspError> {
        let algorithm_id = algorithm
            .expect(tag::SEQUENCE, "signature AlgorithmIdentifier")?
            .children()?;
        let oid = algorithm_id
            .first()
            .ok_or_else(|| OcspError::ParseError("empty AlgorithmIdentifier".to_string()))?
            .expect(tag::OID, "signature algorithm")?;

        Ok(Self {
            data: tbs.raw,
            algorithm: oid.contents,
            signature: signature.bit_string_bytes()?,
        })
    }

    /// Decode the signed parts of a DER certificate
    pub(crate) fn from_certificate(der: &'a [u8]) -> Result<Self, OcspError> {
        let fields = read_single(der)?
            .expect(tag::SEQUENCE, "Certificate")?
            .children()?;
        match fields.as_slice() {
            [tbs, algorithm, signature] => Self::from_elements(tbs, algorithm, signature),
            _ => Err(OcspError::CertificateError(format!(
                "Certificate has {} fields",
                fields.len()
            ))),
        }
    }

    /// Check this signature against the key of `signer` (a DER certificate)
    pub(crate) fn verify_with(&self, signer: &[u8]) -> Result<(), OcspError> {
        let (_, signer_cert) = parse_x509_certificate(signer).map_err(|e| {
            OcspError::CertificateError(format!("Failed to parse signer certificate: {}", e))
        })?;

        SubjectKey::from_spki(signer_cert.public_key().raw)?.verify(
            self.algorithm,
            self.data,
            self.signature,
        )
    }
}

/// Verify that `cert` carries a valid signature from `issuer`
pub fn verify_issued_by(cert: &[u8], issuer: &[u8]) -> Result<(), OcspError> {
    SignedData::from_certificate(cert)?.verify_with(issuer)
}
