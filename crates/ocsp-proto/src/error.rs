//! OCSP protocol error types

use crate::response::OcspResponseStatus;

/// Errors that can occur while building, parsing or verifying OCSP messages
#[derive(Debug, thiserror::Error)]
pub enum OcspError {
    /// Malformed DER encoding
    #[error("DER decode error: {0}")]
    Der(String),

    /// Malformed PEM bundle
    #[error("PEM bundle error: {0}")]
    Pem(String),

    /// Certificate could not be parsed
    #[error("Certificate parsing error: {0}")]
    CertificateError(String),

    /// OCSP message structure is invalid
    #[error("OCSP parse error: {0}")]
    ParseError(String),

    /// Responder answered with a non-successful response status
    #[error("OCSP responder returned {0:?}")]
    Unsuccessful(OcspResponseStatus),

    /// No SingleResponse matched the requested certificate
    #[error("No SingleResponse for certificate serial {0}")]
    NoMatchingResponse(String),

    /// Signature check failed
    #[error("OCSP signature invalid: {0}")]
    InvalidSignature(String),

    /// Signature or key algorithm is not supported
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}
