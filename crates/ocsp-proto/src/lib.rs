//! OCSP Protocol Implementation
//!
//! This crate provides the protocol half of OCSP stapling as defined in
//! RFC 6960 and profiled by RFC 5019. It performs no I/O.
//!
//! # Features
//!
//! - PEM bundle parsing and encoding, leaf metadata extraction (AIA, SAN)
//! - OCSP request building (SHA-1 CertID, no nonce)
//! - OCSP response parsing with signature verification against the issuer or
//!   a delegated responder certificate
//! - Freshness evaluation (refresh at the midpoint of the validity window)
//!
//! # Example
//!
//! ```no_run
//! use ocsp_proto::{is_fresh, parse_pem_bundle, OcspRequestBuilder, OcspResponse};
//!
//! # fn example(bundle: &[u8], response_body: &[u8]) -> Result<(), ocsp_proto::OcspError> {
//! // Leaf first, issuer second
//! let chain = parse_pem_bundle(bundle)?;
//! let request = OcspRequestBuilder::new(&chain[0], &chain[1])?;
//! let _body = request.build()?;
//!
//! // POST the body to the responder, then:
//! let response =
//!     OcspResponse::parse_and_verify(response_body, &chain[1], Some(request.serial_number()))?;
//! if response.is_good() && is_fresh(&response, chrono::Utc::now()) {
//!     // staple response.raw_bytes
//! }
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod der;
pub mod error;
pub mod freshness;
pub mod request;
pub mod response;
pub mod verify;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use chain::{encode_pem_bundle, parse_certificate_bytes, parse_pem_bundle, CertificateInfo};
pub use error::OcspError;
pub use freshness::is_fresh;
pub use request::OcspRequestBuilder;
pub use response::{CertificateStatus, OcspResponse, OcspResponseStatus, ResponderCertificate};
pub use verify::verify_issued_by;
