//! Managed certificates and staple outcomes

use chrono::{DateTime, Duration, Utc};
use ocsp_proto::{encode_pem_bundle, parse_pem_bundle, CertificateInfo, OcspError, OcspResponse};

/// Where the response in a [`StapleOutcome`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StapleSource {
    /// Stapling is disabled by configuration
    Disabled,
    /// No response could be obtained and the error was not worth reporting
    Skipped,
    /// A fresh response was found in storage
    Cache,
    /// A new response was fetched from the responder
    Responder,
}

/// Result of a stapling attempt
///
/// Returned instead of mutating the certificate; the owner attaches it with
/// [`ManagedCertificate::apply`] under its own synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StapleOutcome {
    /// Parsed response, whatever its status
    pub response: Option<OcspResponse>,
    /// Bytes to staple into handshakes; only set when the status is Good
    pub staple: Option<Vec<u8>>,
    pub source: StapleSource,
}

impl StapleOutcome {
    /// Outcome of a no-op because stapling is disabled
    pub fn disabled() -> Self {
        Self {
            response: None,
            staple: None,
            source: StapleSource::Disabled,
        }
    }

    /// Outcome when no response could be obtained
    pub fn skipped() -> Self {
        Self {
            response: None,
            staple: None,
            source: StapleSource::Skipped,
        }
    }

    /// Outcome carrying `response`, stapled only if it reports Good
    pub fn from_response(response: OcspResponse, source: StapleSource) -> Self {
        let staple = response.is_good().then(|| response.raw_bytes.clone());
        Self {
            response: Some(response),
            staple,
            source,
        }
    }

    pub fn is_stapled(&self) -> bool {
        self.staple.is_some()
    }
}

/// A certificate whose OCSP staple is being maintained
#[derive(Debug, Clone)]
pub struct ManagedCertificate {
    /// DER chain, leaf first
    chain: Vec<Vec<u8>>,
    info: CertificateInfo,
    names: Vec<String>,
    ocsp: Option<OcspResponse>,
    staple: Option<Vec<u8>>,
}

impl ManagedCertificate {
    /// Build from a DER chain (leaf first)
    pub fn from_der_chain(chain: Vec<Vec<u8>>) -> Result<Self, OcspError> {
        let leaf = chain
            .first()
            .ok_or_else(|| OcspError::CertificateError("empty certificate chain".to_string()))?;
        let info = CertificateInfo::from_der(leaf)?;
        let names = info.names();

        Ok(Self {
            chain,
            info,
            names,
            ocsp: None,
            staple: None,
        })
    }

    /// Build from a PEM bundle (leaf first)
    pub fn from_pem(pem_bundle: &[u8]) -> Result<Self, OcspError> {
        Self::from_der_chain(parse_pem_bundle(pem_bundle)?)
    }

    /// Hostnames the certificate covers
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    pub fn leaf(&self) -> &[u8] {
        &self.chain[0]
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    /// The chain re-encoded as PEM
    pub fn pem_bundle(&self) -> Vec<u8> {
        encode_pem_bundle(&self.chain)
    }

    /// First instant at which the certificate is no longer valid
    ///
    /// `notAfter` is inclusive and has one-second resolution.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.info.not_after + Duration::seconds(1)
    }

    /// Time left until expiration (negative once expired)
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Duration {
        self.info.not_after - now
    }

    /// Attached OCSP response, whatever its status
    pub fn ocsp_response(&self) -> Option<&OcspResponse> {
        self.ocsp.as_ref()
    }

    /// Bytes to staple, present only for a Good response
    pub fn staple(&self) -> Option<&[u8]> {
        self.staple.as_deref()
    }

    /// Attach the result of a stapling attempt
    ///
    /// Outcomes without a response leave the certificate untouched.
    pub fn apply(&mut self, outcome: &StapleOutcome) {
        if let Some(ref response) = outcome.response {
            self.ocsp = Some(response.clone());
            self.staple = outcome.staple.clone();
        }
    }
}
