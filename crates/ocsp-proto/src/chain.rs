//! Certificate chain handling
//!
//! Converts between PEM bundles and ordered DER chains (leaf first) and
//! extracts the leaf metadata the stapling engine needs: validity, OCSP
//! responder URLs and issuing-certificate URLs from the Authority Information
//! Access extension, and the hostnames the certificate covers.

use crate::error::OcspError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

/// id-ad-ocsp (1.3.6.1.5.5.7.48.1)
const OID_AD_OCSP: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1];

/// id-ad-caIssuers (1.3.6.1.5.5.7.48.2)
const OID_AD_CA_ISSUERS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 2];

const PEM_LABEL: &str = "CERTIFICATE";

/// Parse a PEM bundle into DER certificates, preserving order
///
/// Every block must be a `CERTIFICATE` that parses as X.509, and the bundle
/// must contain at least one.
pub fn parse_pem_bundle(bundle: &[u8]) -> Result<Vec<Vec<u8>>, OcspError> {
    let mut chain = Vec::new();

    for (index, block) in Pem::iter_from_buffer(bundle).enumerate() {
        let pem = block.map_err(|e| OcspError::Pem(format!("block {}: {}", index, e)))?;

        if pem.label != PEM_LABEL {
            return Err(OcspError::Pem(format!(
                "block {} has type '{}', expected '{}'",
                index, pem.label, PEM_LABEL
            )));
        }

        parse_x509_certificate(&pem.contents).map_err(|e| {
            OcspError::CertificateError(format!("block {}: {}", index, e))
        })?;

        chain.push(pem.contents);
    }

    if chain.is_empty() {
        return Err(OcspError::Pem("no certificates found in bundle".to_string()));
    }

    Ok(chain)
}

/// Encode a DER chain as a PEM bundle
pub fn encode_pem_bundle<C: AsRef<[u8]>>(chain: &[C]) -> Vec<u8> {
    let mut bundle = String::new();

    for der in chain {
        let encoded = STANDARD.encode(der.as_ref());
        bundle.push_str("-----BEGIN CERTIFICATE-----\n");
        for line in encoded.as_bytes().chunks(64) {
            // base64 output is ASCII
            bundle.push_str(&String::from_utf8_lossy(line));
            bundle.push('\n');
        }
        bundle.push_str("-----END CERTIFICATE-----\n");
    }

    bundle.into_bytes()
}

/// Parse a single certificate delivered either as DER or as PEM
///
/// Issuer downloads are specified as DER, but some CAs serve PEM.
pub fn parse_certificate_bytes(bytes: &[u8]) -> Result<Vec<u8>, OcspError> {
    if bytes.starts_with(b"-----BEGIN") {
        let mut chain = parse_pem_bundle(bytes)?;
        return Ok(chain.swap_remove(0));
    }

    let (rest, _) = parse_x509_certificate(bytes)
        .map_err(|e| OcspError::CertificateError(e.to_string()))?;
    if !rest.is_empty() {
        return Err(OcspError::CertificateError(format!(
            "{} bytes of trailing data after certificate",
            rest.len()
        )));
    }

    Ok(bytes.to_vec())
}

/// Leaf certificate metadata used by the stapling engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Serial number (DER INTEGER content octets)
    pub serial: Vec<u8>,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// OCSP responder URLs from the AIA extension, in certificate order
    pub ocsp_servers: Vec<String>,
    /// Issuing-certificate (caIssuers) URLs from the AIA extension
    pub issuing_certificate_urls: Vec<String>,
    /// DNS names from the subject alternative name extension
    pub dns_names: Vec<String>,
    /// Subject common name
    pub common_name: Option<String>,
}

impl CertificateInfo {
    /// Extract metadata from a DER certificate
    pub fn from_der(der: &[u8]) -> Result<Self, OcspError> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| OcspError::CertificateError(e.to_string()))?;

        let validity = cert.validity();
        let not_before = timestamp_to_utc(validity.not_before.timestamp())?;
        let not_after = timestamp_to_utc(validity.not_after.timestamp())?;

        let mut ocsp_servers = Vec::new();
        let mut issuing_certificate_urls = Vec::new();

        for ext in cert.extensions() {
            if let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() {
                for desc in &aia.accessdescs {
                    let GeneralName::URI(uri) = &desc.access_location else {
                        continue;
                    };
                    let method = desc.access_method.as_bytes();
                    if method == crate::der::oid_content(OID_AD_OCSP).as_slice() {
                        ocsp_servers.push(uri.to_string());
                    } else if method == crate::der::oid_content(OID_AD_CA_ISSUERS).as_slice() {
                        issuing_certificate_urls.push(uri.to_string());
                    }
                }
            }
        }

        let mut dns_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    dns_names.push(dns.to_string());
                }
            }
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        Ok(Self {
            serial: cert.raw_serial().to_vec(),
            not_before,
            not_after,
            ocsp_servers,
            issuing_certificate_urls,
            dns_names,
            common_name,
        })
    }

    /// Names the certificate is known by: SAN DNS names, else the common name
    pub fn names(&self) -> Vec<String> {
        if !self.dns_names.is_empty() {
            return self.dns_names.clone();
        }
        self.common_name.iter().cloned().collect()
    }

    /// Serial number as lowercase hex, for diagnostics
    pub fn serial_hex(&self) -> String {
        hex_string(&self.serial)
    }
}

pub(crate) fn timestamp_to_utc(timestamp: i64) -> Result<DateTime<Utc>, OcspError> {
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        OcspError::CertificateError(format!("timestamp {} out of range", timestamp))
    })
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
