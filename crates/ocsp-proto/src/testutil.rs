//! Test PKI: an issuing CA, a leaf with AIA URLs, and signed OCSP responses
//!
//! Everything here panics on failure; it is only meant for tests.

use crate::chain::encode_pem_bundle;
use crate::der::{
    der_bit_string, der_enumerated, der_explicit_context, der_generalized_time,
    der_implicit_context, der_octet_string, der_oid, der_sequence,
};
use crate::request::OcspRequestBuilder;
use crate::response::CertificateStatus;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair as _, ECDSA_P256_SHA256_ASN1_SIGNING};
use sha1::{Digest, Sha1};
use x509_parser::prelude::*;

const OID_AUTHORITY_INFO_ACCESS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 1];
const OID_AD_OCSP: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1];
const OID_AD_CA_ISSUERS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 2];
const OID_OCSP_BASIC: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1, 1];
const OID_ECDSA_SHA256: &[u64] = &[1, 2, 840, 10045, 4, 3, 2];

/// Default responder URL placed in test leaves
pub const DEFAULT_OCSP_URL: &str = "http://ocsp.example.test/";

/// Default issuing-certificate URL placed in test leaves
pub const DEFAULT_ISSUER_URL: &str = "http://ca.example.test/issuer.der";

/// Current time without sub-second precision, matching what DER times carry
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn to_offset(instant: DateTime<Utc>) -> ::time::OffsetDateTime {
    ::time::OffsetDateTime::from_unix_timestamp(instant.timestamp())
        .expect("timestamp within OffsetDateTime range")
}

fn generate_key() -> KeyPair {
    KeyPair::generate().expect("generate P-256 key")
}

/// Builder for [`TestPki`]
#[derive(Debug, Clone)]
pub struct TestPkiBuilder {
    names: Vec<String>,
    ocsp_urls: Vec<String>,
    issuer_urls: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl TestPkiBuilder {
    /// Hostnames placed in the leaf's SAN (the first also becomes the CN)
    pub fn names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|name| name.to_string()).collect();
        self
    }

    /// Replace the responder URL
    pub fn ocsp_url(mut self, url: &str) -> Self {
        self.ocsp_urls = vec![url.to_string()];
        self
    }

    /// Add another responder URL after the existing ones
    pub fn add_ocsp_url(mut self, url: &str) -> Self {
        self.ocsp_urls.push(url.to_string());
        self
    }

    /// Leaf without any OCSP responder URL
    pub fn no_ocsp_url(mut self) -> Self {
        self.ocsp_urls.clear();
        self
    }

    /// Replace the issuing-certificate URL
    pub fn issuer_url(mut self, url: &str) -> Self {
        self.issuer_urls = vec![url.to_string()];
        self
    }

    /// Leaf without any issuing-certificate URL
    pub fn no_issuer_url(mut self) -> Self {
        self.issuer_urls.clear();
        self
    }

    /// Leaf validity period
    pub fn validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Generate the CA and leaf
    pub fn build(self) -> TestPki {
        let ca_key = generate_key();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name = DistinguishedName::new();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Test Issuing CA");
        ca_params.not_before = to_offset(now() - Duration::days(365));
        ca_params.not_after = to_offset(now() + Duration::days(3650));
        let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign CA");

        let leaf_key = generate_key();
        let mut leaf_params = CertificateParams::new(self.names.clone()).expect("leaf params");
        leaf_params.distinguished_name = DistinguishedName::new();
        if let Some(first) = self.names.first() {
            leaf_params
                .distinguished_name
                .push(DnType::CommonName, first.as_str());
        }
        leaf_params.not_before = to_offset(self.not_before);
        leaf_params.not_after = to_offset(self.not_after);
        if let Some(aia) = self.authority_info_access() {
            leaf_params
                .custom_extensions
                .push(CustomExtension::from_oid_content(OID_AUTHORITY_INFO_ACCESS, aia));
        }
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .expect("sign leaf");

        TestPki {
            ca_der: ca_cert.der().to_vec(),
            leaf_der: leaf_cert.der().to_vec(),
            ca_cert,
            ca_key,
        }
    }

    /// AuthorityInfoAccessSyntax ::= SEQUENCE OF AccessDescription
    fn authority_info_access(&self) -> Option<Vec<u8>> {
        let descriptions = self
            .ocsp_urls
            .iter()
            .map(|url| (OID_AD_OCSP, url))
            .chain(self.issuer_urls.iter().map(|url| (OID_AD_CA_ISSUERS, url)))
            .map(|(method, url)| {
                // accessLocation is a GeneralName uniformResourceIdentifier [6]
                let mut description = der_oid(method);
                description.extend_from_slice(&der_implicit_context(6, url.as_bytes()));
                der_sequence(&description)
            })
            .collect::<Vec<_>>();

        if descriptions.is_empty() {
            None
        } else {
            Some(der_sequence(&descriptions.concat()))
        }
    }
}

/// An issuing CA and a leaf certificate it signed
pub struct TestPki {
    /// DER of the issuing CA
    pub ca_der: Vec<u8>,
    /// DER of the leaf
    pub leaf_der: Vec<u8>,
    ca_cert: Certificate,
    ca_key: KeyPair,
}

impl TestPki {
    /// Builder with a 90-day leaf for `example.test` carrying both AIA URLs
    pub fn builder() -> TestPkiBuilder {
        TestPkiBuilder {
            names: vec!["example.test".to_string()],
            ocsp_urls: vec![DEFAULT_OCSP_URL.to_string()],
            issuer_urls: vec![DEFAULT_ISSUER_URL.to_string()],
            not_before: now() - Duration::days(1),
            not_after: now() + Duration::days(90),
        }
    }

    /// Leaf followed by the CA
    pub fn bundle_pem(&self) -> Vec<u8> {
        encode_pem_bundle(&[self.leaf_der.as_slice(), self.ca_der.as_slice()])
    }

    /// Leaf only, so the issuer has to be downloaded
    pub fn leaf_pem(&self) -> Vec<u8> {
        encode_pem_bundle(&[self.leaf_der.as_slice()])
    }

    /// Serial number of the leaf (INTEGER content octets)
    pub fn leaf_serial(&self) -> Vec<u8> {
        let (_, leaf) = parse_x509_certificate(&self.leaf_der).expect("parse leaf");
        leaf.raw_serial().to_vec()
    }

    /// Start building an OCSP response for the leaf
    pub fn response(&self) -> ResponseBuilder<'_> {
        let this_update = now() - Duration::hours(1);
        ResponseBuilder {
            pki: self,
            status: CertificateStatus::Good,
            this_update,
            next_update: Some(this_update + Duration::days(7)),
            signer: Signer::Issuer,
            serial: None,
            response_status: 0,
        }
    }

    /// Issue an OCSP signing certificate, returning its DER and PKCS#8 key
    fn issue_responder(&self, not_after: DateTime<Utc>, signed_by_ca: bool) -> (Vec<u8>, Vec<u8>) {
        let key = generate_key();
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("responder params");
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, "Test OCSP Responder");
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::OcspSigning];
        params.not_before = to_offset(now() - Duration::days(1));
        params.not_after = to_offset(not_after);

        let cert = if signed_by_ca {
            params.signed_by(&key, &self.ca_cert, &self.ca_key)
        } else {
            params.self_signed(&key)
        }
        .expect("issue responder certificate");

        (cert.der().to_vec(), key.serialize_der())
    }
}

#[derive(Debug, Clone, Copy)]
enum Signer {
    Issuer,
    Delegated(DateTime<Utc>),
    UntrustedDelegate,
    WrongKey,
}

/// Builder for a DER-encoded OCSP response about a [`TestPki`] leaf
pub struct ResponseBuilder<'a> {
    pki: &'a TestPki,
    status: CertificateStatus,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    signer: Signer,
    serial: Option<Vec<u8>>,
    response_status: u8,
}

impl<'a> ResponseBuilder<'a> {
    pub fn good(mut self) -> Self {
        self.status = CertificateStatus::Good;
        self
    }

    pub fn revoked(mut self, revocation_time: DateTime<Utc>, reason: Option<u8>) -> Self {
        self.status = CertificateStatus::Revoked {
            revocation_time,
            reason,
        };
        self
    }

    pub fn unknown(mut self) -> Self {
        self.status = CertificateStatus::Unknown;
        self
    }

    pub fn this_update(mut self, this_update: DateTime<Utc>) -> Self {
        self.this_update = this_update;
        self
    }

    pub fn next_update(mut self, next_update: DateTime<Utc>) -> Self {
        self.next_update = Some(next_update);
        self
    }

    pub fn no_next_update(mut self) -> Self {
        self.next_update = None;
        self
    }

    /// Sign with a CA-issued responder certificate expiring at `not_after`
    pub fn delegated(mut self, not_after: DateTime<Utc>) -> Self {
        self.signer = Signer::Delegated(not_after);
        self
    }

    /// Sign with an embedded responder certificate the CA never issued
    pub fn untrusted_delegate(mut self) -> Self {
        self.signer = Signer::UntrustedDelegate;
        self
    }

    /// Sign with an unrelated key and embed no certificate
    pub fn wrong_key(mut self) -> Self {
        self.signer = Signer::WrongKey;
        self
    }

    /// Answer for a different serial number
    pub fn serial(mut self, serial: Vec<u8>) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Outer responseStatus; anything but 0 yields a body without responseBytes
    pub fn response_status(mut self, status: u8) -> Self {
        self.response_status = status;
        self
    }

    pub fn build(self) -> Vec<u8> {
        if self.response_status != 0 {
            return der_sequence(&der_enumerated(self.response_status));
        }

        let (signing_key, responder_der) = match self.signer {
            Signer::Issuer => (self.pki.ca_key.serialize_der(), None),
            Signer::Delegated(not_after) => {
                let (der, key) = self.pki.issue_responder(not_after, true);
                (key, Some(der))
            }
            Signer::UntrustedDelegate => {
                let (der, key) = self.pki.issue_responder(now() + Duration::days(30), false);
                (key, Some(der))
            }
            Signer::WrongKey => (generate_key().serialize_der(), None),
        };

        let rng = SystemRandom::new();
        let signer = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &signing_key, &rng)
            .expect("load signing key");

        let tbs = self.response_data(signer.public_key().as_ref());
        let signature = signer.sign(&rng, &tbs).expect("sign response");

        let signature_algorithm = der_sequence(&der_oid(OID_ECDSA_SHA256));

        let mut basic = tbs;
        basic.extend_from_slice(&signature_algorithm);
        basic.extend_from_slice(&der_bit_string(signature.as_ref()));
        if let Some(responder) = responder_der {
            basic.extend_from_slice(&der_explicit_context(0, &der_sequence(&responder)));
        }
        let basic = der_sequence(&basic);

        let mut response_bytes = der_oid(OID_OCSP_BASIC);
        response_bytes.extend_from_slice(&der_octet_string(&basic));

        let mut response = der_enumerated(0);
        response.extend_from_slice(&der_explicit_context(0, &der_sequence(&response_bytes)));
        der_sequence(&response)
    }

    /// Encoded tbsResponseData with a byKey responder ID
    fn response_data(&self, signer_public_key: &[u8]) -> Vec<u8> {
        let mut cert_id =
            OcspRequestBuilder::new(&self.pki.leaf_der, &self.pki.ca_der).expect("CertID");
        if let Some(serial) = &self.serial {
            cert_id = cert_id.with_serial_number(serial.clone());
        }

        let mut single = cert_id.cert_id_der();
        single.extend_from_slice(&match &self.status {
            CertificateStatus::Good => der_implicit_context(0, &[]),
            CertificateStatus::Revoked {
                revocation_time,
                reason,
            } => {
                let mut info = der_generalized_time(*revocation_time);
                if let Some(reason) = reason {
                    info.extend_from_slice(&der_explicit_context(0, &der_enumerated(*reason)));
                }
                der_explicit_context(1, &info)
            }
            CertificateStatus::Unknown => der_implicit_context(2, &[]),
        });
        single.extend_from_slice(&der_generalized_time(self.this_update));
        if let Some(next_update) = self.next_update {
            single.extend_from_slice(&der_explicit_context(0, &der_generalized_time(next_update)));
        }

        let key_hash = Sha1::digest(signer_public_key);

        let mut data = der_explicit_context(2, &der_octet_string(&key_hash));
        data.extend_from_slice(&der_generalized_time(self.this_update));
        data.extend_from_slice(&der_sequence(&der_sequence(&single)));
        der_sequence(&data)
    }
}
