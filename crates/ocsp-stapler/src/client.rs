//! OCSP protocol client
//!
//! Turns a PEM bundle into a verified OCSP response: finds the responder,
//! completes the chain by downloading the issuer when the bundle lacks it,
//! builds the request, POSTs it and verifies the answer against the issuer.
//! There are no retries; callers decide when to try again.

use crate::config::StaplingConfig;
use crate::error::FetchError;
use crate::transport::{HttpTransport, OCSP_REQUEST_CONTENT_TYPE};
use ocsp_proto::{
    parse_certificate_bytes, parse_pem_bundle, CertificateInfo, OcspRequestBuilder, OcspResponse,
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// OCSP client bound to a configuration and an HTTP transport
#[derive(Clone)]
pub struct OcspClient {
    config: Arc<StaplingConfig>,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for OcspClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcspClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OcspClient {
    pub fn new(config: Arc<StaplingConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &StaplingConfig {
        &self.config
    }

    /// Obtain a fresh OCSP response for the leaf of `pem_bundle`
    pub async fn fetch(
        &self,
        pem_bundle: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(Vec<u8>, OcspResponse), FetchError> {
        fetch_ocsp(&self.config, self.transport.as_ref(), pem_bundle, cancel).await
    }
}

/// Obtain a fresh OCSP response for the leaf (first certificate) of `pem_bundle`
///
/// Returns the raw response bytes together with the parsed response. The
/// response is verified against the issuer but its freshness and validity
/// period are left to the caller.
pub async fn fetch_ocsp(
    config: &StaplingConfig,
    transport: &dyn HttpTransport,
    pem_bundle: &[u8],
    cancel: &CancellationToken,
) -> Result<(Vec<u8>, OcspResponse), FetchError> {
    let mut chain = parse_pem_bundle(pem_bundle).map_err(FetchError::Bundle)?;
    let leaf = CertificateInfo::from_der(&chain[0]).map_err(FetchError::Bundle)?;

    let responder_url = responder_url(config, &leaf)?;

    if chain.len() == 1 {
        let issuer = download_issuer(config, transport, &leaf, cancel).await?;
        chain.push(issuer);
    }
    let issuer = &chain[1];

    let request = OcspRequestBuilder::new(&chain[0], issuer).map_err(FetchError::BuildRequest)?;
    let body = request.build().map_err(FetchError::BuildRequest)?;

    debug!(
        url = %responder_url,
        serial = %leaf.serial_hex(),
        "Requesting OCSP response"
    );

    let response_bytes = cancellable(
        cancel,
        transport.post(
            &responder_url,
            OCSP_REQUEST_CONTENT_TYPE,
            body,
            config.max_response_size_bytes,
        ),
    )
    .await?
    .map_err(|source| FetchError::Responder {
        url: responder_url.clone(),
        source,
    })?;

    let response =
        OcspResponse::parse_and_verify(&response_bytes, issuer, Some(request.serial_number()))
            .map_err(|source| FetchError::Response {
                url: responder_url.clone(),
                source,
            })?;

    debug!(
        url = %responder_url,
        status = ?response.cert_status,
        this_update = %response.this_update,
        next_update = ?response.next_update,
        "Received OCSP response"
    );

    Ok((response_bytes, response))
}

/// Responder to ask about `leaf`, after applying configured overrides
pub fn responder_url(config: &StaplingConfig, leaf: &CertificateInfo) -> Result<String, FetchError> {
    let original = leaf
        .ocsp_servers
        .first()
        .ok_or(FetchError::NoServerSpecified)?;

    match config.responder_overrides.get(original) {
        Some(replacement) if replacement.is_empty() => {
            Err(FetchError::ResponderDisabled(original.clone()))
        }
        Some(replacement) => Ok(replacement.clone()),
        None => Ok(original.clone()),
    }
}

/// Download the issuer of `leaf` from its first issuing-certificate URL
async fn download_issuer(
    config: &StaplingConfig,
    transport: &dyn HttpTransport,
    leaf: &CertificateInfo,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, FetchError> {
    let url = leaf
        .issuing_certificate_urls
        .first()
        .ok_or(FetchError::NoIssuerUrl)?;

    debug!(url = %url, "Chain incomplete, downloading issuer certificate");

    let bytes = cancellable(cancel, transport.get(url, config.max_response_size_bytes))
        .await?
        .map_err(|source| FetchError::IssuerFetch {
            url: url.clone(),
            source,
        })?;

    parse_certificate_bytes(&bytes).map_err(|source| FetchError::IssuerParse {
        url: url.clone(),
        source,
    })
}

/// Run `operation` unless `cancel` fires first
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    operation: F,
) -> Result<F::Output, FetchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        output = operation => Ok(output),
    }
}
