//! Staple cache manager
//!
//! Entry point of the stapling engine. For one certificate it:
//!
//! 1. serializes with concurrent callers for the same storage key,
//! 2. serves a fresh staple from storage when there is one,
//! 3. otherwise fetches a new response from the certificate's responder,
//! 4. rejects responses that claim validity past the certificate's expiry,
//! 5. persists new Good responses for reuse.
//!
//! Corrupt storage entries are deleted; stale ones are left in place to be
//! overwritten by the next successful fetch.

use crate::certificate::{ManagedCertificate, StapleOutcome, StapleSource};
use crate::client::OcspClient;
use crate::config::StaplingConfig;
use crate::error::{FetchError, StapleError, TransportError};
use crate::locks::KeyedLocks;
use crate::storage::{ocsp_staple_key, Storage};
use crate::transport::{HttpTransport, ReqwestTransport};
use chrono::{DateTime, Duration, Utc};
use ocsp_proto::{is_fresh, OcspResponse};
use std::borrow::Cow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Certificates with less remaining lifetime than this do not report fetch
/// errors; they are often issued without a working responder.
const SHORT_LIVED_SECS: i64 = 7 * 24 * 60 * 60;

/// Keeps OCSP staples for certificates fresh
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct StapleManager {
    client: OcspClient,
    storage: Arc<dyn Storage>,
    locks: KeyedLocks,
}

impl std::fmt::Debug for StapleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StapleManager")
            .field("client", &self.client)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl StapleManager {
    /// Create a manager with an explicit transport and storage
    pub fn new(
        config: StaplingConfig,
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            client: OcspClient::new(Arc::new(config), transport),
            storage,
            locks: KeyedLocks::new(),
        }
    }

    /// Create a manager using a reqwest transport built from `config`
    pub fn from_config(
        config: StaplingConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::from_config(&config)?;
        Ok(Self::new(config, Arc::new(transport), storage))
    }

    pub fn config(&self) -> &StaplingConfig {
        self.client.config()
    }

    /// Make sure `cert` has a current OCSP response
    ///
    /// `pem_bundle` is the certificate's PEM chain as it was loaded; without it
    /// the DER chain is re-encoded. The returned outcome carries the parsed
    /// response whatever its status, and staple bytes only for Good responses.
    /// Apply it with [`ManagedCertificate::apply`].
    ///
    /// A `StapleError::Persist` still carries a usable outcome.
    pub async fn ensure_stapled(
        &self,
        cert: &ManagedCertificate,
        pem_bundle: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<StapleOutcome, StapleError> {
        if self.config().disable_stapling {
            return Ok(StapleOutcome::disabled());
        }

        let names = cert.names();
        let pem_bundle = match pem_bundle {
            Some(bundle) => Cow::Borrowed(bundle),
            None => Cow::Owned(cert.pem_bundle()),
        };
        let key = ocsp_staple_key(names, &pem_bundle);

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(StapleError::Cancelled { names: names.to_vec() });
            }
            guard = self.locks.lock(&key) => guard,
        };

        let now = Utc::now();

        let (response, source) = match self.load_cached(&key, now).await {
            Some(response) => (response, StapleSource::Cache),
            None => match self.client.fetch(&pem_bundle, cancel).await {
                Ok((_, response)) => (response, StapleSource::Responder),
                Err(FetchError::Cancelled) => {
                    return Err(StapleError::Cancelled {
                        names: names.to_vec(),
                    });
                }
                Err(source) => {
                    if cert.remaining_lifetime(now) < Duration::seconds(SHORT_LIVED_SECS) {
                        debug!(
                            names = ?names,
                            error = %source,
                            "Not stapling OCSP for short-lived certificate"
                        );
                        return Ok(StapleOutcome::skipped());
                    }
                    return Err(StapleError::Fetch {
                        names: names.to_vec(),
                        source,
                    });
                }
            },
        };

        // The response must not outlive the certificate
        let expires_at = cert.expires_at();
        if let Some(next_update) = response.next_update {
            if next_update > expires_at {
                return Err(StapleError::OutlivesCertificate {
                    names: names.to_vec(),
                    next_update,
                    expires_at,
                });
            }
        }

        let outcome = StapleOutcome::from_response(response, source);

        // Only new Good responses are worth keeping
        let stored = match (&outcome.staple, source) {
            (Some(staple), StapleSource::Responder) => self.storage.store(&key, staple).await,
            _ => Ok(()),
        };
        if let Err(e) = stored {
            return Err(StapleError::Persist {
                names: names.to_vec(),
                source: e,
                outcome: Box::new(outcome),
            });
        }

        if let Some(ref response) = outcome.response {
            info!(
                names = ?names,
                key = %key,
                source = ?source,
                status = ?response.cert_status,
                next_update = ?response.next_update,
                stapled = outcome.is_stapled(),
                "OCSP response ready"
            );
        }

        Ok(outcome)
    }

    /// Fresh cached response under `key`, if any
    ///
    /// Unparsable entries are deleted; stale entries are kept.
    async fn load_cached(&self, key: &str, now: DateTime<Utc>) -> Option<OcspResponse> {
        let bytes = match self.storage.load(key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                debug!(key = %key, error = %e, "Unable to load cached OCSP response");
                return None;
            }
        };

        match OcspResponse::parse(&bytes) {
            Ok(response) if is_fresh(&response, now) => Some(response),
            Ok(response) => {
                debug!(
                    key = %key,
                    this_update = %response.this_update,
                    next_update = ?response.next_update,
                    "Cached OCSP response is stale"
                );
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached OCSP response is invalid; deleting");
                if let Err(e) = self.storage.delete(key).await {
                    warn!(key = %key, error = %e, "Unable to delete invalid OCSP staple");
                }
                None
            }
        }
    }
}
