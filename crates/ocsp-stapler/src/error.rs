//! Error types for OCSP stapling

use crate::certificate::StapleOutcome;
use chrono::{DateTime, Utc};
use ocsp_proto::OcspError;
use thiserror::Error;

/// Coarse classification of a [`StapleError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The certificate names no responder, or its responder is disabled
    NoResponder,
    /// The issuer or responder could not be reached or gave an unusable answer
    Fetch,
    /// The response claims validity beyond the certificate's expiration
    Temporal,
    /// A staple was obtained but could not be written to storage
    Persist,
    /// The caller cancelled the operation
    Cancelled,
}

/// Errors returned by [`StapleManager::ensure_stapled`](crate::StapleManager::ensure_stapled)
///
/// Every variant carries the names of the certificate it concerns.
#[derive(Error, Debug)]
pub enum StapleError {
    #[error("no OCSP stapling for {names:?}: {source}")]
    Fetch {
        names: Vec<String>,
        #[source]
        source: FetchError,
    },

    #[error(
        "invalid OCSP response for {names:?}: next update {next_update} \
         is after certificate expiration {expires_at}"
    )]
    OutlivesCertificate {
        names: Vec<String>,
        next_update: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },

    /// The staple in `outcome` is valid and may still be served
    #[error("stapled OCSP response for {names:?} but could not store it: {source}")]
    Persist {
        names: Vec<String>,
        #[source]
        source: StorageError,
        outcome: Box<StapleOutcome>,
    },

    #[error("OCSP stapling for {names:?} cancelled")]
    Cancelled { names: Vec<String> },
}

impl StapleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StapleError::Fetch { source, .. } if source.is_no_responder() => {
                ErrorKind::NoResponder
            }
            StapleError::Fetch { .. } => ErrorKind::Fetch,
            StapleError::OutlivesCertificate { .. } => ErrorKind::Temporal,
            StapleError::Persist { .. } => ErrorKind::Persist,
            StapleError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Names of the certificate the error concerns
    pub fn names(&self) -> &[String] {
        match self {
            StapleError::Fetch { names, .. }
            | StapleError::OutlivesCertificate { names, .. }
            | StapleError::Persist { names, .. }
            | StapleError::Cancelled { names } => names,
        }
    }

    /// Outcome that is still usable despite the error
    pub fn outcome(&self) -> Option<&StapleOutcome> {
        match self {
            StapleError::Persist { outcome, .. } => Some(outcome.as_ref()),
            _ => None,
        }
    }
}

/// Errors obtaining an OCSP response from the network
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no OCSP server specified in certificate")]
    NoServerSpecified,

    #[error("OCSP responder {0} is disabled by configuration")]
    ResponderDisabled(String),

    #[error("invalid certificate bundle: {0}")]
    Bundle(#[source] OcspError),

    #[error("no URL to issuing certificate")]
    NoIssuerUrl,

    #[error("getting issuer certificate from {url}: {source}")]
    IssuerFetch {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("parsing issuer certificate from {url}: {source}")]
    IssuerParse {
        url: String,
        #[source]
        source: OcspError,
    },

    #[error("creating OCSP request: {0}")]
    BuildRequest(#[source] OcspError),

    #[error("making OCSP request to {url}: {source}")]
    Responder {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("parsing OCSP response from {url}: {source}")]
    Response {
        url: String,
        #[source]
        source: OcspError,
    },

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether stapling is impossible because there is no responder to ask
    pub fn is_no_responder(&self) -> bool {
        matches!(
            self,
            FetchError::NoServerSpecified | FetchError::ResponderDisabled(_)
        )
    }
}

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// HTTP egress errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}
