//! OCSP Stapling Engine
//!
//! Keeps OCSP responses for a certificate inventory fresh so they can be
//! stapled into TLS handshakes.
//!
//! # Architecture
//!
//! - [`StapleManager`]: entry point; cache lookup, fetch, validation, persistence
//! - [`OcspClient`]: responder discovery, issuer download, request/response
//! - [`Storage`]: pluggable persistence ([`MemoryStorage`], [`FileStorage`])
//! - [`HttpTransport`]: pluggable HTTP egress ([`ReqwestTransport`])
//!
//! Protocol encoding, signature verification and the freshness policy live in
//! the `ocsp-proto` crate.
//!
//! # Example
//!
//! ```no_run
//! use ocsp_stapler::{FileStorage, ManagedCertificate, StapleManager, StaplingConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(FileStorage::new("/var/lib/ocsp-stapler")?);
//! let manager = StapleManager::from_config(StaplingConfig::default(), storage)?;
//!
//! let pem = std::fs::read("/etc/ssl/example.com.pem")?;
//! let mut cert = ManagedCertificate::from_pem(&pem)?;
//!
//! let outcome = manager
//!     .ensure_stapled(&cert, Some(&pem), &CancellationToken::new())
//!     .await?;
//! cert.apply(&outcome);
//! # Ok(())
//! # }
//! ```

pub mod certificate;
pub mod client;
pub mod config;
pub mod error;
pub mod locks;
pub mod manager;
pub mod storage;
pub mod transport;

pub use certificate::{ManagedCertificate, StapleOutcome, StapleSource};
pub use client::{fetch_ocsp, OcspClient};
pub use config::{ConfigError, StaplingConfig};
pub use error::{ErrorKind, FetchError, StapleError, StorageError, TransportError};
pub use locks::KeyedLocks;
pub use manager::StapleManager;
pub use storage::{ocsp_staple_key, FileStorage, MemoryStorage, Storage};
pub use transport::{HttpTransport, ReqwestTransport};
