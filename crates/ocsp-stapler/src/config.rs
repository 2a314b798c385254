//! Stapling configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// OCSP stapling configuration
///
/// Immutable once a [`StapleManager`](crate::StapleManager) has been built
/// from it.
///
/// # Example
///
/// ```json
/// {
///   "responder_overrides": {
///     "http://ocsp.int-x3.letsencrypt.org": "http://ocsp.internal.example/",
///     "http://ocsp.untrusted.example": ""
///   },
///   "http_proxy": "http://proxy.internal.example:3128",
///   "http_timeout_secs": 10
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaplingConfig {
    /// Turn stapling off entirely
    #[serde(default)]
    pub disable_stapling: bool,

    /// Responder URL replacements, matched exactly against the certificate's
    /// first OCSP URL. An empty replacement disables that responder.
    #[serde(default)]
    pub responder_overrides: HashMap<String, String>,

    /// Proxy URL applied to every outgoing request
    #[serde(default)]
    pub http_proxy: Option<String>,

    /// Timeout for each HTTP request in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Upper bound on issuer certificate and OCSP response bodies
    #[serde(default = "default_max_response_size_bytes")]
    pub max_response_size_bytes: usize,

    /// Directory for the file storage backend (CLI only)
    #[serde(default)]
    pub storage_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_response_size_bytes() -> usize {
    1024 * 1024
}

impl Default for StaplingConfig {
    fn default() -> Self {
        StaplingConfig {
            disable_stapling: false,
            responder_overrides: HashMap::new(),
            http_proxy: None,
            http_timeout_secs: default_http_timeout_secs(),
            max_response_size_bytes: default_max_response_size_bytes(),
            storage_dir: None,
            log_level: None,
        }
    }
}

impl StaplingConfig {
    /// Configuration with stapling turned off
    pub fn disabled() -> Self {
        StaplingConfig {
            disable_stapling: true,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: StaplingConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Per-request HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "http_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.max_response_size_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_response_size_bytes must be greater than 0".to_string(),
            ));
        }

        if let Some(ref proxy) = self.http_proxy {
            reqwest::Url::parse(proxy)
                .map_err(|e| ConfigError::Invalid(format!("Invalid http_proxy '{}': {}", proxy, e)))?;
        }

        for (original, replacement) in &self.responder_overrides {
            if original.is_empty() {
                return Err(ConfigError::Invalid(
                    "responder_overrides contains an empty responder URL".to_string(),
                ));
            }
            // Empty replacement disables the responder
            if !replacement.is_empty() {
                reqwest::Url::parse(replacement).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "Invalid override for '{}': '{}': {}",
                        original, replacement, e
                    ))
                })?;
            }
        }

        Ok(())
    }
}
