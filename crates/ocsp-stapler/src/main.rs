use clap::Parser;
use ocsp_stapler::storage::safe_key;
use ocsp_stapler::{
    ErrorKind, FileStorage, ManagedCertificate, MemoryStorage, StapleError, StapleManager,
    StapleOutcome, StaplingConfig, Storage,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// OCSP Stapler - fetch and cache OCSP staples for TLS certificates
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "ocsp-stapler")]
struct Cli {
    /// Path to JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for cached staples (overrides storage_dir from the config)
    #[arg(long, value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    /// Log level (overrides log_level from the config)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Write each staple to <DIR>/<name>.ocsp
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// PEM bundles, leaf certificate first
    #[arg(value_name = "CERT_PEM", required_unless_present = "validate")]
    certificates: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => match StaplingConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error in {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => StaplingConfig::default(),
    };

    if cli.validate {
        if let Err(e) = config.validate() {
            eprintln!("Configuration validation failed: {}", e);
            process::exit(1);
        }
        println!("Configuration validated successfully");
        println!("  Stapling: {}", if config.disable_stapling { "disabled" } else { "enabled" });
        println!("  HTTP timeout: {}s", config.http_timeout_secs);
        println!("  Max response size: {} bytes", config.max_response_size_bytes);
        println!("  Proxy: {}", config.http_proxy.as_deref().unwrap_or("(environment)"));
        println!("  Responder overrides: {}", config.responder_overrides.len());
        process::exit(0);
    }

    let log_level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("OCSP Stapler v{}", env!("CARGO_PKG_VERSION"));

    let storage_dir = cli
        .storage_dir
        .clone()
        .or_else(|| config.storage_dir.as_ref().map(PathBuf::from));
    let storage: Arc<dyn Storage> = match storage_dir {
        Some(dir) => match FileStorage::new(&dir) {
            Ok(storage) => {
                info!(dir = %dir.display(), "Using file storage");
                Arc::new(storage)
            }
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Unable to open storage directory");
                process::exit(1);
            }
        },
        None => {
            info!("No storage directory configured; staples will not outlive this run");
            Arc::new(MemoryStorage::new())
        }
    };

    let manager = match StapleManager::from_config(config, storage) {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            error!(error = %e, "Unable to create HTTP client");
            process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling outstanding requests");
                cancel.cancel();
            }
        });
    }

    let mut tasks = JoinSet::new();
    for path in cli.certificates {
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        let out_dir = cli.out_dir.clone();
        tasks.spawn(async move { staple_file(&manager, &path, out_dir.as_deref(), &cancel).await });
    }

    let mut failures = 0;
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(true) => {}
            Ok(false) => failures += 1,
            Err(e) => {
                error!(error = %e, "Stapling task failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        error!(failures, "Some certificates could not be stapled");
        process::exit(1);
    }
}

/// Staple one PEM file; returns false on a hard failure
async fn staple_file(
    manager: &StapleManager,
    path: &Path,
    out_dir: Option<&Path>,
    cancel: &CancellationToken,
) -> bool {
    let pem = match tokio::fs::read(path).await {
        Ok(pem) => pem,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Unable to read certificate");
            return false;
        }
    };

    let mut cert = match ManagedCertificate::from_pem(&pem) {
        Ok(cert) => cert,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Unable to parse certificate");
            return false;
        }
    };

    let (outcome, ok) = match manager.ensure_stapled(&cert, Some(&pem), cancel).await {
        Ok(outcome) => (outcome, true),
        Err(StapleError::Persist {
            names,
            source,
            outcome,
        }) => {
            error!(names = ?names, error = %source, "Unable to store OCSP staple");
            (*outcome, false)
        }
        Err(e) if e.kind() == ErrorKind::NoResponder => {
            warn!(path = %path.display(), error = %e, "Certificate has no usable OCSP responder");
            return true;
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "OCSP stapling failed");
            return false;
        }
    };

    cert.apply(&outcome);

    if let (Some(dir), Some(staple)) = (out_dir, cert.staple()) {
        return write_staple(dir, &cert, &outcome, staple).await && ok;
    }

    ok
}

async fn write_staple(
    dir: &Path,
    cert: &ManagedCertificate,
    outcome: &StapleOutcome,
    staple: &[u8],
) -> bool {
    let name = cert
        .names()
        .first()
        .map(|name| safe_key(name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "certificate".to_string());
    let path = dir.join(format!("{}.ocsp", name));

    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        error!(dir = %dir.display(), error = %e, "Unable to create output directory");
        return false;
    }

    match tokio::fs::write(&path, staple).await {
        Ok(()) => {
            info!(path = %path.display(), source = ?outcome.source, "Wrote OCSP staple");
            true
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Unable to write OCSP staple");
            false
        }
    }
}
