//! Staple storage
//!
//! Staples are persisted through the [`Storage`] trait so they survive
//! restarts and can be shared between processes serving the same
//! certificates.
//!
//! # Implementations
//!
//! - [`MemoryStorage`]: in-process HashMap (tests, single short-lived process)
//! - [`FileStorage`]: one file per key below a root directory
//!
//! # Key Design
//!
//! ```text
//! ocsp/{safe first name}-{hex SHA-256 of PEM bundle, 16 bytes}
//!
//! Examples:
//! - ocsp/example.com-3f1c0a9b7d2e4f6a8b0c1d2e3f4a5b6c
//! - ocsp/wildcard_.example.com-9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d
//! ```

use crate::error::StorageError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Prefix of every staple key
pub const OCSP_PREFIX: &str = "ocsp";

/// Storage backend for staple bytes
///
/// Implementations must be safe to use from many tasks at once.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the value stored under `key`
    ///
    /// Returns `StorageError::NotFound` if there is none.
    async fn load(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    async fn store(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key
    ///
    /// Returns `Ok(())` regardless of whether the key existed.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Storage key for the staple of a certificate
///
/// Deterministic: the same names and bundle give the same key in every
/// process.
pub fn ocsp_staple_key(names: &[String], pem_bundle: &[u8]) -> String {
    let digest = Sha256::digest(pem_bundle);
    let hash: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();

    match names.first() {
        Some(first) => format!("{}/{}-{}", OCSP_PREFIX, safe_key(first), hash),
        None => format!("{}/{}", OCSP_PREFIX, hash),
    }
}

/// Make a string safe for use as a storage key component
///
/// Lowercases and trims, replaces a few meaningful characters and drops
/// everything outside `[a-z0-9_@.-]`. `..` is removed so the result can never
/// climb out of a directory.
pub fn safe_key(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let mut safe = String::with_capacity(lowered.len());

    let mut chars = lowered.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' if chars.peek() == Some(&'.') => {
                chars.next();
            }
            ' ' => safe.push('_'),
            '+' => safe.push_str("_plus_"),
            '*' => safe.push_str("wildcard_"),
            ':' => safe.push('-'),
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '.' | '-') => safe.push(c),
            _ => {}
        }
    }

    safe
}

/// In-memory storage
///
/// Uses `tokio::sync::RwLock` for concurrent access from multiple async tasks.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    store: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Whether `key` holds a value
    pub async fn contains(&self, key: &str) -> bool {
        self.store.read().await.contains_key(key)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let store = self.store.read().await;
        store
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut store = self.store.write().await;
        store.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut store = self.store.write().await;
        store.remove(key);
        Ok(())
    }
}

/// Filesystem storage
///
/// Each key maps to a file below the root directory; `/` in keys creates
/// subdirectories. Writes go to a temporary file that is renamed into place,
/// so readers never observe a partially written staple.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root_dir: PathBuf,
}

impl FileStorage {
    /// Create a file storage rooted at `root_dir`, creating it if needed
    pub fn new<P: AsRef<Path>>(root_dir: P) -> io::Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();

        if !root_dir.exists() {
            std::fs::create_dir_all(&root_dir)?;
        }

        Ok(Self { root_dir })
    }

    /// Root directory of this storage
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Full filesystem path for `key`
    fn full_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !well_formed {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.root_dir.join(relative))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.full_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.full_path(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?
            .to_string_lossy()
            .into_owned();
        let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.full_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_safe_key() {
        assert_eq!(safe_key("Example.COM"), "example.com");
        assert_eq!(safe_key("  *.example.com "), "wildcard_.example.com");
        assert_eq!(safe_key("a+b c"), "a_plus_b_c");
        assert_eq!(safe_key("[::1]:443"), "--1-443");
        assert_eq!(safe_key("../../etc/passwd"), "etcpasswd");
        assert_eq!(safe_key("a...b"), "a.b");
        assert_eq!(safe_key("user@host.example"), "user@host.example");
        assert_eq!(safe_key("bücher.example"), "bcher.example");
    }

    #[test]
    fn test_staple_key_is_deterministic() {
        let names = vec!["www.Example.com".to_string(), "example.com".to_string()];
        let key = ocsp_staple_key(&names, b"bundle");

        assert_eq!(key, ocsp_staple_key(&names, b"bundle"));
        assert!(key.starts_with("ocsp/www.example.com-"));
        // 16 bytes of hex
        assert_eq!(key.len(), "ocsp/www.example.com-".len() + 32);

        assert_ne!(key, ocsp_staple_key(&names, b"other bundle"));
        assert_ne!(
            key,
            ocsp_staple_key(&["example.com".to_string()], b"bundle")
        );
    }

    #[test]
    fn test_staple_key_without_names() {
        let key = ocsp_staple_key(&[], b"bundle");
        assert_eq!(key.len(), "ocsp/".len() + 32);
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();

        assert!(storage.load("ocsp/a").await.unwrap_err().is_not_found());

        storage.store("ocsp/a", b"one").await.unwrap();
        storage.store("ocsp/a", b"two").await.unwrap();
        assert_eq!(storage.load("ocsp/a").await.unwrap(), b"two");
        assert_eq!(storage.len().await, 1);

        storage.delete("ocsp/a").await.unwrap();
        storage.delete("ocsp/a").await.unwrap();
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_storage_store_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path().join("certmagic")).unwrap();

        let key = "ocsp/example.com-0011";
        storage.store(key, b"staple").await.unwrap();
        assert_eq!(storage.load(key).await.unwrap(), b"staple");
        assert!(storage.root_dir().join("ocsp").is_dir());

        storage.store(key, b"newer staple").await.unwrap();
        assert_eq!(storage.load(key).await.unwrap(), b"newer staple");

        // No temporary files left behind
        let entries = std::fs::read_dir(storage.root_dir().join("ocsp"))
            .unwrap()
            .count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_file_storage_missing_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path()).unwrap();

        assert!(matches!(
            storage.load("ocsp/missing").await,
            Err(StorageError::NotFound(_))
        ));

        storage.store("ocsp/gone", b"x").await.unwrap();
        storage.delete("ocsp/gone").await.unwrap();
        storage.delete("ocsp/gone").await.unwrap();
        assert!(storage.load("ocsp/gone").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_file_storage_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path()).unwrap();

        for key in ["", "../outside", "/etc/passwd", "ocsp/../../x", "ocsp\\x"] {
            assert!(
                matches!(storage.store(key, b"x").await, Err(StorageError::InvalidKey(_))),
                "key {:?} accepted",
                key
            );
        }
    }
}
