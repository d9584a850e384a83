//! Policy storage backends
//!
//! The policy store only needs a get/put/list key-value view of its
//! backend. Values are opaque serialized policies.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{TransitError, TransitResult};

/// Key-value backend for serialized policies
#[async_trait]
pub trait PolicyStorage: Send + Sync + 'static {
    /// Get the stored value for a policy name
    async fn get(&self, name: &str) -> TransitResult<Option<Vec<u8>>>;

    /// Store a value under a policy name, replacing any previous value
    async fn put(&self, name: &str, value: Vec<u8>) -> TransitResult<()>;

    /// List all stored policy names
    async fn list(&self) -> TransitResult<Vec<String>>;
}

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStorage for MemoryStorage {
    async fn get(&self, name: &str) -> TransitResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(name).cloned())
    }

    async fn put(&self, name: &str, value: Vec<u8>) -> TransitResult<()> {
        self.entries.write().insert(name.to_string(), value);
        Ok(())
    }

    async fn list(&self) -> TransitResult<Vec<String>> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// File storage: one JSON document per policy under a root directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    const EXTENSION: &'static str = "json";

    /// Open (creating if needed) a storage directory
    pub async fn open(root: impl AsRef<Path>) -> TransitResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        debug!(path = %root.display(), "Opened policy storage directory");
        Ok(Self { root })
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> TransitResult<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(TransitError::InvalidKeyName(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.{}", Self::EXTENSION)))
    }
}

#[async_trait]
impl PolicyStorage for FileStorage {
    async fn get(&self, name: &str) -> TransitResult<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, value: Vec<u8>) -> TransitResult<()> {
        let path = self.path_for(name)?;
        let tmp = path.with_extension(format!("{}.tmp", Self::EXTENSION));

        tokio::fs::write(&tmp, &value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list(&self) -> TransitResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(Self::EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert!(storage.get("a").await.unwrap().is_none());

        storage.put("b", b"two".to_vec()).await.unwrap();
        storage.put("a", b"one".to_vec()).await.unwrap();

        assert_eq!(storage.get("a").await.unwrap().unwrap(), b"one");
        assert_eq!(storage.list().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("policies")).await.unwrap();

        assert!(storage.get("orders").await.unwrap().is_none());
        storage.put("orders", b"{}".to_vec()).await.unwrap();
        storage.put("orders", b"{\"v\":2}".to_vec()).await.unwrap();

        assert_eq!(storage.get("orders").await.unwrap().unwrap(), b"{\"v\":2}");
        assert_eq!(storage.list().await.unwrap(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::open(dir.path()).await.unwrap();
            storage.put("orders", b"data".to_vec()).await.unwrap();
        }

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get("orders").await.unwrap().unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_file_storage_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();

        for bad in ["", "..", "../escape", "a/b", "a\\b"] {
            assert!(matches!(
                storage.put(bad, b"x".to_vec()).await,
                Err(TransitError::InvalidKeyName(_))
            ));
        }
    }
}
