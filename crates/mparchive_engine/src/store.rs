use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, thiserror::Error)]
pub enum AssetStoreError {
    #[error("invalid asset key {0:?}")]
    InvalidKey(String),
    #[error("asset {0} not found")]
    NotFound(String),
    #[error("asset io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("asset store task failed: {0}")]
    Task(String),
}

/// Content-addressed blob storage shared by the localizer and the publisher.
///
/// Keys are relative slash-separated paths such as `2024/05/0123abcd.webp`.
/// `write` is idempotent: a key that already exists is left untouched.
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, AssetStoreError>;
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), AssetStoreError>;
    async fn read(&self, key: &str) -> Result<Vec<u8>, AssetStoreError>;
}

/// Maps a public reference (`/uploads/2024/05/x.webp`) back to its store key.
pub fn key_from_reference<'a>(public_prefix: &str, reference: &'a str) -> Option<&'a str> {
    let prefix = public_prefix.trim_end_matches('/');
    reference
        .strip_prefix(prefix)?
        .strip_prefix('/')
        .filter(|key| !key.is_empty())
}

fn validate_key(key: &str) -> Result<(), AssetStoreError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(AssetStoreError::InvalidKey(key.to_string()))
    }
}

/// Asset store rooted at a local directory, typically the public uploads folder.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    writer: AtomicFileWriter,
}

impl FsAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        self.writer.dir()
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, AssetStoreError> {
        validate_key(key)?;
        Ok(self.root().join(key))
    }
}

#[async_trait::async_trait]
impl AssetStore for FsAssetStore {
    async fn exists(&self, key: &str) -> Result<bool, AssetStoreError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), AssetStoreError> {
        validate_key(key)?;
        let writer = self.writer.clone();
        let key = key.to_string();
        // Losing a race against a concurrent writer of the same hash is fine.
        tokio::task::spawn_blocking(move || writer.write_new(&key, &bytes))
            .await
            .map_err(|err| AssetStoreError::Task(err.to_string()))??;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, AssetStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(AssetStoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory asset store that counts physical writes.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that actually stored bytes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AssetStore for MemoryAssetStore {
    async fn exists(&self, key: &str) -> Result<bool, AssetStoreError> {
        validate_key(key)?;
        Ok(self.blobs.read().await.contains_key(key))
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), AssetStoreError> {
        validate_key(key)?;
        let mut blobs = self.blobs.write().await;
        if !blobs.contains_key(key) {
            blobs.insert(key.to_string(), bytes);
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, AssetStoreError> {
        validate_key(key)?;
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AssetStoreError::NotFound(key.to_string()))
    }
}
