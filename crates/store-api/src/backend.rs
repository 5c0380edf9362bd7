//! Where the API keeps pages.

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Metadata kept next to each content blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub url: String,
    /// Milliseconds since the Unix epoch.
    pub expiration: i64,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt metadata for {key}: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },
}

/// Storage for metadata records and content blobs, both addressed by the
/// full storage key.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn data(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    async fn meta(&self, key: &str) -> Result<Option<PageMeta>, BackendError>;

    async fn put(&self, key: &str, meta: PageMeta, data: Bytes) -> Result<(), BackendError>;

    /// Delete both parts. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

/// Volatile backend; contents die with the process.
#[derive(Default)]
pub struct MemoryBackend {
    metas: RwLock<HashMap<String, PageMeta>>,
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.metas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.read().is_empty()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn data(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        Ok(self.blobs.read().get(key).cloned())
    }

    async fn meta(&self, key: &str) -> Result<Option<PageMeta>, BackendError> {
        Ok(self.metas.read().get(key).cloned())
    }

    async fn put(&self, key: &str, meta: PageMeta, data: Bytes) -> Result<(), BackendError> {
        self.blobs.write().insert(key.to_string(), data);
        self.metas.write().insert(key.to_string(), meta);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.metas.write().remove(key);
        self.blobs.write().remove(key);
        Ok(())
    }
}

/// Directory-backed store:
///
/// ```text
/// <root>/meta/<key>.json
/// <root>/blobs/<key>
/// ```
///
/// Keys are validated before they reach the backend and cannot contain path
/// separators or periods, so they are used as file names directly.
pub struct FsBackend {
    meta_dir: PathBuf,
    blob_dir: PathBuf,
}

impl FsBackend {
    /// Open `root`, creating the directory layout when missing.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BackendError> {
        let root = root.as_ref();
        let meta_dir = root.join("meta");
        let blob_dir = root.join("blobs");
        tokio::fs::create_dir_all(&meta_dir).await?;
        tokio::fs::create_dir_all(&blob_dir).await?;
        Ok(Self { meta_dir, blob_dir })
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.meta_dir.join(format!("{key}.json"))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.blob_dir.join(key)
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, BackendError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<(), BackendError> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[async_trait::async_trait]
impl Backend for FsBackend {
    async fn data(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        Ok(read_optional(&self.blob_path(key)).await?.map(Bytes::from))
    }

    async fn meta(&self, key: &str) -> Result<Option<PageMeta>, BackendError> {
        let Some(raw) = read_optional(&self.meta_path(key)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| BackendError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    async fn put(&self, key: &str, meta: PageMeta, data: Bytes) -> Result<(), BackendError> {
        // Blob first: metadata without content would read as a present page.
        tokio::fs::write(self.blob_path(key), &data).await?;
        let raw = serde_json::to_vec(&meta).map_err(|source| BackendError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        tokio::fs::write(self.meta_path(key), raw).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        remove_optional(&self.meta_path(key)).await?;
        remove_optional(&self.blob_path(key)).await
    }
}
