//! Bucketed object storage for snap binaries and provisioned material.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::{Result, StoreError};

/// Well-known bucket names.
pub mod buckets {
    /// Uploads waiting to be processed.
    pub const UNSCANNED: &str = "unscanned";
    /// Committed revisions.
    pub const SNAPS: &str = "snaps";
    /// Root authority key and assertions.
    pub const ROOT: &str = "root";
    /// Generic account key and assertions.
    pub const GENERIC: &str = "generic";
}

/// Streaming reader over a stored object.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object, replacing any previous one under the same key.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<()>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Open an object for streaming.
    async fn open(&self, bucket: &str, key: &str) -> Result<BlobReader>;

    async fn move_object(&self, from_bucket: &str, from_key: &str, to_bucket: &str, to_key: &str)
        -> Result<()>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Object keys in a bucket, sorted.
    async fn list(&self, bucket: &str) -> Result<Vec<String>>;
}

fn not_found(bucket: &str, key: &str) -> StoreError {
    StoreError::BlobNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

/// Reject names that could escape the bucket directory.
fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(StoreError::InvalidData(format!("bad object name {:?}", name)));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<(String, String), Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        validate_name(bucket)?;
        validate_name(key)?;
        self.objects
            .write()
            .map_err(StoreError::poisoned)?
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .map_err(StoreError::poisoned)?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn open(&self, bucket: &str, key: &str) -> Result<BlobReader> {
        let data = self.get(bucket, key).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn move_object(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<()> {
        validate_name(to_bucket)?;
        validate_name(to_key)?;
        let mut objects = self.objects.write().map_err(StoreError::poisoned)?;
        let data = objects
            .remove(&(from_bucket.to_string(), from_key.to_string()))
            .ok_or_else(|| not_found(from_bucket, from_key))?;
        objects.insert((to_bucket.to_string(), to_key.to_string()), data);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(StoreError::poisoned)?
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .map_err(StoreError::poisoned)?
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .map_err(StoreError::poisoned)?
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem
// ─────────────────────────────────────────────────────────────────────────────

/// Blob store rooted at a directory; each bucket is a subdirectory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_name(bucket)?;
        validate_name(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.root.join(bucket)).await?;
        Ok(())
    }
}

fn map_missing(err: std::io::Error, bucket: &str, key: &str) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        not_found(bucket, key)
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let path = self.path(bucket, key)?;
        self.ensure_bucket(bucket).await?;
        // write-then-rename so readers never see a partial object
        let tmp = path.with_file_name(format!("{}.partial", key));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::trace!(bucket, key, size = data.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let path = self.path(bucket, key)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| map_missing(e, bucket, key))?;
        Ok(Bytes::from(data))
    }

    async fn open(&self, bucket: &str, key: &str) -> Result<BlobReader> {
        let path = self.path(bucket, key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_missing(e, bucket, key))?;
        Ok(Box::new(file))
    }

    async fn move_object(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<()> {
        let from = self.path(from_bucket, from_key)?;
        let to = self.path(to_bucket, to_key)?;
        self.ensure_bucket(to_bucket).await?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| map_missing(e, from_bucket, from_key))?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.path(bucket, key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        validate_name(bucket)?;
        let mut entries = match tokio::fs::read_dir(self.root.join(bucket)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".partial") {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
