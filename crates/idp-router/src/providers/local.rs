//! Local provider implementations using the filesystem
//!
//! Buckets are directories under the objects root and keys are relative paths
//! inside them.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

use super::object_store::ObjectStore;

/// Local object store using filesystem
pub struct LocalObjectStore {
    /// Root directory holding one subdirectory per bucket
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a new local object store
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve an object path, refusing keys that escape the bucket
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if bucket.is_empty() || bucket.contains('/') || key.is_empty() || escapes {
            return Err(Error::invalid_key(
                format!("{}/{}", bucket, key),
                "not a plain relative object path",
            ));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    fn not_found(bucket: &str, key: &str) -> Error {
        Error::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Self::not_found(bucket, key)),
            Err(e) => Err(Error::object_store(format!(
                "Failed to read {}/{}: {}",
                bucket, key, e
            ))),
        }
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn copy(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        let src = self.object_path(src_bucket, src_key)?;
        let dst = self.object_path(dst_bucket, dst_key)?;

        if !tokio::fs::try_exists(&src).await? {
            return Err(Self::not_found(src_bucket, src_key));
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, &dst).await?;

        tracing::debug!(
            "Copied {}/{} -> {}/{}",
            src_bucket, src_key, dst_bucket, dst_key
        );
        Ok(())
    }

    async fn head_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key)?;
        Ok(tokio::fs::try_exists(&path).await? && path.is_file())
    }

    async fn presigned_put_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String> {
        let path = self.object_path(bucket, key)?;
        Ok(format!("file://{}?expires_in={}", path.to_string_lossy(), ttl_secs))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.root.exists())
    }

    fn name(&self) -> &str {
        "local-filesystem"
    }
}
