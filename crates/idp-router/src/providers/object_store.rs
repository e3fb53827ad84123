//! Object store provider trait for document blobs

use async_trait::async_trait;
use crate::error::Result;

/// Trait for bucket/key blob storage
///
/// Implementations:
/// - `InMemoryObjectStore`: process memory
/// - `LocalObjectStore`: local filesystem, one directory per bucket
/// - `GcsObjectStore`: Google Cloud Storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Write an object, replacing any existing one
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()>;

    /// Server-side copy. Copying the same source to the same destination twice is harmless.
    async fn copy(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()>;

    /// Check whether an object exists
    async fn head_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// URL a client can PUT the object to for `ttl_secs`
    async fn presigned_put_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
