//! Job store provider trait for in-flight document records

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{JobKey, JobRecord};

/// Trait for key-value persistence of job records keyed by (bucket, filename)
///
/// Implementations:
/// - `InMemoryJobStore`: process memory
/// - `SqliteJobStore`: SQLite table
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch a record
    async fn get_item(&self, key: &JobKey) -> Result<Option<JobRecord>>;

    /// Insert or replace a record
    async fn put_item(&self, record: &JobRecord) -> Result<()>;

    /// Remove a record. Removing an absent key is a no-op.
    async fn delete_item(&self, key: &JobKey) -> Result<()>;

    /// Number of records (documents in flight)
    async fn count(&self) -> Result<usize>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
