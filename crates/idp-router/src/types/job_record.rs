//! Job tracking records persisted in the job store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::notification::DocumentNotification;

/// Primary key of a job record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub bucket: String,
    pub filename: String,
}

impl JobKey {
    pub fn new(bucket: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            filename: filename.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.filename)
    }
}

/// A document assigned to an in-flight classification job.
///
/// Existence of the record means "in flight": it is written by the dispatcher
/// and removed by the move coordinator once the document has been copied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Source bucket
    pub bucket: String,
    /// Last key component, unique within the bucket
    pub filename: String,
    /// Directory part of the key
    pub prefix: String,
    /// Full source key
    pub key: String,
    /// Identifier of the classification job covering this document
    pub job_name: String,
    /// When the record was written
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Build the record for a dispatched notification
    pub fn for_notification(notification: &DocumentNotification, job_name: impl Into<String>) -> Self {
        Self {
            bucket: notification.bucket.clone(),
            filename: notification.filename().to_string(),
            prefix: notification.batch_key().as_str().to_string(),
            key: notification.key.clone(),
            job_name: job_name.into(),
            created_at: Utc::now(),
        }
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.bucket.clone(), self.filename.clone())
    }
}

/// Published for every newly submitted job when the tracker polls for status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmittedNotice {
    pub job_id: String,
    pub bucket: String,
    pub prefix: String,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_for_notification() {
        let n = DocumentNotification::new("in", "landing/acme/2024-01/doc1.pdf");
        let record = JobRecord::for_notification(&n, "J1");

        assert_eq!(record.bucket, "in");
        assert_eq!(record.filename, "doc1.pdf");
        assert_eq!(record.prefix, "landing/acme/2024-01");
        assert_eq!(record.key, "landing/acme/2024-01/doc1.pdf");
        assert_eq!(record.job_name, "J1");
        assert_eq!(record.job_key(), JobKey::new("in", "doc1.pdf"));
    }

    #[test]
    fn test_job_key_display() {
        assert_eq!(JobKey::new("in", "doc1.pdf").to_string(), "in/doc1.pdf");
    }
}
