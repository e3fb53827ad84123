//! Document notification types: what lands on the ingest queue

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A new object landed in a watched bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentNotification {
    /// Bucket holding the document
    pub bucket: String,
    /// Full object key
    pub key: String,
}

/// Storage prefix shared by documents classified together
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey(String);

/// Accepted queue message bodies
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NotificationBody {
    /// `{"bucket": ..., "key": ...}` as written by the forwarder
    Flat { bucket: String, key: String },
    /// Object-created event envelope
    Event {
        #[serde(rename = "Records")]
        records: Vec<EventRecord>,
    },
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    s3: StorageEntity,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

impl DocumentNotification {
    /// Create a notification
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse a queue message body (flat body or the first record of an event)
    pub fn parse(message_id: &str, body: &str) -> Result<Self> {
        let parsed: NotificationBody = serde_json::from_str(body)
            .map_err(|e| Error::malformed(message_id, format!("invalid notification JSON: {}", e)))?;

        let notification = match parsed {
            NotificationBody::Flat { bucket, key } => Self { bucket, key },
            NotificationBody::Event { records } => {
                let record = records
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::malformed(message_id, "event has no records"))?;
                Self {
                    bucket: record.s3.bucket.name,
                    key: record.s3.object.key,
                }
            }
        };

        notification.validate(message_id)?;
        Ok(notification)
    }

    /// Parse every record of an object-created event
    pub fn from_event(body: &str) -> Result<Vec<Self>> {
        let parsed: NotificationBody = serde_json::from_str(body)?;
        Ok(match parsed {
            NotificationBody::Flat { bucket, key } => vec![Self { bucket, key }],
            NotificationBody::Event { records } => records
                .into_iter()
                .map(|r| Self {
                    bucket: r.s3.bucket.name,
                    key: r.s3.object.key,
                })
                .collect(),
        })
    }

    fn validate(&self, message_id: &str) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::malformed(message_id, "empty bucket"));
        }
        if self.key.trim().is_empty() {
            return Err(Error::malformed(message_id, "empty key"));
        }
        if self.is_folder() {
            return Err(Error::malformed(
                message_id,
                format!("'{}' is a folder marker, not a document", self.key),
            ));
        }
        Ok(())
    }

    /// Keys ending in `/` mark folders
    pub fn is_folder(&self) -> bool {
        self.key.ends_with('/')
    }

    /// Last path component of the key
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Directory-equivalent part of the key
    pub fn batch_key(&self) -> BatchKey {
        BatchKey::from_key(&self.key)
    }

    /// Serialize as a flat ingest message body
    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl BatchKey {
    /// Everything before the last `/`; empty for root-level keys
    pub fn from_key(key: &str) -> Self {
        match key.rfind('/') {
            Some(idx) => Self(key[..idx].to_string()),
            None => Self(String::new()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix with a trailing slash, as handed to the classification engine
    pub fn as_dir(&self) -> String {
        if self.0.is_empty() {
            String::new()
        } else {
            format!("{}/", self.0)
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
