//! Presigned upload URLs for the landing area

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::ObjectStore;

static OBJECT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-.]+$").expect("object name pattern is valid"));

/// A URL a client can PUT one document to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadUrl {
    pub url: String,
    pub bucket: String,
    pub key: String,
    pub expires_in: u64,
}

/// Issues upload URLs under `landing/` in the source bucket
pub struct UploadUrlIssuer {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    landing_prefix: String,
    ttl_secs: u64,
}

impl UploadUrlIssuer {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        landing_prefix: impl Into<String>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
            landing_prefix: landing_prefix.into(),
            ttl_secs,
        }
    }

    /// Plain file names only: letters, digits, `_`, `-` and `.`
    pub fn validate_object_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_key(name, "missing object_name"));
        }
        if !OBJECT_NAME.is_match(name) || name.chars().all(|c| c == '.') {
            return Err(Error::invalid_key(name, "invalid object_name"));
        }
        Ok(())
    }

    pub async fn issue(&self, object_name: &str) -> Result<UploadUrl> {
        Self::validate_object_name(object_name)?;

        let key = format!("{}{}", self.landing_prefix, object_name);
        let url = self
            .objects
            .presigned_put_url(&self.bucket, &key, self.ttl_secs)
            .await?;

        tracing::info!("[{}] Issued upload URL ({}s)", key, self.ttl_secs);
        Ok(UploadUrl {
            url,
            bucket: self.bucket.clone(),
            key,
            expires_in: self.ttl_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::InMemoryObjectStore;

    #[test]
    fn test_object_name_validation() {
        for ok in ["doc1.pdf", "scan_2024-01.tiff", "A.B.C"] {
            UploadUrlIssuer::validate_object_name(ok).unwrap();
        }
        for bad in ["", "..", "a/b.pdf", "../etc", "spaced name.pdf", "ñ.pdf"] {
            assert!(UploadUrlIssuer::validate_object_name(bad).is_err(), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_issue_targets_landing() {
        let issuer = UploadUrlIssuer::new(Arc::new(InMemoryObjectStore::new()), "in", "landing/", 300);
        let upload = issuer.issue("doc1.pdf").await.unwrap();

        assert_eq!(upload.key, "landing/doc1.pdf");
        assert_eq!(upload.expires_in, 300);
        assert!(upload.url.contains("in/landing/doc1.pdf"));
    }
}
