//! Google Cloud Storage object store
//!
//! Serves all three buckets (source, destination, classifier output) through one client.

use async_trait::async_trait;
use std::time::Duration;

use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client as GcsClient, ClientConfig};
use google_cloud_storage::http::objects::copy::CopyObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::sign::{SignedURLMethod, SignedURLOptions};

use crate::config::GcpConfig;
use crate::error::{Error, Result};
use crate::providers::object_store::ObjectStore;

/// Google Cloud Storage object store
pub struct GcsObjectStore {
    client: GcsClient,
    /// Bucket listed by `health_check`
    access_check_bucket: String,
}

impl GcsObjectStore {
    /// Create a new GCS object store
    ///
    /// # Arguments
    /// * `config` - GCP settings; an explicit key file wins over ambient credentials
    /// * `access_check_bucket` - Bucket used to verify access
    pub async fn new(config: &GcpConfig, access_check_bucket: String) -> Result<Self> {
        let client_config = match &config.service_account_key_path {
            Some(path) => {
                let credentials = CredentialsFile::new_from_file(path.to_string_lossy().to_string())
                    .await
                    .map_err(|e| Error::Config(format!("Failed to read GCS credentials: {}", e)))?;
                ClientConfig::default()
                    .with_credentials(credentials)
                    .await
                    .map_err(|e| Error::Config(format!("Failed to create GCS client: {}", e)))?
            }
            None => ClientConfig::default()
                .with_auth()
                .await
                .map_err(|e| Error::Config(format!("Failed to create GCS client: {}", e)))?,
        };

        tracing::info!(
            "GCS object store ready for project {}",
            config.project_id
        );

        Ok(Self {
            client: GcsClient::new(client_config),
            access_check_bucket,
        })
    }

    fn is_not_found(err: &google_cloud_storage::http::Error) -> bool {
        matches!(err, google_cloud_storage::http::Error::Response(resp) if resp.code == 404)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.client
            .download_object(
                &GetObjectRequest {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                    ..Default::default()
                },
                &Range::default(),
            )
            .await
            .map_err(|e| {
                if Self::is_not_found(&e) {
                    Error::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    Error::object_store(format!("Failed to download gs://{}/{}: {}", bucket, key, e))
                }
            })
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let upload_type = UploadType::Simple(Media::new(key.to_string()));
        self.client
            .upload_object(
                &UploadObjectRequest {
                    bucket: bucket.to_string(),
                    ..Default::default()
                },
                data.to_vec(),
                &upload_type,
            )
            .await
            .map_err(|e| Error::object_store(format!("Failed to upload gs://{}/{}: {}", bucket, key, e)))?;
        Ok(())
    }

    async fn copy(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        self.client
            .copy_object(&CopyObjectRequest {
                source_bucket: src_bucket.to_string(),
                source_object: src_key.to_string(),
                destination_bucket: dst_bucket.to_string(),
                destination_object: dst_key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| {
                if Self::is_not_found(&e) {
                    Error::ObjectNotFound {
                        bucket: src_bucket.to_string(),
                        key: src_key.to_string(),
                    }
                } else {
                    Error::object_store(format!(
                        "Failed to copy gs://{}/{} -> gs://{}/{}: {}",
                        src_bucket, src_key, dst_bucket, dst_key, e
                    ))
                }
            })?;
        Ok(())
    }

    async fn head_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self
            .client
            .get_object(&GetObjectRequest {
                bucket: bucket.to_string(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if Self::is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::object_store(format!(
                "Failed to stat gs://{}/{}: {}",
                bucket, key, e
            ))),
        }
    }

    async fn presigned_put_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String> {
        self.client
            .signed_url(
                bucket,
                key,
                None,
                None,
                SignedURLOptions {
                    method: SignedURLMethod::PUT,
                    expires: Duration::from_secs(ttl_secs),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::object_store(format!("Failed to sign upload URL: {}", e)))
    }

    async fn health_check(&self) -> Result<bool> {
        let list_request = ListObjectsRequest {
            bucket: self.access_check_bucket.clone(),
            max_results: Some(1),
            ..Default::default()
        };

        self.client
            .list_objects(&list_request)
            .await
            .map(|_| true)
            .map_err(|e| Error::object_store(format!("GCS health check failed: {}", e)))
    }

    fn name(&self) -> &str {
        "gcs"
    }
}
