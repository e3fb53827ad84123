//! REST client for a remote classification engine
//!
//! The engine exposes two endpoints:
//! - `POST {base}/jobs` with a [`SubmitJobRequest`] body, answering `{"job_id": ...}`
//! - `GET {base}/jobs/{job_id}`, answering a [`JobDescription`]

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::error::{Error, Result};

use super::classifier::{ClassificationEngine, JobDescription, SubmitJobRequest};

/// HTTP classification engine client
pub struct HttpClassificationEngine {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SubmitJobResponse {
    job_id: String,
}

impl HttpClassificationEngine {
    /// Create a new client from config
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }
}

#[async_trait]
impl ClassificationEngine for HttpClassificationEngine {
    async fn submit_job(&self, request: &SubmitJobRequest) -> Result<String> {
        tracing::info!(
            "[{}] Submitting classification job for {}",
            request.job_name,
            request.input_uri
        );

        let response = self
            .client
            .post(self.jobs_url())
            .json(request)
            .send()
            .await
            .map_err(|e| Error::SubmissionFailed {
                input_uri: request.input_uri.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SubmissionFailed {
                input_uri: request.input_uri.clone(),
                message: format!("engine answered {}: {}", status, body),
            });
        }

        let submitted: SubmitJobResponse = response.json().await.map_err(|e| {
            Error::classifier(format!("Failed to parse submit response: {}", e))
        })?;
        Ok(submitted.job_id)
    }

    async fn describe_job(&self, job_id: &str) -> Result<JobDescription> {
        let response = self
            .client
            .get(format!("{}/{}", self.jobs_url(), job_id))
            .send()
            .await
            .map_err(|e| Error::classifier(format!("describe {} failed: {}", job_id, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::classifier(format!(
                "describe {} answered {}: {}",
                job_id, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::classifier(format!("Failed to parse job {}: {}", job_id, e)))
    }

    async fn health_check(&self) -> Result<bool> {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "http-classifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::classifier::ClassificationJobStatus;

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = ClassifierConfig {
            base_url: "http://engine:9090/".to_string(),
            ..Default::default()
        };
        let engine = HttpClassificationEngine::new(&config).unwrap();
        assert_eq!(engine.jobs_url(), "http://engine:9090/jobs");
    }

    #[test]
    fn test_description_wire_format() {
        let body = r#"{
            "job_id": "J7",
            "status": "COMPLETED",
            "output_location": "s3://out/comprehend/J7/output/output.tar.gz"
        }"#;
        let description: JobDescription = serde_json::from_str(body).unwrap();
        assert_eq!(description.status, ClassificationJobStatus::Completed);
        assert!(description.labels.is_empty());
        assert!(description.message.is_none());
    }
}
