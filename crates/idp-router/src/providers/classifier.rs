//! Classification engine provider trait for asynchronous batch jobs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Request to classify every document under one input prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    /// Human-readable job name
    pub job_name: String,
    /// Prefix URI covering the documents (`s3://bucket/landing/acme/`)
    pub input_uri: String,
    /// Classifier model reference
    pub classifier: String,
    /// Prefix URI the engine writes its output archive under
    pub output_uri: String,
    /// Identity the engine assumes to read inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_access_role: Option<String>,
}

/// Job lifecycle as reported by the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationJobStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
    Stopped,
}

impl ClassificationJobStatus {
    /// No further status changes will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// Job-level label summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLabel {
    pub name: String,
    pub score: f64,
}

/// Result of `describe_job`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub job_id: String,
    pub status: ClassificationJobStatus,
    /// URI of the output archive once completed
    #[serde(default)]
    pub output_location: Option<String>,
    #[serde(default)]
    pub labels: Vec<JobLabel>,
    /// Engine-provided detail, usually set on failure
    #[serde(default)]
    pub message: Option<String>,
}

/// Trait for asynchronous document classification engines
///
/// Implementations:
/// - `InMemoryClassifier`: scripted engine for tests and the `memory` backend
/// - `HttpClassificationEngine`: REST client
#[async_trait]
pub trait ClassificationEngine: Send + Sync {
    /// Start a job, returning the engine's job id
    async fn submit_job(&self, request: &SubmitJobRequest) -> Result<String>;

    /// Current job state
    async fn describe_job(&self, job_id: &str) -> Result<JobDescription>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
