//! Error types for the document routing pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue message that can never be parsed
    #[error("Malformed message '{message_id}': {reason}")]
    MalformedMessage { message_id: String, reason: String },

    /// Object key does not follow the expected landing layout
    #[error("Invalid key layout '{key}': {reason}")]
    InvalidKeyLayout { key: String, reason: String },

    /// Expected source object is missing
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Classification job could not be started
    #[error("Failed to submit classification job for '{input_uri}': {message}")]
    SubmissionFailed { input_uri: String, message: String },

    /// Classification job reached a terminal failure state
    #[error("Classification job {job_id} failed: {message}")]
    ClassificationJobFailed { job_id: String, message: String },

    /// Classification job did not finish before the poll deadline
    #[error("Classification job {job_id} still running after {waited_secs}s")]
    PollTimeout { job_id: String, waited_secs: u64 },

    /// Cooperative cancellation was requested
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Queue backend error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Object store backend error
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Job store backend error
    #[error("Job store error: {0}")]
    JobStore(String),

    /// Classification engine backend error
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Job output archive could not be read
    #[error("Archive error: {0}")]
    Archive(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a malformed message error
    pub fn malformed(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message_id: message_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid key layout error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKeyLayout {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Create an object store error
    pub fn object_store(message: impl Into<String>) -> Self {
        Self::ObjectStore(message.into())
    }

    /// Create a job store error
    pub fn job_store(message: impl Into<String>) -> Self {
        Self::JobStore(message.into())
    }

    /// Create a classifier error
    pub fn classifier(message: impl Into<String>) -> Self {
        Self::Classifier(message.into())
    }

    /// Create an archive error
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether redelivering the triggering message can plausibly succeed.
    ///
    /// Backend failures are transient. Malformed input, broken key layouts and missing
    /// source objects will fail the same way on every delivery.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Queue(_)
            | Error::ObjectStore(_)
            | Error::JobStore(_)
            | Error::Classifier(_)
            | Error::SubmissionFailed { .. }
            | Error::Io(_)
            | Error::Http(_)
            | Error::Database(_)
            | Error::PollTimeout { .. }
            | Error::Cancelled(_)
            | Error::Internal(_) => true,
            Error::Config(_)
            | Error::MalformedMessage { .. }
            | Error::InvalidKeyLayout { .. }
            | Error::ObjectNotFound { .. }
            | Error::ClassificationJobFailed { .. }
            | Error::Archive(_)
            | Error::Json(_) => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::MalformedMessage { .. } => (StatusCode::BAD_REQUEST, "malformed_message"),
            Error::InvalidKeyLayout { .. } => (StatusCode::BAD_REQUEST, "invalid_key_layout"),
            Error::ObjectNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Error::SubmissionFailed { .. } => (StatusCode::BAD_GATEWAY, "submission_failed"),
            Error::ClassificationJobFailed { .. } => (StatusCode::CONFLICT, "job_failed"),
            Error::PollTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "poll_timeout"),
            Error::Cancelled(_) => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            Error::Queue(_) => (StatusCode::BAD_GATEWAY, "queue_error"),
            Error::ObjectStore(_) => (StatusCode::BAD_GATEWAY, "object_store_error"),
            Error::JobStore(_) => (StatusCode::BAD_GATEWAY, "job_store_error"),
            Error::Classifier(_) => (StatusCode::BAD_GATEWAY, "classifier_error"),
            Error::Archive(_) => (StatusCode::UNPROCESSABLE_ENTITY, "archive_error"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::queue("timeout").is_retryable());
        assert!(Error::job_store("throttled").is_retryable());
        assert!(!Error::malformed("m-1", "not json").is_retryable());
        assert!(!Error::invalid_key("incoming/a.pdf", "missing landing/").is_retryable());
        assert!(!Error::ObjectNotFound {
            bucket: "in".to_string(),
            key: "landing/a.pdf".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::SubmissionFailed {
            input_uri: "s3://in/landing/acme/".to_string(),
            message: "HTTP 500".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to submit classification job for 's3://in/landing/acme/': HTTP 500"
        );
    }
}
