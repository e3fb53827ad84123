//! Provider abstractions for queues, object storage, job records and classification
//!
//! This module provides trait-based abstractions that allow switching between
//! in-memory, local (SQLite + filesystem) and cloud (GCS) backends.

pub mod queue;
pub mod object_store;
pub mod job_store;
pub mod classifier;
pub mod memory;
pub mod local;
pub mod http_classifier;

#[cfg(feature = "gcp")]
pub mod gcp;

pub use classifier::{
    ClassificationEngine, ClassificationJobStatus, JobDescription, JobLabel, SubmitJobRequest,
};
pub use job_store::JobStore;
pub use object_store::ObjectStore;
pub use queue::{QueueClient, QueueMessage};
