//! Google Cloud Platform provider implementations
//!
//! Google Cloud Storage backs the source, destination and output buckets.

mod gcs_store;

pub use gcs_store::GcsObjectStore;
