//! Core types for the routing pipeline

pub mod job_record;
pub mod notification;
pub mod routing;

pub use job_record::{JobKey, JobRecord, JobSubmittedNotice};
pub use notification::{BatchKey, DocumentNotification};
pub use routing::{ClassificationResult, RoutingMessage, ACCEPTANCE_THRESHOLD};
