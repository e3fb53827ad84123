//! idp-router: document classification pipeline over at-least-once queues
//!
//! Documents uploaded under `landing/<prefix>/` are batched by prefix into asynchronous
//! classification jobs. When a job finishes, every result scoring above the acceptance
//! threshold becomes a routing message, and each routing message copies the source
//! document to `classified/<prefix>/<class>/<file>` in the destination bucket.
//!
//! Every stage keeps its work item invisible while it runs and acknowledges it only after
//! all side effects are durable, so a crash at any point leads to redelivery rather than
//! loss. See [`pipeline`] for the stages and [`providers`] for the backend seams.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod providers;
pub mod server;
pub mod storage;
pub mod types;

pub use config::RouterConfig;
pub use error::{Error, Result};
pub use pipeline::{Backends, BatchDispatcher, JobStatusTracker, MoveCoordinator, Pipeline};
pub use types::{ClassificationResult, DocumentNotification, JobRecord, RoutingMessage};
