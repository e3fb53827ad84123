//! Pipeline core: dispatch, tracking and moving, wired over injected backends
//!
//! ```text
//! upload -> [forwarder] -> ingest queue -> [dispatcher] -> job store + classification job
//!        -> output archive -> output queue -> [tracker] -> routing queue -> [mover]
//!        -> destination bucket + job record retired
//! ```

pub mod archive;
pub mod dispatcher;
pub mod forwarder;
pub mod mover;
pub mod tracker;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendProvider, RouterConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::processing::{PipelineStage, PipelineStats};
use crate::providers::http_classifier::HttpClassificationEngine;
use crate::providers::local::LocalObjectStore;
use crate::providers::memory::{InMemoryClassifier, InMemoryJobStore, InMemoryObjectStore, InMemoryQueue};
use crate::providers::{ClassificationEngine, JobStore, ObjectStore, QueueClient};
use crate::storage::{RouterDb, SqliteJobStore, SqliteQueue};

pub use archive::{extract_results, ResultFile};
pub use dispatcher::{BatchDispatcher, DispatchContext, DispatchReport};
pub use forwarder::{ForwardReport, NotificationForwarder};
pub use mover::{MoveCoordinator, MoveOutcome};
pub use tracker::{JobStatusTracker, PollStep, TrackOutcome};
pub use upload::{UploadUrl, UploadUrlIssuer};

/// Backend handles shared by every stage
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn QueueClient>,
    pub objects: Arc<dyn ObjectStore>,
    pub jobs: Arc<dyn JobStore>,
    pub engine: Arc<dyn ClassificationEngine>,
}

impl Backends {
    /// Build the backends selected by `config.backend`
    pub async fn from_config(config: &RouterConfig) -> Result<Self> {
        let visibility = Duration::from_secs(config.queues.visibility_timeout_secs);

        let backends = match config.backend {
            BackendProvider::Memory => {
                tracing::warn!("Using in-memory backends; nothing survives a restart");
                Self {
                    queue: Arc::new(InMemoryQueue::new(visibility)),
                    objects: Arc::new(InMemoryObjectStore::new()),
                    jobs: Arc::new(InMemoryJobStore::new()),
                    engine: Arc::new(InMemoryClassifier::new()),
                }
            }
            BackendProvider::Local => {
                let db = RouterDb::new(config.storage.database_path())?;
                Self {
                    queue: Arc::new(SqliteQueue::new(db.clone(), visibility)),
                    objects: Arc::new(LocalObjectStore::new(config.storage.objects_dir())?),
                    jobs: Arc::new(SqliteJobStore::new(db)),
                    engine: Arc::new(HttpClassificationEngine::new(&config.classifier)?),
                }
            }
            BackendProvider::Gcp => Self::gcp(config, visibility).await?,
        };

        tracing::info!(
            "Backends ready: queue={}, objects={}, jobs={}, engine={}",
            backends.queue.name(),
            backends.objects.name(),
            backends.jobs.name(),
            backends.engine.name()
        );
        Ok(backends)
    }

    #[cfg(feature = "gcp")]
    async fn gcp(config: &RouterConfig, visibility: Duration) -> Result<Self> {
        let gcp = config
            .gcp
            .as_ref()
            .ok_or_else(|| Error::Config("GCP backend selected but gcp config is missing".to_string()))?;
        let objects = crate::providers::gcp::GcsObjectStore::new(gcp, config.buckets.source.clone()).await?;
        let db = RouterDb::new(config.storage.database_path())?;

        Ok(Self {
            queue: Arc::new(SqliteQueue::new(db.clone(), visibility)),
            objects: Arc::new(objects),
            jobs: Arc::new(SqliteJobStore::new(db)),
            engine: Arc::new(HttpClassificationEngine::new(&config.classifier)?),
        })
    }

    #[cfg(not(feature = "gcp"))]
    async fn gcp(_config: &RouterConfig, _visibility: Duration) -> Result<Self> {
        Err(Error::Config(
            "GCP backend selected but idp-router was built without the 'gcp' feature".to_string(),
        ))
    }
}

/// Every pipeline component built over one set of backends
pub struct Pipeline {
    pub backends: Backends,
    pub dispatcher: Arc<BatchDispatcher>,
    pub tracker: Arc<JobStatusTracker>,
    pub mover: Arc<MoveCoordinator>,
    pub forwarder: Arc<NotificationForwarder>,
    pub uploads: Arc<UploadUrlIssuer>,
    pub stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(backends: Backends, config: &RouterConfig) -> Self {
        let stats = Arc::new(PipelineStats::new());

        Self {
            dispatcher: Arc::new(BatchDispatcher::new(&backends, config, stats.clone())),
            tracker: Arc::new(JobStatusTracker::new(&backends, config, stats.clone())),
            mover: Arc::new(MoveCoordinator::new(&backends, config, stats.clone())),
            forwarder: Arc::new(NotificationForwarder::new(
                backends.queue.clone(),
                config.queues.ingest.clone(),
            )),
            uploads: Arc::new(UploadUrlIssuer::new(
                backends.objects.clone(),
                config.buckets.source.clone(),
                config.mover.landing_prefix.clone(),
                config.server.upload_url_ttl_secs,
            )),
            backends,
            stats,
        }
    }

    pub async fn from_config(config: &RouterConfig) -> Result<Self> {
        let backends = Backends::from_config(config).await?;
        Ok(Self::new(backends, config))
    }

    /// Stages enabled in the worker configuration
    pub fn stages(&self, worker: &WorkerConfig) -> Vec<Arc<dyn PipelineStage>> {
        let mut stages: Vec<Arc<dyn PipelineStage>> = Vec::new();
        if worker.dispatch {
            stages.push(self.dispatcher.clone());
        }
        if worker.track {
            stages.push(self.tracker.clone());
        }
        if worker.move_stage {
            stages.push(self.mover.clone());
        }
        stages
    }
}
