//! In-memory pipeline fixture shared by the stage tests

use std::sync::Arc;
use std::time::Duration;

use crate::config::RouterConfig;
use crate::processing::PipelineStats;
use crate::providers::memory::{InMemoryClassifier, InMemoryJobStore, InMemoryObjectStore, InMemoryQueue};
use crate::providers::QueueClient;

use super::{Backends, BatchDispatcher, JobStatusTracker, MoveCoordinator};

pub(crate) struct MemoryBackends {
    pub queue: Arc<InMemoryQueue>,
    pub objects: Arc<InMemoryObjectStore>,
    pub jobs: Arc<InMemoryJobStore>,
    pub engine: Arc<InMemoryClassifier>,
    pub config: RouterConfig,
    pub stats: Arc<PipelineStats>,
}

impl MemoryBackends {
    pub fn new() -> Self {
        let mut config = RouterConfig::default();
        config.buckets.source = "in".to_string();
        config.buckets.destination = "in-classified".to_string();
        config.buckets.output = "out".to_string();

        Self {
            queue: Arc::new(InMemoryQueue::new(Duration::from_secs(
                config.queues.visibility_timeout_secs,
            ))),
            objects: Arc::new(InMemoryObjectStore::new()),
            jobs: Arc::new(InMemoryJobStore::new()),
            engine: Arc::new(InMemoryClassifier::new()),
            config,
            stats: Arc::new(PipelineStats::new()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            queue: self.queue.clone(),
            objects: self.objects.clone(),
            jobs: self.jobs.clone(),
            engine: self.engine.clone(),
        }
    }

    pub fn dispatcher(&self) -> BatchDispatcher {
        BatchDispatcher::new(&self.backends(), &self.config, self.stats.clone())
    }

    pub fn tracker(&self) -> JobStatusTracker {
        JobStatusTracker::new(&self.backends(), &self.config, self.stats.clone())
    }

    pub fn mover(&self) -> MoveCoordinator {
        MoveCoordinator::new(&self.backends(), &self.config, self.stats.clone())
    }

    pub async fn send_ingest(&self, body: &str) {
        self.queue
            .send(&self.config.queues.ingest, body)
            .await
            .unwrap();
    }

    /// Queue an object-created event for `bucket/key`
    pub async fn send_event(&self, queue: &str, bucket: &str, key: &str) {
        let body = serde_json::json!({
            "Records": [{"s3": {"bucket": {"name": bucket}, "object": {"key": key}}}]
        });
        self.queue.send(queue, &body.to_string()).await.unwrap();
    }
}
