//! Move coordinator: routing messages -> classified documents
//!
//! Per document the order is fixed: look up the job record, confirm the source exists, copy
//! to the destination, delete the job record, delete the routing message. Every step is
//! idempotent, so a redelivery after a crash at any point is safe: either the record is gone
//! (SKIPPED) or the copy and record delete simply run again.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::{BucketConfig, MoverConfig, QueueConfig, RouterConfig};
use crate::error::{Error, Result};
use crate::processing::{PipelineStage, PipelineStats, VisibilityHeartbeat};
use crate::providers::{JobStore, ObjectStore, QueueClient, QueueMessage};
use crate::types::{JobKey, RoutingMessage};

use super::Backends;

/// Result of handling one routing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Copied, record retired, message acknowledged
    Moved { destination_key: String },
    /// No job record; message left unacknowledged
    Skipped,
}

/// Copies classified documents to their destination and retires their job records
pub struct MoveCoordinator {
    queue: Arc<dyn QueueClient>,
    objects: Arc<dyn ObjectStore>,
    jobs: Arc<dyn JobStore>,
    queues: QueueConfig,
    buckets: BucketConfig,
    mover: MoverConfig,
    parallel_keys: usize,
    stats: Arc<PipelineStats>,
}

impl MoveCoordinator {
    pub fn new(backends: &Backends, config: &RouterConfig, stats: Arc<PipelineStats>) -> Self {
        let parallel_keys = config
            .mover
            .parallel_keys
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1);

        Self {
            queue: backends.queue.clone(),
            objects: backends.objects.clone(),
            jobs: backends.jobs.clone(),
            queues: config.queues.clone(),
            buckets: config.buckets.clone(),
            mover: config.mover.clone(),
            parallel_keys,
            stats,
        }
    }

    /// `classified/<prefix without landing/>/<classification>/<file_name>`
    ///
    /// The prefix must be the landing directory itself or lie beneath it. The bare landing
    /// directory is accepted on purpose: files uploaded through a presigned URL land at
    /// `landing/<file>` and route to `classified/<classification>/<file_name>`.
    pub fn destination_key(&self, prefix: &str, classification: &str, file_name: &str) -> Result<String> {
        let landing_dir = self.mover.landing_prefix.trim_end_matches('/');

        let rest = if prefix == landing_dir {
            ""
        } else if let Some(rest) = prefix.strip_prefix(self.mover.landing_prefix.as_str()) {
            rest.trim_matches('/')
        } else {
            return Err(Error::invalid_key(
                prefix,
                format!("expected a prefix under '{}'", self.mover.landing_prefix),
            ));
        };

        Ok(if rest.is_empty() {
            format!("{}/{}/{}", self.mover.classified_prefix, classification, file_name)
        } else {
            format!(
                "{}/{}/{}/{}",
                self.mover.classified_prefix, rest, classification, file_name
            )
        })
    }

    /// Move one document and acknowledge its routing message.
    ///
    /// A missing job record returns [`MoveOutcome::Skipped`] without acknowledging. A missing
    /// source object, a bad prefix or any backend error is returned as an error and the
    /// message is left for redelivery.
    pub async fn handle_routing_message(&self, msg: &RoutingMessage, receipt_handle: &str) -> Result<MoveOutcome> {
        let key = JobKey::new(self.buckets.source.clone(), msg.file_name.clone());

        let Some(record) = self.jobs.get_item(&key).await? else {
            tracing::warn!(
                "[{}] No job record in '{}'; routing message to '{}' left for inspection",
                msg.file_name,
                self.buckets.source,
                msg.classification
            );
            self.stats.mover.skipped();
            return Ok(MoveOutcome::Skipped);
        };

        let destination_key = self.destination_key(&record.prefix, &msg.classification, &msg.file_name)?;

        if !self.objects.head_exists(&record.bucket, &record.key).await? {
            return Err(Error::ObjectNotFound {
                bucket: record.bucket.clone(),
                key: record.key.clone(),
            });
        }

        self.objects
            .copy(&record.bucket, &record.key, &self.buckets.destination, &destination_key)
            .await?;
        tracing::info!(
            "[{}] Copied to {}/{} (class '{}', score {:.4})",
            msg.file_name,
            self.buckets.destination,
            destination_key,
            msg.classification,
            msg.score
        );

        self.jobs.delete_item(&key).await?;
        self.queue.delete(&self.queues.routing, receipt_handle).await?;

        self.stats.document_moved();
        self.stats.mover.acknowledged();
        Ok(MoveOutcome::Moved { destination_key })
    }

    /// Handle a received batch.
    ///
    /// Messages for the same file run one after another; distinct files run concurrently up
    /// to `parallel_keys`. Returns one result per message, in batch order.
    pub async fn handle_batch(&self, messages: &[QueueMessage]) -> Vec<Result<MoveOutcome>> {
        let mut outcomes: Vec<Option<Result<MoveOutcome>>> = messages.iter().map(|_| None).collect();
        let mut by_file: Vec<(String, Vec<(usize, RoutingMessage, &QueueMessage)>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (i, message) in messages.iter().enumerate() {
            match RoutingMessage::parse(&message.message_id, &message.body) {
                Ok(parsed) => {
                    let slot = *index.entry(parsed.file_name.clone()).or_insert_with(|| {
                        by_file.push((parsed.file_name.clone(), Vec::new()));
                        by_file.len() - 1
                    });
                    by_file[slot].1.push((i, parsed, message));
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] Malformed routing message left unacknowledged (delivery {}): {}",
                        message.message_id,
                        message.receive_count,
                        e
                    );
                    self.stats.mover.skipped();
                    outcomes[i] = Some(Err(e));
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.parallel_keys));
        let group_futures: Vec<_> = by_file
            .into_iter()
            .map(|(file_name, group)| {
                let sem = semaphore.clone();
                async move {
                    let _permit = sem.acquire().await;
                    let mut results = Vec::with_capacity(group.len());
                    for (i, parsed, message) in group {
                        let result = self.handle_routing_message(&parsed, &message.receipt_handle).await;
                        if let Err(e) = &result {
                            tracing::error!(
                                "[{}] Move failed (delivery {}): {}",
                                file_name,
                                message.receive_count,
                                e
                            );
                            self.stats.mover.failed();
                        }
                        results.push((i, result));
                    }
                    results
                }
            })
            .collect();

        for (i, result) in join_all(group_futures).await.into_iter().flatten() {
            outcomes[i] = Some(result);
        }

        outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err(Error::internal("message was not handled"))))
            .collect()
    }

    /// Receive one batch from the routing queue and move what it names
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize> {
        if cancel.is_cancelled() {
            return Ok(0);
        }

        let messages = self
            .queue
            .receive_batch(&self.queues.routing, self.queues.max_messages)
            .await?;
        if messages.is_empty() {
            return Ok(0);
        }
        self.stats.mover.received(messages.len() as u64);

        let heartbeat = VisibilityHeartbeat::start(
            self.queue.clone(),
            self.queues.routing.clone(),
            messages.iter().map(|m| m.receipt_handle.clone()).collect(),
            Duration::from_secs(self.queues.heartbeat_secs),
            self.queues.visibility_timeout_secs,
        );
        let results = self.handle_batch(&messages).await;
        heartbeat.stop().await;

        let moved = results
            .iter()
            .filter(|r| matches!(r, Ok(MoveOutcome::Moved { .. })))
            .count();
        tracing::info!(
            "Move batch finished: {} of {} messages moved",
            moved,
            messages.len()
        );
        Ok(messages.len())
    }
}

#[async_trait]
impl PipelineStage for MoveCoordinator {
    fn name(&self) -> &str {
        "move"
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize> {
        MoveCoordinator::run_cycle(self, cancel).await
    }
}
