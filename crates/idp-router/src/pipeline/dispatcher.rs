//! Batch dispatcher: document notifications -> classification jobs + job records
//!
//! Notifications sharing a storage prefix are classified by one job. A dispatch cycle drains
//! the ingest queue with a single [`DispatchContext`] so that documents of the same prefix
//! arriving over several receive batches still share one job; the context is dropped when
//! the cycle ends.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{BucketConfig, ClassifierConfig, DispatchConfig, QueueConfig, RouterConfig, TrackerMode};
use crate::error::Result;
use crate::processing::{PipelineStage, PipelineStats, VisibilityHeartbeat};
use crate::providers::{ClassificationEngine, JobStore, QueueClient, QueueMessage, SubmitJobRequest};
use crate::types::{BatchKey, DocumentNotification, JobRecord, JobSubmittedNotice};

use super::Backends;

/// Job assignments made during one dispatch cycle.
///
/// Keyed by source bucket and [`BatchKey`]; never shared between cycles or workers.
#[derive(Debug, Default)]
pub struct DispatchContext {
    assignments: HashMap<(String, BatchKey), String>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job already resolved for this prefix in the current cycle
    pub fn job_for(&self, bucket: &str, batch_key: &BatchKey) -> Option<&str> {
        self.assignments
            .get(&(bucket.to_string(), batch_key.clone()))
            .map(String::as_str)
    }

    pub fn assign(&mut self, bucket: &str, batch_key: BatchKey, job_id: String) {
        self.assignments.insert((bucket.to_string(), batch_key), job_id);
    }

    /// Number of jobs resolved in this cycle
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Outcome of one `dispatch` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Prefix groups seen
    pub groups: usize,
    /// Jobs submitted (groups not already resolved in the cycle)
    pub jobs_submitted: usize,
    /// Messages recorded and deleted
    pub acknowledged: usize,
    /// Malformed messages left on the queue
    pub malformed: usize,
}

struct Group<'a> {
    bucket: String,
    batch_key: BatchKey,
    members: Vec<(DocumentNotification, &'a QueueMessage)>,
}

/// Groups document notifications by prefix and starts one classification job per group
pub struct BatchDispatcher {
    queue: Arc<dyn QueueClient>,
    jobs: Arc<dyn JobStore>,
    engine: Arc<dyn ClassificationEngine>,
    queues: QueueConfig,
    buckets: BucketConfig,
    classifier: ClassifierConfig,
    dispatch: DispatchConfig,
    tracker_mode: TrackerMode,
    stats: Arc<PipelineStats>,
}

impl BatchDispatcher {
    pub fn new(backends: &Backends, config: &RouterConfig, stats: Arc<PipelineStats>) -> Self {
        Self {
            queue: backends.queue.clone(),
            jobs: backends.jobs.clone(),
            engine: backends.engine.clone(),
            queues: config.queues.clone(),
            buckets: config.buckets.clone(),
            classifier: config.classifier.clone(),
            dispatch: config.dispatch.clone(),
            tracker_mode: config.tracker.mode,
            stats,
        }
    }

    /// `<prefix>-<YYYYmmdd-HHMMSS>-<8 hex>`
    pub fn job_name(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            self.dispatch.job_name_prefix,
            Utc::now().format("%Y%m%d-%H%M%S"),
            &suffix[..8]
        )
    }

    /// Dispatch one received batch.
    ///
    /// Malformed messages are logged and left on the queue. Each prefix group is resolved to
    /// a job (reusing the cycle's assignment when present), then every member gets its
    /// [`JobRecord`] written before its message is deleted. The first failing group aborts the
    /// batch: its unacknowledged messages and those of every later group are left for
    /// redelivery, and no further jobs are submitted.
    pub async fn dispatch(&self, ctx: &mut DispatchContext, messages: &[QueueMessage]) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        let mut groups: Vec<Group<'_>> = Vec::new();
        let mut index: HashMap<(String, BatchKey), usize> = HashMap::new();

        for message in messages {
            let notification = match DocumentNotification::parse(&message.message_id, &message.body) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(
                        "[{}] Malformed notification left unacknowledged (delivery {}): {}",
                        message.message_id,
                        message.receive_count,
                        e
                    );
                    self.stats.dispatch.skipped();
                    report.malformed += 1;
                    continue;
                }
            };

            let group_key = (notification.bucket.clone(), notification.batch_key());
            let slot = *index.entry(group_key.clone()).or_insert_with(|| {
                groups.push(Group {
                    bucket: group_key.0.clone(),
                    batch_key: group_key.1.clone(),
                    members: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].members.push((notification, message));
        }

        report.groups = groups.len();

        for group in groups {
            if let Err(e) = self.dispatch_group(ctx, &group, &mut report).await {
                tracing::error!(
                    "[{}/{}] Group of {} notifications not dispatched, abandoning the rest of the batch: {}",
                    group.bucket,
                    group.batch_key,
                    group.members.len(),
                    e
                );
                self.stats.dispatch.failed();
                return Err(e);
            }
        }

        Ok(report)
    }

    async fn dispatch_group(
        &self,
        ctx: &mut DispatchContext,
        group: &Group<'_>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let job_id = match ctx.job_for(&group.bucket, &group.batch_key) {
            Some(job_id) => {
                tracing::debug!(
                    "[{}/{}] Reusing job {} from this cycle",
                    group.bucket,
                    group.batch_key,
                    job_id
                );
                job_id.to_string()
            }
            None => {
                let job_id = self.submit(&group.bucket, &group.batch_key).await?;
                ctx.assign(&group.bucket, group.batch_key.clone(), job_id.clone());
                report.jobs_submitted += 1;
                job_id
            }
        };

        for (notification, message) in &group.members {
            let record = JobRecord::for_notification(notification, job_id.clone());
            self.jobs.put_item(&record).await?;
            self.queue.delete(&self.queues.ingest, &message.receipt_handle).await?;

            self.stats.dispatch.acknowledged();
            report.acknowledged += 1;
            tracing::info!(
                "[{}] Assigned to job {} (prefix '{}')",
                record.filename,
                job_id,
                record.prefix
            );
        }

        Ok(())
    }

    /// Start a job over `<scheme>://<bucket>/<prefix>/`
    async fn submit(&self, bucket: &str, batch_key: &BatchKey) -> Result<String> {
        let request = SubmitJobRequest {
            job_name: self.job_name(),
            input_uri: self.buckets.uri(bucket, &batch_key.as_dir()),
            classifier: self.classifier.classifier_ref.clone(),
            output_uri: self.buckets.uri(&self.buckets.output, &self.classifier.output_prefix),
            data_access_role: self.classifier.data_access_role.clone(),
        };

        let job_id = self.engine.submit_job(&request).await?;
        self.stats.job_submitted();
        tracing::info!(
            "[{}] Classification job {} started for {}",
            request.job_name,
            job_id,
            request.input_uri
        );

        if self.tracker_mode == TrackerMode::Poll {
            let notice = JobSubmittedNotice {
                job_id: job_id.clone(),
                bucket: bucket.to_string(),
                prefix: batch_key.as_str().to_string(),
                submitted_at: Utc::now(),
            };
            let body = serde_json::to_string(&notice)?;
            self.queue.send(&self.queues.job_status, &body).await?;
        }

        Ok(job_id)
    }

    /// Drain the ingest queue under one dispatch context.
    ///
    /// Stops at an empty receive, after `max_batches_per_cycle` batches, on cancellation, or
    /// on the first failing batch.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut ctx = DispatchContext::new();
        let mut handled = 0;

        for _ in 0..self.dispatch.max_batches_per_cycle {
            if cancel.is_cancelled() {
                break;
            }

            let messages = self
                .queue
                .receive_batch(&self.queues.ingest, self.queues.max_messages)
                .await?;
            if messages.is_empty() {
                break;
            }
            self.stats.dispatch.received(messages.len() as u64);
            handled += messages.len();

            let heartbeat = VisibilityHeartbeat::start(
                self.queue.clone(),
                self.queues.ingest.clone(),
                messages.iter().map(|m| m.receipt_handle.clone()).collect(),
                Duration::from_secs(self.queues.heartbeat_secs),
                self.queues.visibility_timeout_secs,
            );
            let result = self.dispatch(&mut ctx, &messages).await;
            heartbeat.stop().await;

            let report = result?;
            tracing::debug!(
                "Dispatched batch: {} groups, {} new jobs, {} acknowledged, {} malformed",
                report.groups,
                report.jobs_submitted,
                report.acknowledged,
                report.malformed
            );
        }

        if handled > 0 {
            tracing::info!(
                "Dispatch cycle finished: {} messages, {} jobs resolved",
                handled,
                ctx.len()
            );
        }
        Ok(handled)
    }
}

#[async_trait]
impl PipelineStage for BatchDispatcher {
    fn name(&self) -> &str {
        "dispatch"
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize> {
        BatchDispatcher::run_cycle(self, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::testing::MemoryBackends;
    use std::sync::atomic::Ordering;

    fn notification(bucket: &str, key: &str) -> String {
        DocumentNotification::new(bucket, key).to_body().unwrap()
    }

    async fn receive_all(env: &MemoryBackends) -> Vec<QueueMessage> {
        env.queue
            .receive_batch(&env.config.queues.ingest, 10)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_siblings_share_one_job() {
        let env = MemoryBackends::new();
        env.send_ingest(&notification("in", "landing/acme/2024-01/doc1.pdf")).await;
        env.send_ingest(&notification("in", "landing/acme/2024-01/doc2.pdf")).await;

        let dispatcher = env.dispatcher();
        let mut ctx = DispatchContext::new();
        let report = dispatcher.dispatch(&mut ctx, &receive_all(&env).await).await.unwrap();

        assert_eq!(report.jobs_submitted, 1);
        assert_eq!(report.acknowledged, 2);

        let doc1 = env.jobs.record("in", "doc1.pdf").unwrap();
        assert_eq!(doc1.prefix, "landing/acme/2024-01");
        assert_eq!(doc1.key, "landing/acme/2024-01/doc1.pdf");
        assert_eq!(doc1.job_name, "J1");
        assert_eq!(env.jobs.record("in", "doc2.pdf").unwrap().job_name, "J1");

        let submitted = env.engine.submitted();
        assert_eq!(submitted[0].input_uri, "s3://in/landing/acme/2024-01/");
        assert!(submitted[0].job_name.starts_with("document-classification-"));
        assert!(env.queue.is_empty(&env.config.queues.ingest));
    }

    #[tokio::test]
    async fn test_one_submission_per_distinct_prefix() {
        let env = MemoryBackends::new();
        for key in [
            "landing/a/1.pdf",
            "landing/b/2.pdf",
            "landing/a/3.pdf",
            "landing/c/4.pdf",
            "landing/b/5.pdf",
        ] {
            env.send_ingest(&notification("in", key)).await;
        }

        let dispatcher = env.dispatcher();
        let mut ctx = DispatchContext::new();
        dispatcher.dispatch(&mut ctx, &receive_all(&env).await).await.unwrap();

        assert_eq!(env.engine.submit_count(), 3);
        assert_eq!(ctx.len(), 3);
        assert_eq!(env.jobs.len(), 5);
        assert_eq!(
            env.jobs.record("in", "1.pdf").unwrap().job_name,
            env.jobs.record("in", "3.pdf").unwrap().job_name
        );
    }

    #[tokio::test]
    async fn test_cycle_reuses_job_across_receive_batches() {
        let env = MemoryBackends::new();
        for i in 0..23 {
            env.send_ingest(&notification("in", &format!("landing/big/doc{}.pdf", i))).await;
        }

        let dispatcher = env.dispatcher();
        let handled = dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(handled, 23);
        assert_eq!(env.engine.submit_count(), 1);
        assert_eq!(env.jobs.len(), 23);
        assert_eq!(env.stats.snapshot().dispatch.acknowledged, 23);
    }

    #[tokio::test]
    async fn test_separate_cycles_submit_separate_jobs() {
        let env = MemoryBackends::new();
        let dispatcher = env.dispatcher();

        env.send_ingest(&notification("in", "landing/acme/doc1.pdf")).await;
        dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        env.send_ingest(&notification("in", "landing/acme/doc2.pdf")).await;
        dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(env.engine.submit_count(), 2);
        assert_eq!(env.jobs.record("in", "doc2.pdf").unwrap().job_name, "J2");
    }

    #[tokio::test]
    async fn test_record_written_before_ack_survives_failed_delete() {
        let env = MemoryBackends::new();
        env.send_ingest(&notification("in", "landing/acme/doc1.pdf")).await;
        env.queue.fail_deletes.store(true, Ordering::SeqCst);

        let dispatcher = env.dispatcher();
        let mut ctx = DispatchContext::new();
        let err = dispatcher
            .dispatch(&mut ctx, &receive_all(&env).await)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Queue(_)));

        // Crash between put and ack: record exists, message still queued
        assert!(env.jobs.record("in", "doc1.pdf").is_some());
        assert_eq!(env.queue.len(&env.config.queues.ingest), 1);

        // Redelivery rewrites the same record and acks
        env.queue.fail_deletes.store(false, Ordering::SeqCst);
        env.queue.expire_visibility(&env.config.queues.ingest);
        dispatcher.dispatch(&mut ctx, &receive_all(&env).await).await.unwrap();
        assert_eq!(env.jobs.len(), 1);
        assert!(env.queue.is_empty(&env.config.queues.ingest));
        // Same cycle, same job
        assert_eq!(env.engine.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_put_never_acks() {
        let env = MemoryBackends::new();
        env.send_ingest(&notification("in", "landing/acme/doc1.pdf")).await;
        env.jobs.fail_puts.store(true, Ordering::SeqCst);

        let dispatcher = env.dispatcher();
        let mut ctx = DispatchContext::new();
        assert!(dispatcher.dispatch(&mut ctx, &receive_all(&env).await).await.is_err());

        assert!(env.jobs.is_empty());
        assert_eq!(env.queue.len(&env.config.queues.ingest), 1);
    }

    #[tokio::test]
    async fn test_failing_group_aborts_later_groups() {
        let env = MemoryBackends::new();
        env.send_ingest(&notification("in", "landing/a/1.pdf")).await;
        env.send_ingest(&notification("in", "landing/b/2.pdf")).await;
        env.send_ingest(&notification("in", "landing/b/3.pdf")).await;
        env.jobs.fail_puts.store(true, Ordering::SeqCst);

        let dispatcher = env.dispatcher();
        let mut ctx = DispatchContext::new();
        let err = dispatcher
            .dispatch(&mut ctx, &receive_all(&env).await)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::JobStore(_)));
        // Only the first prefix got a job; landing/b was never submitted
        assert_eq!(env.engine.submit_count(), 1);
        assert_eq!(env.engine.submitted()[0].input_uri, "s3://in/landing/a/");
        assert!(ctx.job_for("in", &BatchKey::from_key("landing/b/2.pdf")).is_none());
        assert!(env.jobs.is_empty());
        assert_eq!(env.queue.len(&env.config.queues.ingest), 3);
        assert_eq!(env.stats.snapshot().dispatch.failed, 1);
    }

    #[tokio::test]
    async fn test_submission_failure_writes_nothing_for_group() {
        let env = MemoryBackends::new();
        env.send_ingest(&notification("in", "landing/acme/doc1.pdf")).await;
        env.send_ingest(&notification("in", "landing/acme/doc2.pdf")).await;
        env.engine.fail_submits.store(true, Ordering::SeqCst);

        let dispatcher = env.dispatcher();
        let mut ctx = DispatchContext::new();
        let err = dispatcher
            .dispatch(&mut ctx, &receive_all(&env).await)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SubmissionFailed { .. }));
        assert!(env.jobs.is_empty());
        assert!(ctx.is_empty());
        assert_eq!(env.queue.len(&env.config.queues.ingest), 2);
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_block_siblings() {
        let env = MemoryBackends::new();
        env.send_ingest("{not json").await;
        env.send_ingest(&notification("in", "landing/acme/")).await;
        env.send_ingest(&notification("in", "landing/acme/doc1.pdf")).await;

        let dispatcher = env.dispatcher();
        let mut ctx = DispatchContext::new();
        let report = dispatcher.dispatch(&mut ctx, &receive_all(&env).await).await.unwrap();

        assert_eq!(report.malformed, 2);
        assert_eq!(report.acknowledged, 1);
        // Malformed messages stay for inspection
        assert_eq!(env.queue.len(&env.config.queues.ingest), 2);
    }

    #[tokio::test]
    async fn test_event_envelope_notification() {
        let env = MemoryBackends::new();
        let body = r#"{"Records":[{"s3":{"bucket":{"name":"in"},"object":{"key":"landing/x/scan.pdf"}}}]}"#;
        env.send_ingest(body).await;

        let dispatcher = env.dispatcher();
        dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(env.jobs.record("in", "scan.pdf").unwrap().prefix, "landing/x");
    }

    #[tokio::test]
    async fn test_poll_mode_publishes_job_notice() {
        let mut env = MemoryBackends::new();
        env.config.tracker.mode = TrackerMode::Poll;
        env.send_ingest(&notification("in", "landing/acme/doc1.pdf")).await;

        let dispatcher = env.dispatcher();
        dispatcher.run_cycle(&CancellationToken::new()).await.unwrap();

        let bodies = env.queue.bodies(&env.config.queues.job_status);
        assert_eq!(bodies.len(), 1);
        let notice: JobSubmittedNotice = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(notice.job_id, "J1");
        assert_eq!(notice.prefix, "landing/acme");
    }

    #[test]
    fn test_job_name_format() {
        let env = MemoryBackends::new();
        let name = env.dispatcher().job_name();
        let parts: Vec<&str> = name.rsplitn(3, '-').collect();
        assert_eq!(parts[0].len(), 8);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[1].len(), 6);
        assert!(name.starts_with("document-classification-2"));
    }
}
