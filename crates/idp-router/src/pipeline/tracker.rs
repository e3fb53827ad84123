//! Job status tracker: finished classification jobs -> routing messages
//!
//! Two triggers lead to the same emission path:
//! - archive notifications: the engine writes `output.tar.gz` and the object-created event
//!   lands on the output queue
//! - status polling: a [`JobSubmittedNotice`] per job, checked with [`JobStatusTracker::poll_step`]
//!   each time the notice becomes visible again

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{QueueConfig, RouterConfig, TrackerConfig, TrackerMode};
use crate::error::{Error, Result};
use crate::processing::{PipelineStage, PipelineStats, VisibilityHeartbeat};
use crate::providers::{
    ClassificationEngine, ClassificationJobStatus, JobDescription, ObjectStore, QueueClient,
    QueueMessage,
};
use crate::types::{ClassificationResult, DocumentNotification, JobSubmittedNotice, RoutingMessage};

use super::archive;
use super::Backends;

/// Result of one status check
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// Job still running; check again after the poll interval
    Pending(ClassificationJobStatus),
    /// Job finished successfully
    Completed(JobDescription),
    /// Job reached a terminal failure state
    Failed { status: ClassificationJobStatus, message: String },
}

/// What happened to one tracker queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Routing messages were emitted and the message acknowledged
    Emitted(usize),
    /// Not an output archive; acknowledged without work
    Ignored,
    /// Job still running; message left to become visible again
    Pending,
    /// Terminal job failure or poll deadline; acknowledged after logging
    Abandoned,
}

/// Keep only candidates above the acceptance threshold, in their original order
pub fn qualifying(results: Vec<ClassificationResult>) -> Vec<RoutingMessage> {
    results
        .into_iter()
        .filter(ClassificationResult::qualifies)
        .map(RoutingMessage::from)
        .collect()
}

/// Split `<scheme>://<bucket>/<key>`
pub fn split_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| Error::invalid_key(uri, "missing scheme"))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| Error::invalid_key(uri, "missing object key"))?;
    if bucket.is_empty() {
        return Err(Error::invalid_key(uri, "empty bucket"));
    }
    Ok((bucket.to_string(), key.to_string()))
}

/// Turns finished classification jobs into routing messages
pub struct JobStatusTracker {
    queue: Arc<dyn QueueClient>,
    objects: Arc<dyn ObjectStore>,
    engine: Arc<dyn ClassificationEngine>,
    queues: QueueConfig,
    tracker: TrackerConfig,
    stats: Arc<PipelineStats>,
}

impl JobStatusTracker {
    pub fn new(backends: &Backends, config: &RouterConfig, stats: Arc<PipelineStats>) -> Self {
        Self {
            queue: backends.queue.clone(),
            objects: backends.objects.clone(),
            engine: backends.engine.clone(),
            queues: config.queues.clone(),
            tracker: config.tracker.clone(),
            stats,
        }
    }

    /// Every classification candidate in an output archive
    pub fn extract_results(&self, archive_bytes: &[u8]) -> Result<Vec<ClassificationResult>> {
        archive::extract_results(archive_bytes, &self.tracker.result_suffix)
    }

    /// Send one routing message per qualifying result; returns how many were sent
    pub async fn emit(&self, results: Vec<ClassificationResult>) -> Result<usize> {
        let messages = qualifying(results);
        for message in &messages {
            self.queue
                .send(&self.queues.routing, &message.to_body()?)
                .await?;
            tracing::info!(
                "[{}] Routed to '{}' (score {:.4})",
                message.file_name,
                message.classification,
                message.score
            );
        }
        self.stats.routing_emitted(messages.len() as u64);
        Ok(messages.len())
    }

    /// Fetch an output archive and emit its qualifying results
    pub async fn process_archive(&self, bucket: &str, key: &str) -> Result<usize> {
        let bytes = self.objects.get(bucket, key).await?;
        let results = self.extract_results(&bytes)?;
        tracing::info!(
            "[{}/{}] Archive holds {} classification candidates",
            bucket,
            key,
            results.len()
        );
        self.emit(results).await
    }

    fn archive_location(&self, description: &JobDescription) -> Result<(String, String)> {
        let location = description.output_location.as_deref().ok_or_else(|| {
            Error::classifier(format!("job {} completed without an output location", description.job_id))
        })?;
        let (bucket, key) = split_uri(location)?;
        if key.ends_with(&self.tracker.archive_suffix) {
            Ok((bucket, key))
        } else if key.is_empty() || key.ends_with('/') {
            Ok((bucket, format!("{}{}", key, self.tracker.archive_suffix)))
        } else {
            Ok((bucket, format!("{}/{}", key, self.tracker.archive_suffix)))
        }
    }

    async fn emit_completed(&self, description: &JobDescription) -> Result<usize> {
        let (bucket, key) = self.archive_location(description)?;
        self.process_archive(&bucket, &key).await
    }

    /// Emit routing messages for a job that has already finished
    pub async fn on_completion(&self, job_id: &str) -> Result<usize> {
        let description = self.engine.describe_job(job_id).await?;
        match description.status {
            ClassificationJobStatus::Completed => self.emit_completed(&description).await,
            ClassificationJobStatus::Failed | ClassificationJobStatus::Stopped => {
                Err(Error::ClassificationJobFailed {
                    job_id: job_id.to_string(),
                    message: description
                        .message
                        .unwrap_or_else(|| format!("{:?}", description.status)),
                })
            }
            status => Err(Error::classifier(format!(
                "job {} has not finished ({:?})",
                job_id, status
            ))),
        }
    }

    /// One status check. `waited` is the time since the job was submitted; past the
    /// configured ceiling a still-running job is a [`Error::PollTimeout`].
    pub async fn poll_step(&self, job_id: &str, waited: Duration) -> Result<PollStep> {
        let description = self.engine.describe_job(job_id).await?;
        let status = description.status;

        if !status.is_terminal() {
            if waited.as_secs() >= self.tracker.max_wait_secs {
                return Err(Error::PollTimeout {
                    job_id: job_id.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }
            return Ok(PollStep::Pending(status));
        }

        Ok(match status {
            ClassificationJobStatus::Completed => PollStep::Completed(description),
            status => PollStep::Failed {
                status,
                message: description
                    .message
                    .unwrap_or_else(|| "no reason given".to_string()),
            },
        })
    }

    /// Check the job every poll interval until it finishes, the ceiling passes or `cancel` fires
    pub async fn wait_for_completion(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobDescription> {
        let started = tokio::time::Instant::now();
        let interval = Duration::from_secs(self.tracker.poll_interval_secs);

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(format!("waiting for job {}", job_id)));
            }

            match self.poll_step(job_id, started.elapsed()).await? {
                PollStep::Completed(description) => return Ok(description),
                PollStep::Failed { message, .. } => {
                    return Err(Error::ClassificationJobFailed {
                        job_id: job_id.to_string(),
                        message,
                    })
                }
                PollStep::Pending(status) => {
                    tracing::debug!("[{}] Job is {:?}, next check in {:?}", job_id, status, interval);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled(format!("waiting for job {}", job_id)));
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Wait for a job and emit its results
    pub async fn track_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<usize> {
        let description = self.wait_for_completion(job_id, cancel).await?;
        self.emit_completed(&description).await
    }

    /// Handle one object-created notification from the output queue.
    ///
    /// Keys that are not output archives are acknowledged and ignored. Any failure leaves the
    /// message for redelivery.
    pub async fn handle_output_notification(&self, message: &QueueMessage) -> Result<TrackOutcome> {
        let notifications = DocumentNotification::from_event(&message.body).map_err(|e| {
            Error::malformed(&message.message_id, format!("invalid output notification: {}", e))
        })?;

        let mut emitted = 0;
        let mut archives = 0;
        for notification in &notifications {
            if !notification.key.ends_with(&self.tracker.archive_suffix) {
                tracing::info!(
                    "[{}] Skipping object, not a classification output archive",
                    notification.key
                );
                continue;
            }
            archives += 1;
            emitted += self
                .process_archive(&notification.bucket, &notification.key)
                .await?;
        }

        self.queue
            .delete(&self.queues.output, &message.receipt_handle)
            .await?;
        self.stats.tracker.acknowledged();

        Ok(if archives == 0 {
            TrackOutcome::Ignored
        } else {
            TrackOutcome::Emitted(emitted)
        })
    }

    /// Handle one job-submitted notice from the job-status queue.
    ///
    /// A running job's notice gets its visibility pushed out by the poll interval so it comes
    /// back for the next check. Completed jobs are emitted then acknowledged; failed jobs and
    /// expired deadlines are logged and acknowledged.
    pub async fn handle_job_notice(&self, message: &QueueMessage) -> Result<TrackOutcome> {
        let notice: JobSubmittedNotice = serde_json::from_str(&message.body).map_err(|e| {
            Error::malformed(&message.message_id, format!("invalid job notice: {}", e))
        })?;

        let waited = (Utc::now() - notice.submitted_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let outcome = match self.poll_step(&notice.job_id, waited).await {
            Ok(PollStep::Pending(status)) => {
                self.queue
                    .extend_visibility(
                        &self.queues.job_status,
                        &message.receipt_handle,
                        self.tracker.poll_interval_secs,
                    )
                    .await?;
                tracing::debug!("[{}] Job still {:?}", notice.job_id, status);
                return Ok(TrackOutcome::Pending);
            }
            Ok(PollStep::Completed(description)) => {
                let emitted = self.emit_completed(&description).await?;
                tracing::info!(
                    "[{}] Job for '{}' completed: {} routing messages",
                    notice.job_id,
                    notice.prefix,
                    emitted
                );
                TrackOutcome::Emitted(emitted)
            }
            Ok(PollStep::Failed { status, message: reason }) => {
                tracing::error!(
                    "[{}] Job for '{}/{}' ended {:?}: {}",
                    notice.job_id,
                    notice.bucket,
                    notice.prefix,
                    status,
                    reason
                );
                self.stats.tracker.failed();
                TrackOutcome::Abandoned
            }
            Err(e @ Error::PollTimeout { .. }) => {
                tracing::error!("[{}] Giving up on '{}': {}", notice.job_id, notice.prefix, e);
                self.stats.tracker.failed();
                TrackOutcome::Abandoned
            }
            Err(e) => return Err(e),
        };

        self.queue
            .delete(&self.queues.job_status, &message.receipt_handle)
            .await?;
        self.stats.tracker.acknowledged();
        Ok(outcome)
    }

    async fn handle(&self, message: &QueueMessage) -> Result<TrackOutcome> {
        match self.tracker.mode {
            TrackerMode::ArchiveNotification => self.handle_output_notification(message).await,
            TrackerMode::Poll => self.handle_job_notice(message).await,
        }
    }

    /// Receive one batch from the tracker's input queue and handle each message
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize> {
        let queue_name = match self.tracker.mode {
            TrackerMode::ArchiveNotification => self.queues.output.clone(),
            TrackerMode::Poll => self.queues.job_status.clone(),
        };
        if cancel.is_cancelled() {
            return Ok(0);
        }

        let messages = self
            .queue
            .receive_batch(&queue_name, self.queues.max_messages)
            .await?;
        if messages.is_empty() {
            return Ok(0);
        }
        self.stats.tracker.received(messages.len() as u64);

        // Poll notices use their own visibility as the timer
        let heartbeat = (self.tracker.mode == TrackerMode::ArchiveNotification).then(|| {
            VisibilityHeartbeat::start(
                self.queue.clone(),
                queue_name.clone(),
                messages.iter().map(|m| m.receipt_handle.clone()).collect(),
                Duration::from_secs(self.queues.heartbeat_secs),
                self.queues.visibility_timeout_secs,
            )
        });

        for message in &messages {
            match self.handle(message).await {
                Ok(outcome) => {
                    tracing::debug!("[{}] Tracker outcome: {:?}", message.message_id, outcome);
                }
                Err(e @ Error::MalformedMessage { .. }) => {
                    tracing::warn!("[{}] Left unacknowledged: {}", message.message_id, e);
                    self.stats.tracker.skipped();
                }
                Err(e) => {
                    tracing::error!(
                        "[{}] Tracker failed on '{}' (delivery {}): {}",
                        message.message_id,
                        queue_name,
                        message.receive_count,
                        e
                    );
                    self.stats.tracker.failed();
                }
            }
        }

        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        Ok(messages.len())
    }
}

#[async_trait]
impl PipelineStage for JobStatusTracker {
    fn name(&self) -> &str {
        "track"
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize> {
        JobStatusTracker::run_cycle(self, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::archive::{build_archive, ClassScore, ResultFile};
    use crate::pipeline::testing::MemoryBackends;
    use crate::providers::memory::InMemoryClassifier;

    fn archive_with(docs: &[(&str, &[(&str, f64)])]) -> Vec<u8> {
        let members: Vec<(String, Vec<u8>)> = docs
            .iter()
            .map(|(file, classes)| {
                let record = ResultFile {
                    file: file.to_string(),
                    classes: classes
                        .iter()
                        .map(|(n, s)| ClassScore {
                            name: n.to_string(),
                            score: *s,
                        })
                        .collect(),
                };
                (format!("{}.out", file), serde_json::to_vec(&record).unwrap())
            })
            .collect();
        let refs: Vec<(&str, &[u8])> = members
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice()))
            .collect();
        build_archive(&refs).unwrap()
    }

    fn routed(env: &MemoryBackends) -> Vec<RoutingMessage> {
        env.queue
            .bodies(&env.config.queues.routing)
            .iter()
            .map(|b| serde_json::from_str(b).unwrap())
            .collect()
    }

    #[test]
    fn test_threshold_is_strict() {
        let results = vec![
            ClassificationResult::new("a.pdf", "invoice", 0.8),
            ClassificationResult::new("b.pdf", "invoice", 0.80001),
            ClassificationResult::new("c.pdf", "invoice", 0.2),
        ];
        let routed = qualifying(results);
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].file_name, "b.pdf");
    }

    #[test]
    fn test_multiple_classes_keep_order() {
        let results = vec![
            ClassificationResult::new("a.pdf", "invoice", 0.9),
            ClassificationResult::new("a.pdf", "receipt", 0.85),
            ClassificationResult::new("a.pdf", "memo", 0.05),
        ];
        let routed = qualifying(results);
        let classes: Vec<&str> = routed.iter().map(|r| r.classification.as_str()).collect();
        assert_eq!(classes, vec!["invoice", "receipt"]);
    }

    #[test]
    fn test_split_uri() {
        assert_eq!(
            split_uri("s3://out/comprehend/J1/output/output.tar.gz").unwrap(),
            ("out".to_string(), "comprehend/J1/output/output.tar.gz".to_string())
        );
        assert!(split_uri("out/key").is_err());
        assert!(split_uri("s3://bucket-only").is_err());
    }

    #[tokio::test]
    async fn test_output_notification_emits_qualifying() {
        let env = MemoryBackends::new();
        let archive = archive_with(&[
            ("doc1.pdf", &[("invoice", 0.95), ("receipt", 0.1)]),
            ("doc2.pdf", &[("contract", 0.8)]),
        ]);
        env.objects
            .put("out", "comprehend/J1/output/output.tar.gz", &archive)
            .await
            .unwrap();
        env.send_event(&env.config.queues.output, "out", "comprehend/J1/output/output.tar.gz")
            .await;

        let tracker = env.tracker();
        let handled = tracker.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(handled, 1);
        assert_eq!(routed(&env), vec![RoutingMessage::new("doc1.pdf", "invoice", 0.95)]);
        assert!(env.queue.is_empty(&env.config.queues.output));
    }

    #[tokio::test]
    async fn test_non_archive_notification_is_ignored_and_acked() {
        let env = MemoryBackends::new();
        env.send_event(&env.config.queues.output, "out", "comprehend/J1/output/manifest.json")
            .await;

        let tracker = env.tracker();
        let message = env
            .queue
            .receive_batch(&env.config.queues.output, 1)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(
            tracker.handle_output_notification(&message).await.unwrap(),
            TrackOutcome::Ignored
        );
        assert!(env.queue.is_empty(&env.config.queues.output));
    }

    #[tokio::test]
    async fn test_missing_archive_is_not_acked() {
        let env = MemoryBackends::new();
        env.send_event(&env.config.queues.output, "out", "missing/output.tar.gz")
            .await;

        let tracker = env.tracker();
        tracker.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(env.queue.len(&env.config.queues.output), 1);
        assert_eq!(env.stats.snapshot().tracker.failed, 1);
    }

    #[tokio::test]
    async fn test_on_completion_uses_output_location() {
        let env = MemoryBackends::new();
        let archive = archive_with(&[("doc1.pdf", &[("invoice", 0.99)])]);
        env.objects
            .put("out", "comprehend/J1/output/output.tar.gz", &archive)
            .await
            .unwrap();
        env.engine.complete("J1", "s3://out/comprehend/J1/output/");

        let emitted = env.tracker().on_completion("J1").await.unwrap();
        assert_eq!(emitted, 1);
    }

    #[tokio::test]
    async fn test_on_completion_failed_job_emits_nothing() {
        let env = MemoryBackends::new();
        env.engine.fail("J1", "classifier not found");

        let err = env.tracker().on_completion("J1").await.unwrap_err();
        assert!(matches!(err, Error::ClassificationJobFailed { .. }));
        assert!(routed(&env).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion_polls_until_done() {
        let env = MemoryBackends::new();
        let done = JobDescription {
            job_id: "J1".to_string(),
            status: ClassificationJobStatus::Completed,
            output_location: Some("s3://out/J1/output.tar.gz".to_string()),
            labels: Vec::new(),
            message: None,
        };
        env.engine.script(
            "J1",
            vec![
                InMemoryClassifier::in_progress("J1"),
                InMemoryClassifier::in_progress("J1"),
                done.clone(),
            ],
        );

        let started = tokio::time::Instant::now();
        let description = env
            .tracker()
            .wait_for_completion("J1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(description, done);
        // Two intervals slept
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion_times_out() {
        let mut env = MemoryBackends::new();
        env.config.tracker.max_wait_secs = 60;
        env.engine.script("J1", vec![InMemoryClassifier::in_progress("J1")]);

        let err = env
            .tracker()
            .wait_for_completion("J1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PollTimeout { waited_secs: 60, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion_is_cancellable() {
        let env = MemoryBackends::new();
        env.engine.script("J1", vec![InMemoryClassifier::in_progress("J1")]);
        let tracker = env.tracker();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(35)).await;
            canceller.cancel();
        });

        let err = tracker.wait_for_completion("J1", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_poll_notice_lifecycle() {
        let mut env = MemoryBackends::new();
        env.config.tracker.mode = TrackerMode::Poll;
        let tracker = env.tracker();

        let notice = JobSubmittedNotice {
            job_id: "J1".to_string(),
            bucket: "in".to_string(),
            prefix: "landing/acme".to_string(),
            submitted_at: Utc::now(),
        };
        env.queue
            .send(&env.config.queues.job_status, &serde_json::to_string(&notice).unwrap())
            .await
            .unwrap();
        env.engine.script("J1", vec![InMemoryClassifier::in_progress("J1")]);

        // Running: stays queued
        tracker.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(env.queue.len(&env.config.queues.job_status), 1);

        // Completed: emitted and acknowledged
        let archive = archive_with(&[("doc1.pdf", &[("invoice", 0.97)])]);
        env.objects.put("out", "J1/output.tar.gz", &archive).await.unwrap();
        env.engine.complete("J1", "s3://out/J1/output.tar.gz");
        env.queue.expire_visibility(&env.config.queues.job_status);

        tracker.run_cycle(&CancellationToken::new()).await.unwrap();
        assert!(env.queue.is_empty(&env.config.queues.job_status));
        assert_eq!(routed(&env).len(), 1);
    }

    #[tokio::test]
    async fn test_poll_notice_for_failed_job_is_acked() {
        let mut env = MemoryBackends::new();
        env.config.tracker.mode = TrackerMode::Poll;
        let tracker = env.tracker();

        let notice = JobSubmittedNotice {
            job_id: "J1".to_string(),
            bucket: "in".to_string(),
            prefix: "landing/acme".to_string(),
            submitted_at: Utc::now(),
        };
        env.queue
            .send(&env.config.queues.job_status, &serde_json::to_string(&notice).unwrap())
            .await
            .unwrap();
        env.engine.fail("J1", "access denied");

        let message = env
            .queue
            .receive_batch(&env.config.queues.job_status, 1)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(
            tracker.handle_job_notice(&message).await.unwrap(),
            TrackOutcome::Abandoned
        );
        assert!(env.queue.is_empty(&env.config.queues.job_status));
        assert!(routed(&env).is_empty());
    }

    #[tokio::test]
    async fn test_poll_notice_past_deadline_is_abandoned() {
        let mut env = MemoryBackends::new();
        env.config.tracker.mode = TrackerMode::Poll;
        let tracker = env.tracker();

        let overdue = chrono::Duration::seconds(env.config.tracker.max_wait_secs as i64 + 60);
        let notice = JobSubmittedNotice {
            job_id: "J1".to_string(),
            bucket: "in".to_string(),
            prefix: "landing/acme".to_string(),
            submitted_at: Utc::now() - overdue,
        };
        env.queue
            .send(&env.config.queues.job_status, &serde_json::to_string(&notice).unwrap())
            .await
            .unwrap();
        env.engine.script("J1", vec![InMemoryClassifier::in_progress("J1")]);

        let message = env
            .queue
            .receive_batch(&env.config.queues.job_status, 1)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(
            tracker.handle_job_notice(&message).await.unwrap(),
            TrackOutcome::Abandoned
        );
        assert!(env.queue.is_empty(&env.config.queues.job_status));
        assert!(routed(&env).is_empty());
        assert_eq!(env.stats.snapshot().tracker.failed, 1);
        assert_eq!(env.stats.snapshot().tracker.acknowledged, 1);
    }
}
