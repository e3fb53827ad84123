//! In-memory provider implementations
//!
//! Used by the `memory` backend and as fakes in tests. Every provider carries
//! fault-injection switches so tests can fail a specific backend call.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{JobKey, JobRecord};

use super::classifier::{
    ClassificationEngine, ClassificationJobStatus, JobDescription, SubmitJobRequest,
};
use super::job_store::JobStore;
use super::object_store::ObjectStore;
use super::queue::{QueueClient, QueueMessage};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    receipt_handle: Option<String>,
    visible_at: Instant,
    receive_count: u32,
}

/// In-memory at-least-once queue
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
    visibility_timeout: Duration,
    /// Fail every `delete` call
    pub fail_deletes: AtomicBool,
    /// Fail every `send` call
    pub fail_sends: AtomicBool,
}

impl InMemoryQueue {
    /// Create a queue set with the given visibility timeout
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            visibility_timeout,
            fail_deletes: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Make every in-flight message visible again, as if its timeout expired
    pub fn expire_visibility(&self, queue: &str) {
        let now = Instant::now();
        let mut queues = self.queues.lock();
        if let Some(messages) = queues.get_mut(queue) {
            for msg in messages.iter_mut() {
                msg.visible_at = now;
                msg.receipt_handle = None;
            }
        }
    }

    /// Bodies of every stored message, in send order
    pub fn bodies(&self, queue: &str) -> Vec<String> {
        self.queues
            .lock()
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages currently stored (visible or in flight)
    pub fn len(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn send(&self, queue: &str, body: &str) -> Result<String> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::queue(format!("injected send failure on '{}'", queue)));
        }

        let message_id = Uuid::new_v4().to_string();
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                message_id: message_id.clone(),
                body: body.to_string(),
                receipt_handle: None,
                visible_at: Instant::now(),
                receive_count: 0,
            });
        Ok(message_id)
    }

    async fn receive_batch(&self, queue: &str, max_messages: usize) -> Result<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut queues = self.queues.lock();
        let Some(messages) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut received = Vec::new();
        for msg in messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if msg.visible_at > now {
                continue;
            }
            let receipt = Uuid::new_v4().to_string();
            msg.receipt_handle = Some(receipt.clone());
            msg.visible_at = now + self.visibility_timeout;
            msg.receive_count += 1;
            received.push(QueueMessage {
                message_id: msg.message_id.clone(),
                receipt_handle: receipt,
                body: msg.body.clone(),
                receive_count: msg.receive_count,
            });
        }
        Ok(received)
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::queue(format!("injected delete failure on '{}'", queue)));
        }

        let mut queues = self.queues.lock();
        if let Some(messages) = queues.get_mut(queue) {
            messages.retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        }
        Ok(())
    }

    async fn extend_visibility(&self, queue: &str, receipt_handle: &str, seconds: u64) -> Result<()> {
        let mut queues = self.queues.lock();
        let msg = queues
            .get_mut(queue)
            .and_then(|messages| {
                messages
                    .iter_mut()
                    .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            })
            .ok_or_else(|| Error::queue(format!("receipt not in flight on '{}'", queue)))?;
        msg.visible_at = Instant::now() + Duration::from_secs(seconds);
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize> {
        Ok(self.len(queue))
    }

    fn name(&self) -> &str {
        "memory-queue"
    }
}

/// In-memory object store
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<(String, String), Vec<u8>>,
    /// Fail every `copy` call
    pub fail_copies: AtomicBool,
    copies: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful copies so far
    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    /// Remove an object
    pub fn remove(&self, bucket: &str, key: &str) {
        self.objects.remove(&(bucket.to_string(), key.to_string()));
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects.contains_key(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|data| data.value().clone())
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        self.objects
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    async fn copy(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str) -> Result<()> {
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(Error::object_store(format!(
                "injected copy failure for {}/{}",
                src_bucket, src_key
            )));
        }

        let data = self.get(src_bucket, src_key).await?;
        self.objects
            .insert((dst_bucket.to_string(), dst_key.to_string()), data);
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn head_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.contains(bucket, key))
    }

    async fn presigned_put_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String> {
        Ok(format!("memory://{}/{}?expires_in={}", bucket, key, ttl_secs))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory-objects"
    }
}

/// In-memory job store
#[derive(Default)]
pub struct InMemoryJobStore {
    records: DashMap<JobKey, JobRecord>,
    /// Fail every `put_item` call
    pub fail_puts: AtomicBool,
    /// Fail every `delete_item` call
    pub fail_deletes: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a record without going through the trait
    pub fn record(&self, bucket: &str, filename: &str) -> Option<JobRecord> {
        self.records
            .get(&JobKey::new(bucket, filename))
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_item(&self, key: &JobKey) -> Result<Option<JobRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn put_item(&self, record: &JobRecord) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::job_store(format!(
                "injected put failure for {}",
                record.job_key()
            )));
        }
        self.records.insert(record.job_key(), record.clone());
        Ok(())
    }

    async fn delete_item(&self, key: &JobKey) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::job_store(format!("injected delete failure for {}", key)));
        }
        self.records.remove(key);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn name(&self) -> &str {
        "memory-jobs"
    }
}

/// Scripted classification engine.
///
/// Job ids are `J1`, `J2`, ... in submission order. Each job has a script of
/// descriptions; `describe_job` returns the front entry and advances until the
/// last entry, which then repeats.
#[derive(Default)]
pub struct InMemoryClassifier {
    submitted: Mutex<Vec<SubmitJobRequest>>,
    scripts: DashMap<String, VecDeque<JobDescription>>,
    next_id: AtomicUsize,
    /// Fail every `submit_job` call
    pub fail_submits: AtomicBool,
}

impl InMemoryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request submitted so far
    pub fn submitted(&self) -> Vec<SubmitJobRequest> {
        self.submitted.lock().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Replace a job's description script
    pub fn script(&self, job_id: &str, steps: Vec<JobDescription>) {
        self.scripts.insert(job_id.to_string(), steps.into());
    }

    /// Mark a job completed with its output archive location
    pub fn complete(&self, job_id: &str, output_location: &str) {
        self.script(
            job_id,
            vec![JobDescription {
                job_id: job_id.to_string(),
                status: ClassificationJobStatus::Completed,
                output_location: Some(output_location.to_string()),
                labels: Vec::new(),
                message: None,
            }],
        );
    }

    /// Mark a job failed
    pub fn fail(&self, job_id: &str, message: &str) {
        self.script(
            job_id,
            vec![JobDescription {
                job_id: job_id.to_string(),
                status: ClassificationJobStatus::Failed,
                output_location: None,
                labels: Vec::new(),
                message: Some(message.to_string()),
            }],
        );
    }

    /// Description of a running job
    pub fn in_progress(job_id: &str) -> JobDescription {
        JobDescription {
            job_id: job_id.to_string(),
            status: ClassificationJobStatus::InProgress,
            output_location: None,
            labels: Vec::new(),
            message: None,
        }
    }
}

#[async_trait]
impl ClassificationEngine for InMemoryClassifier {
    async fn submit_job(&self, request: &SubmitJobRequest) -> Result<String> {
        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(Error::SubmissionFailed {
                input_uri: request.input_uri.clone(),
                message: "injected submission failure".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("J{}", id);
        self.submitted.lock().push(request.clone());
        self.script(&job_id, vec![Self::in_progress(&job_id)]);
        Ok(job_id)
    }

    async fn describe_job(&self, job_id: &str) -> Result<JobDescription> {
        let mut script = self
            .scripts
            .get_mut(job_id)
            .ok_or_else(|| Error::classifier(format!("unknown job {}", job_id)))?;

        let description = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        description.ok_or_else(|| Error::classifier(format!("job {} has no description", job_id)))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory-classifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_visibility_and_delete() {
        let queue = InMemoryQueue::default();
        queue.send("q", "a").await.unwrap();
        queue.send("q", "b").await.unwrap();

        let first = queue.receive_batch("q", 10).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].receive_count, 1);

        // In flight: nothing visible
        assert!(queue.receive_batch("q", 10).await.unwrap().is_empty());

        queue.delete("q", &first[0].receipt_handle).await.unwrap();
        queue.expire_visibility("q");

        let second = queue.receive_batch("q", 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, "b");
        assert_eq!(second[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_queue_respects_max_messages() {
        let queue = InMemoryQueue::default();
        for i in 0..15 {
            queue.send("q", &i.to_string()).await.unwrap();
        }
        assert_eq!(queue.receive_batch("q", 10).await.unwrap().len(), 10);
        assert_eq!(queue.receive_batch("q", 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_stale_receipt_cannot_extend() {
        let queue = InMemoryQueue::default();
        queue.send("q", "a").await.unwrap();
        let msg = queue.receive_batch("q", 1).await.unwrap().remove(0);
        queue.expire_visibility("q");
        assert!(queue
            .extend_visibility("q", &msg.receipt_handle, 30)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_job_store_delete_absent_is_noop() {
        let store = InMemoryJobStore::new();
        store.delete_item(&JobKey::new("in", "missing.pdf")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_classifier_script_advances() {
        let engine = InMemoryClassifier::new();
        let request = SubmitJobRequest {
            job_name: "n".to_string(),
            input_uri: "s3://in/landing/".to_string(),
            classifier: "c".to_string(),
            output_uri: "s3://out/".to_string(),
            data_access_role: None,
        };
        let job_id = engine.submit_job(&request).await.unwrap();
        assert_eq!(job_id, "J1");

        engine.script(
            &job_id,
            vec![
                InMemoryClassifier::in_progress(&job_id),
                JobDescription {
                    job_id: job_id.clone(),
                    status: ClassificationJobStatus::Completed,
                    output_location: Some("s3://out/output.tar.gz".to_string()),
                    labels: Vec::new(),
                    message: None,
                },
            ],
        );

        assert_eq!(
            engine.describe_job(&job_id).await.unwrap().status,
            ClassificationJobStatus::InProgress
        );
        assert_eq!(
            engine.describe_job(&job_id).await.unwrap().status,
            ClassificationJobStatus::Completed
        );
        assert_eq!(
            engine.describe_job(&job_id).await.unwrap().status,
            ClassificationJobStatus::Completed
        );
    }
}
