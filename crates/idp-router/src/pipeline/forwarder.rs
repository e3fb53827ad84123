//! Object-created events -> ingest queue messages

use serde::Serialize;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::QueueClient;
use crate::types::DocumentNotification;

/// Outcome of forwarding one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    pub forwarded: usize,
    pub ignored_folders: usize,
    pub failed: usize,
}

/// Turns storage events into flat `{bucket, key}` ingest messages
pub struct NotificationForwarder {
    queue: Arc<dyn QueueClient>,
    ingest_queue: String,
}

impl NotificationForwarder {
    pub fn new(queue: Arc<dyn QueueClient>, ingest_queue: impl Into<String>) -> Self {
        Self {
            queue,
            ingest_queue: ingest_queue.into(),
        }
    }

    /// Forward every record of an event. Folder markers are skipped; a failed send is
    /// logged and does not stop the remaining records.
    pub async fn forward(&self, event_body: &str) -> Result<ForwardReport> {
        let notifications = DocumentNotification::from_event(event_body)
            .map_err(|e| Error::malformed("event", e.to_string()))?;

        let mut report = ForwardReport::default();
        for notification in notifications {
            if notification.is_folder() {
                tracing::info!("[{}] Ignoring folder creation event", notification.key);
                report.ignored_folders += 1;
                continue;
            }

            match self.send(&notification).await {
                Ok(message_id) => {
                    tracing::info!(
                        "[{}] Queued for dispatch (message {})",
                        notification.key,
                        message_id
                    );
                    report.forwarded += 1;
                }
                Err(e) => {
                    tracing::error!("[{}] Failed to queue notification: {}", notification.key, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn send(&self, notification: &DocumentNotification) -> Result<String> {
        let body = notification.to_body()?;
        self.queue.send(&self.ingest_queue, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::InMemoryQueue;
    use std::sync::atomic::Ordering;

    const EVENT: &str = r#"{"Records":[
        {"s3":{"bucket":{"name":"in"},"object":{"key":"landing/acme/"}}},
        {"s3":{"bucket":{"name":"in"},"object":{"key":"landing/acme/doc1.pdf"}}},
        {"s3":{"bucket":{"name":"in"},"object":{"key":"landing/acme/doc2.pdf"}}}
    ]}"#;

    #[tokio::test]
    async fn test_forwards_documents_and_skips_folders() {
        let queue = Arc::new(InMemoryQueue::default());
        let forwarder = NotificationForwarder::new(queue.clone(), "ingest");

        let report = forwarder.forward(EVENT).await.unwrap();
        assert_eq!(report.forwarded, 2);
        assert_eq!(report.ignored_folders, 1);

        let first: DocumentNotification = serde_json::from_str(&queue.bodies("ingest")[0]).unwrap();
        assert_eq!(first, DocumentNotification::new("in", "landing/acme/doc1.pdf"));
    }

    #[tokio::test]
    async fn test_send_failures_are_counted() {
        let queue = Arc::new(InMemoryQueue::default());
        queue.fail_sends.store(true, Ordering::SeqCst);
        let forwarder = NotificationForwarder::new(queue.clone(), "ingest");

        let report = forwarder.forward(EVENT).await.unwrap();
        assert_eq!(report.failed, 2);
        assert!(queue.is_empty("ingest"));
    }

    #[tokio::test]
    async fn test_rejects_non_event() {
        let queue = Arc::new(InMemoryQueue::default());
        let forwarder = NotificationForwarder::new(queue, "ingest");
        assert!(forwarder.forward("[]").await.is_err());
    }
}
