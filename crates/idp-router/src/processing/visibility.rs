//! Visibility heartbeat for in-flight batches
//!
//! While a batch is being worked on, its receipts are periodically extended so the queue
//! does not redeliver them to another worker. Stopping the heartbeat never acknowledges
//! anything; that remains the stage's job.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::providers::QueueClient;

/// Background task extending visibility of a set of receipts
pub struct VisibilityHeartbeat {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl VisibilityHeartbeat {
    /// Start extending `receipts` on `queue` by `extend_secs` every `every`
    pub fn start(
        client: Arc<dyn QueueClient>,
        queue: String,
        mut receipts: Vec<String>,
        every: Duration,
        extend_secs: u64,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let mut live = Vec::with_capacity(receipts.len());
                for receipt in receipts.drain(..) {
                    match client.extend_visibility(&queue, &receipt, extend_secs).await {
                        Ok(()) => live.push(receipt),
                        // Already acked or redelivered elsewhere
                        Err(e) => tracing::debug!("[{}] Heartbeat dropped a receipt: {}", queue, e),
                    }
                }
                receipts = live;

                if receipts.is_empty() {
                    break;
                }
                tracing::debug!(
                    "[{}] Extended visibility of {} messages by {}s",
                    queue,
                    receipts.len(),
                    extend_secs
                );
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop the heartbeat and wait for it to finish
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for VisibilityHeartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::InMemoryQueue;

    #[tokio::test]
    async fn test_heartbeat_keeps_message_invisible() {
        let queue = Arc::new(InMemoryQueue::new(Duration::from_millis(40)));
        queue.send("q", "body").await.unwrap();
        let msg = queue.receive_batch("q", 1).await.unwrap().remove(0);

        let heartbeat = VisibilityHeartbeat::start(
            queue.clone(),
            "q".to_string(),
            vec![msg.receipt_handle.clone()],
            Duration::from_millis(10),
            1,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(queue.receive_batch("q", 1).await.unwrap().is_empty());

        heartbeat.stop().await;
        queue.delete("q", &msg.receipt_handle).await.unwrap();
        assert!(queue.is_empty("q"));
    }
}
