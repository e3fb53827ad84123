//! Queue provider trait for at-least-once message delivery

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A message handed out by `receive_batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Stable message identifier
    pub message_id: String,
    /// Opaque handle valid for this delivery only
    pub receipt_handle: String,
    /// Raw message body
    pub body: String,
    /// Number of times this message has been delivered, including this one
    pub receive_count: u32,
}

/// Trait for at-least-once queues.
///
/// A received message stays invisible for the queue's visibility timeout and is
/// redelivered unless it is deleted first. Deletion is the only acknowledgment.
///
/// Implementations:
/// - `InMemoryQueue`: process memory (tests, `memory` backend)
/// - `SqliteQueue`: SQLite table with visibility deadlines
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueue a message, returning its id
    async fn send(&self, queue: &str, body: &str) -> Result<String>;

    /// Receive up to `max_messages` visible messages
    async fn receive_batch(&self, queue: &str, max_messages: usize) -> Result<Vec<QueueMessage>>;

    /// Acknowledge a delivery
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()>;

    /// Keep a delivery invisible for another `seconds`
    async fn extend_visibility(&self, queue: &str, receipt_handle: &str, seconds: u64) -> Result<()>;

    /// Number of messages currently stored (visible or in flight)
    async fn depth(&self, queue: &str) -> Result<usize>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
