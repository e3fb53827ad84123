//! SQLite database for the local backend
//!
//! Holds job records and durable queues in one file. Queue rows carry a
//! visibility deadline; a receive hands out a fresh receipt handle and pushes
//! the deadline forward, and a delete by receipt is the acknowledgment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::{JobStore, QueueClient, QueueMessage};
use crate::types::{JobKey, JobRecord};

/// SQLite-backed router database
#[derive(Clone)]
pub struct RouterDb {
    conn: Arc<Mutex<Connection>>,
}

impl RouterDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        "#).map_err(|e| Error::Internal(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(r#"
            -- One row per document between dispatch and move
            CREATE TABLE IF NOT EXISTS job_records (
                bucket TEXT NOT NULL,
                filename TEXT NOT NULL,
                prefix TEXT NOT NULL,
                object_key TEXT NOT NULL,
                job_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (bucket, filename)
            );

            CREATE INDEX IF NOT EXISTS idx_job_records_job_name ON job_records(job_name);

            -- Queue messages with visibility deadlines (epoch millis)
            CREATE TABLE IF NOT EXISTS queue_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                message_id TEXT NOT NULL UNIQUE,
                body TEXT NOT NULL,
                receipt_handle TEXT,
                visible_at INTEGER NOT NULL,
                receive_count INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queue_messages_visible ON queue_messages(queue, visible_at);
            CREATE INDEX IF NOT EXISTS idx_queue_messages_receipt ON queue_messages(receipt_handle);
        "#)
        .map_err(|e| Error::Internal(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    // ==================== Job Records ====================

    /// Insert or replace a job record
    pub fn put_job_record(&self, record: &JobRecord) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO job_records (bucket, filename, prefix, object_key, job_name, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(bucket, filename) DO UPDATE SET
                prefix = excluded.prefix,
                object_key = excluded.object_key,
                job_name = excluded.job_name,
                created_at = excluded.created_at
            "#,
            params![
                record.bucket,
                record.filename,
                record.prefix,
                record.key,
                record.job_name,
                record.created_at.to_rfc3339(),
            ],
        ).map_err(|e| Error::job_store(format!("Failed to put job record: {}", e)))?;

        Ok(())
    }

    /// Get a job record by (bucket, filename)
    pub fn get_job_record(&self, key: &JobKey) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT bucket, filename, prefix, object_key, job_name, created_at
             FROM job_records WHERE bucket = ?1 AND filename = ?2"
        ).map_err(|e| Error::job_store(format!("Failed to prepare query: {}", e)))?;

        let record = stmt
            .query_row(params![key.bucket, key.filename], row_to_job_record)
            .optional()
            .map_err(|e| Error::job_store(format!("Failed to get job record: {}", e)))?;

        Ok(record)
    }

    /// Delete a job record; absent keys are ignored
    pub fn delete_job_record(&self, key: &JobKey) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM job_records WHERE bucket = ?1 AND filename = ?2",
            params![key.bucket, key.filename],
        ).map_err(|e| Error::job_store(format!("Failed to delete job record: {}", e)))?;
        Ok(())
    }

    /// Number of job records
    pub fn count_job_records(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM job_records", [], |row| row.get(0))
            .map_err(|e| Error::job_store(format!("Failed to count job records: {}", e)))?;
        Ok(count as usize)
    }

    // ==================== Queues ====================

    /// Append a message to a queue
    pub fn enqueue(&self, queue: &str, body: &str) -> Result<String> {
        let conn = self.conn.lock();
        let message_id = Uuid::new_v4().to_string();

        conn.execute(
            r#"
            INSERT INTO queue_messages (queue, message_id, body, visible_at, sent_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![queue, message_id, body, now_millis(), Utc::now().to_rfc3339()],
        ).map_err(|e| Error::queue(format!("Failed to enqueue on '{}': {}", queue, e)))?;

        Ok(message_id)
    }

    /// Lease up to `max_messages` visible messages for `visibility`
    pub fn receive(&self, queue: &str, max_messages: usize, visibility: Duration) -> Result<Vec<QueueMessage>> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::queue(format!("Failed to begin receive: {}", e)))?;

        let now = now_millis();
        let deadline = now + visibility.as_millis() as i64;

        let candidates: Vec<(i64, String, String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT seq, message_id, body, receive_count FROM queue_messages
                 WHERE queue = ?1 AND visible_at <= ?2 ORDER BY seq LIMIT ?3"
            ).map_err(|e| Error::queue(format!("Failed to prepare receive: {}", e)))?;

            stmt
                .query_map(params![queue, now, max_messages as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| Error::queue(format!("Failed to receive from '{}': {}", queue, e)))?
        };

        let mut messages = Vec::with_capacity(candidates.len());
        for (seq, message_id, body, receive_count) in candidates {
            let receipt = Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE queue_messages SET receipt_handle = ?1, visible_at = ?2,
                 receive_count = receive_count + 1 WHERE seq = ?3",
                params![receipt, deadline, seq],
            ).map_err(|e| Error::queue(format!("Failed to lease message: {}", e)))?;

            messages.push(QueueMessage {
                message_id,
                receipt_handle: receipt,
                body,
                receive_count: (receive_count + 1) as u32,
            });
        }

        tx.commit()
            .map_err(|e| Error::queue(format!("Failed to commit receive: {}", e)))?;
        Ok(messages)
    }

    /// Delete the message currently leased under `receipt_handle`
    pub fn delete_message(&self, queue: &str, receipt_handle: &str) -> Result<()> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM queue_messages WHERE queue = ?1 AND receipt_handle = ?2",
            params![queue, receipt_handle],
        ).map_err(|e| Error::queue(format!("Failed to delete message: {}", e)))?;

        if deleted == 0 {
            tracing::debug!("[{}] Delete with stale receipt ignored", queue);
        }
        Ok(())
    }

    /// Push a leased message's visibility deadline to now + `seconds`
    pub fn extend_visibility(&self, queue: &str, receipt_handle: &str, seconds: u64) -> Result<()> {
        let conn = self.conn.lock();
        let deadline = now_millis() + (seconds as i64) * 1000;
        let updated = conn.execute(
            "UPDATE queue_messages SET visible_at = ?1 WHERE queue = ?2 AND receipt_handle = ?3",
            params![deadline, queue, receipt_handle],
        ).map_err(|e| Error::queue(format!("Failed to extend visibility: {}", e)))?;

        if updated == 0 {
            return Err(Error::queue(format!("receipt not in flight on '{}'", queue)));
        }
        Ok(())
    }

    /// Messages stored on a queue
    pub fn queue_depth(&self, queue: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1",
                params![queue],
                |row| row.get(0),
            )
            .map_err(|e| Error::queue(format!("Failed to count '{}': {}", queue, e)))?;
        Ok(count as usize)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn row_to_job_record(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
    let created_at_str: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(JobRecord {
        bucket: row.get(0)?,
        filename: row.get(1)?,
        prefix: row.get(2)?,
        key: row.get(3)?,
        job_name: row.get(4)?,
        created_at,
    })
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Internal(format!("Task join error: {}", e))
}

/// Job store over [`RouterDb`]
pub struct SqliteJobStore {
    db: RouterDb,
}

impl SqliteJobStore {
    pub fn new(db: RouterDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get_item(&self, key: &JobKey) -> Result<Option<JobRecord>> {
        let db = self.db.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || db.get_job_record(&key))
            .await
            .map_err(join_error)?
    }

    async fn put_item(&self, record: &JobRecord) -> Result<()> {
        let db = self.db.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || db.put_job_record(&record))
            .await
            .map_err(join_error)?
    }

    async fn delete_item(&self, key: &JobKey) -> Result<()> {
        let db = self.db.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || db.delete_job_record(&key))
            .await
            .map_err(join_error)?
    }

    async fn count(&self) -> Result<usize> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.count_job_records())
            .await
            .map_err(join_error)?
    }

    fn name(&self) -> &str {
        "sqlite-jobs"
    }
}

/// Durable queues over [`RouterDb`]
pub struct SqliteQueue {
    db: RouterDb,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(db: RouterDb, visibility_timeout: Duration) -> Self {
        Self {
            db,
            visibility_timeout,
        }
    }
}

#[async_trait]
impl QueueClient for SqliteQueue {
    async fn send(&self, queue: &str, body: &str) -> Result<String> {
        let db = self.db.clone();
        let (queue, body) = (queue.to_string(), body.to_string());
        tokio::task::spawn_blocking(move || db.enqueue(&queue, &body))
            .await
            .map_err(join_error)?
    }

    async fn receive_batch(&self, queue: &str, max_messages: usize) -> Result<Vec<QueueMessage>> {
        let db = self.db.clone();
        let queue = queue.to_string();
        let visibility = self.visibility_timeout;
        tokio::task::spawn_blocking(move || db.receive(&queue, max_messages, visibility))
            .await
            .map_err(join_error)?
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<()> {
        let db = self.db.clone();
        let (queue, receipt) = (queue.to_string(), receipt_handle.to_string());
        tokio::task::spawn_blocking(move || db.delete_message(&queue, &receipt))
            .await
            .map_err(join_error)?
    }

    async fn extend_visibility(&self, queue: &str, receipt_handle: &str, seconds: u64) -> Result<()> {
        let db = self.db.clone();
        let (queue, receipt) = (queue.to_string(), receipt_handle.to_string());
        tokio::task::spawn_blocking(move || db.extend_visibility(&queue, &receipt, seconds))
            .await
            .map_err(join_error)?
    }

    async fn depth(&self, queue: &str) -> Result<usize> {
        let db = self.db.clone();
        let queue = queue.to_string();
        tokio::task::spawn_blocking(move || db.queue_depth(&queue))
            .await
            .map_err(join_error)?
    }

    fn name(&self) -> &str {
        "sqlite-queue"
    }
}
