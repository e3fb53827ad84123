//! Storage module for persistent data storage
//!
//! Provides SQLite-based persistence for job records and queues.

mod database;

pub use database::{RouterDb, SqliteJobStore, SqliteQueue};
