//! Durable at-least-once work queue.
//!
//! Entries are leased rather than popped: a worker that dies mid-job leaves
//! a lease that expires, and the entry becomes visible again.

mod config;
mod sqlite;

pub use config::RetryConfig;
pub use sqlite::SqliteWorkQueue;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(String),
}

/// A leased queue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub job_id: String,
    /// Delivery attempt number, starting at 1.
    pub attempt: u32,
    /// Error recorded by the previous attempt.
    pub last_error: Option<String>,
}

/// Trait for work queue backends.
pub trait WorkQueue: Send + Sync {
    /// Queue a job. Returns false if it is already queued.
    fn enqueue(&self, job_id: &str) -> Result<bool, QueueError>;

    /// Take the next available entry, hiding it for the lease timeout.
    fn lease(&self) -> Result<Option<Lease>, QueueError>;

    /// Remove a finished entry.
    fn ack(&self, job_id: &str) -> Result<(), QueueError>;

    /// Release a failed entry for redelivery at `retry_at`.
    fn nack(&self, job_id: &str, retry_at: DateTime<Utc>, error: &str) -> Result<(), QueueError>;

    /// Whether a job has an entry, leased or not.
    fn contains(&self, job_id: &str) -> Result<bool, QueueError>;

    /// Number of entries, leased or not.
    fn len(&self) -> Result<usize, QueueError>;

    fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }
}
