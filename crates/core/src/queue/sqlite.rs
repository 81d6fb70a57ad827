//! SQLite-backed work queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{Lease, QueueError, WorkQueue};

/// SQLite-backed work queue. Times are stored as Unix milliseconds.
pub struct SqliteWorkQueue {
    conn: Mutex<Connection>,
    lease_timeout: Duration,
}

impl SqliteWorkQueue {
    /// Open (or create) the queue table in the database at `path`.
    pub fn new(path: &Path, lease_timeout: Duration) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(|e| QueueError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| QueueError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lease_timeout,
        })
    }

    /// Create an in-memory queue (useful for testing).
    pub fn in_memory(lease_timeout: Duration) -> Result<Self, QueueError> {
        let conn =
            Connection::open_in_memory().map_err(|e| QueueError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lease_timeout,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS work_queue (
                job_id TEXT PRIMARY KEY,
                attempts INTEGER NOT NULL DEFAULT 0,
                available_at INTEGER NOT NULL,
                leased_until INTEGER,
                last_error TEXT,
                enqueued_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_work_queue_available ON work_queue(available_at);
            "#,
        )
        .map_err(|e| QueueError::Database(e.to_string()))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Database("queue connection poisoned".to_string()))
    }

    /// Lease the next entry visible at `now`.
    fn lease_at(&self, now: DateTime<Utc>) -> Result<Option<Lease>, QueueError> {
        let now_ms = now.timestamp_millis();
        let until_ms = now_ms + self.lease_timeout.as_millis() as i64;

        let conn = self.lock()?;
        let next = conn
            .query_row(
                "SELECT job_id, attempts, last_error FROM work_queue
                 WHERE available_at <= ?1 AND (leased_until IS NULL OR leased_until <= ?1)
                 ORDER BY available_at ASC, enqueued_at ASC
                 LIMIT 1",
                params![now_ms],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| QueueError::Database(e.to_string()))?;

        let Some((job_id, attempts, last_error)) = next else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE work_queue SET attempts = attempts + 1, leased_until = ?1 WHERE job_id = ?2",
            params![until_ms, job_id],
        )
        .map_err(|e| QueueError::Database(e.to_string()))?;

        Ok(Some(Lease {
            job_id,
            attempt: attempts + 1,
            last_error,
        }))
    }
}

impl WorkQueue for SqliteWorkQueue {
    fn enqueue(&self, job_id: &str) -> Result<bool, QueueError> {
        let now = Utc::now().timestamp_millis();
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                "INSERT INTO work_queue (job_id, attempts, available_at, enqueued_at)
                 VALUES (?1, 0, ?2, ?2)
                 ON CONFLICT(job_id) DO NOTHING",
                params![job_id, now],
            )
            .map_err(|e| QueueError::Database(e.to_string()))?;
        Ok(inserted > 0)
    }

    fn lease(&self) -> Result<Option<Lease>, QueueError> {
        self.lease_at(Utc::now())
    }

    fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM work_queue WHERE job_id = ?1", params![job_id])
            .map_err(|e| QueueError::Database(e.to_string()))?;
        Ok(())
    }

    fn nack(&self, job_id: &str, retry_at: DateTime<Utc>, error: &str) -> Result<(), QueueError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE work_queue SET available_at = ?1, leased_until = NULL, last_error = ?2
             WHERE job_id = ?3",
            params![retry_at.timestamp_millis(), error, job_id],
        )
        .map_err(|e| QueueError::Database(e.to_string()))?;
        Ok(())
    }

    fn contains(&self, job_id: &str) -> Result<bool, QueueError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM work_queue WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .map_err(|e| QueueError::Database(e.to_string()))
    }

    fn len(&self) -> Result<usize, QueueError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM work_queue", [], |row| row.get(0))
            .map_err(|e| QueueError::Database(e.to_string()))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SqliteWorkQueue {
        SqliteWorkQueue::in_memory(Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let queue = queue();
        assert!(queue.enqueue("job-1").unwrap());
        assert!(!queue.enqueue("job-1").unwrap());
        assert_eq!(queue.len().unwrap(), 1);
        assert!(queue.contains("job-1").unwrap());
    }

    #[test]
    fn test_lease_hides_entry_until_ack() {
        let queue = queue();
        queue.enqueue("job-1").unwrap();

        let lease = queue.lease().unwrap().unwrap();
        assert_eq!(lease.job_id, "job-1");
        assert_eq!(lease.attempt, 1);
        assert!(queue.lease().unwrap().is_none());

        queue.ack("job-1").unwrap();
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_expired_lease_is_redelivered() {
        let queue = queue();
        queue.enqueue("job-1").unwrap();
        queue.lease().unwrap().unwrap();

        let later = Utc::now() + chrono::Duration::seconds(61);
        let lease = queue.lease_at(later).unwrap().unwrap();
        assert_eq!(lease.job_id, "job-1");
        assert_eq!(lease.attempt, 2);
    }

    #[test]
    fn test_nack_delays_redelivery() {
        let queue = queue();
        queue.enqueue("job-1").unwrap();
        queue.lease().unwrap().unwrap();

        let retry_at = Utc::now() + chrono::Duration::seconds(10);
        queue.nack("job-1", retry_at, "download failed").unwrap();
        assert!(queue.lease().unwrap().is_none());

        let lease = queue
            .lease_at(retry_at + chrono::Duration::milliseconds(1))
            .unwrap()
            .unwrap();
        assert_eq!(lease.attempt, 2);
        assert_eq!(lease.last_error.as_deref(), Some("download failed"));
    }

    #[test]
    fn test_oldest_available_first() {
        let queue = queue();
        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();
        queue
            .nack("a", Utc::now() + chrono::Duration::seconds(30), "later")
            .unwrap();

        assert_eq!(queue.lease().unwrap().unwrap().job_id, "b");
    }
}
