//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    CreateJobRequest, ExtractedFields, JobCompletion, JobError, JobFailure, JobFilter, JobStatus,
    JobStore, ProcessingJob,
};
use crate::matcher::MatchMethod;
use crate::solver::Calibration;

const JOB_COLUMNS: &str = "id, user_id, storage_key, original_filename, status, target_name_hint, \
     ra, dec, exposure_time, total_integration_time, filter_name, capture_date, metadata, \
     calibration, matched_target_id, match_method, image_record_id, error_message, \
     error_details, retry_count, created_at, updated_at, completed_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(|e| JobError::Database(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS processing_jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                status TEXT NOT NULL,
                target_name_hint TEXT,
                ra REAL,
                dec REAL,
                exposure_time REAL,
                total_integration_time REAL,
                filter_name TEXT,
                capture_date TEXT,
                metadata TEXT,
                calibration TEXT,
                matched_target_id TEXT,
                match_method TEXT,
                image_record_id TEXT,
                error_message TEXT,
                error_details TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_processing_jobs_user ON processing_jobs(user_id);
            CREATE INDEX IF NOT EXISTS idx_processing_jobs_status ON processing_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_processing_jobs_created_at ON processing_jobs(created_at);
            "#,
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        // Migration: add retry_count column if it doesn't exist
        let _ = conn.execute(
            "ALTER TABLE processing_jobs ADD COLUMN retry_count INTEGER NOT NULL DEFAULT 0",
            [],
        );

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("job store connection poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ProcessingJob> {
        let status: String = row.get(4)?;
        let capture_date: Option<String> = row.get(11)?;
        let metadata: Option<String> = row.get(12)?;
        let calibration: Option<String> = row.get(13)?;
        let match_method: Option<String> = row.get(15)?;
        let error_details: Option<String> = row.get(18)?;
        let retry_count: u32 = row.get::<_, Option<u32>>(19)?.unwrap_or(0);
        let created_at: String = row.get(20)?;
        let updated_at: String = row.get(21)?;
        let completed_at: Option<String> = row.get(22)?;

        Ok(ProcessingJob {
            id: row.get(0)?,
            user_id: row.get(1)?,
            storage_key: row.get(2)?,
            original_filename: row.get(3)?,
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
            target_name_hint: row.get(5)?,
            ra: row.get(6)?,
            dec: row.get(7)?,
            exposure_time: row.get(8)?,
            total_integration_time: row.get(9)?,
            filter_name: row.get(10)?,
            capture_date: capture_date.as_deref().map(parse_timestamp),
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            calibration: calibration.and_then(|c| serde_json::from_str(&c).ok()),
            matched_target_id: row.get(14)?,
            match_method: match_method.as_deref().and_then(MatchMethod::parse),
            image_record_id: row.get(16)?,
            error_message: row.get(17)?,
            error_details: error_details.and_then(|d| serde_json::from_str(&d).ok()),
            retry_count,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
            completed_at: completed_at.as_deref().map(parse_timestamp),
        })
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<ProcessingJob>, JobError> {
        let result = conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM processing_jobs WHERE id = ?"),
            params![id],
            Self::row_to_job,
        );

        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(JobError::Database(e.to_string())),
        }
    }

    /// Write every mutable column of `job` back to its row.
    fn save(conn: &Connection, job: &ProcessingJob) -> Result<(), JobError> {
        let metadata = job
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| JobError::Database(e.to_string()))?;
        let calibration = job
            .calibration
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| JobError::Database(e.to_string()))?;
        let error_details = job
            .error_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| JobError::Database(e.to_string()))?;

        conn.execute(
            "UPDATE processing_jobs SET
                status = ?, target_name_hint = ?, ra = ?, dec = ?, exposure_time = ?,
                total_integration_time = ?, filter_name = ?, capture_date = ?, metadata = ?,
                calibration = ?, matched_target_id = ?, match_method = ?, image_record_id = ?,
                error_message = ?, error_details = ?, retry_count = ?, updated_at = ?,
                completed_at = ?
             WHERE id = ?",
            params![
                job.status.as_str(),
                job.target_name_hint,
                job.ra,
                job.dec,
                job.exposure_time,
                job.total_integration_time,
                job.filter_name,
                job.capture_date.map(|d| d.to_rfc3339()),
                metadata,
                calibration,
                job.matched_target_id,
                job.match_method.map(|m| m.as_str()),
                job.image_record_id,
                job.error_message,
                error_details,
                job.retry_count,
                job.updated_at.to_rfc3339(),
                job.completed_at.map(|d| d.to_rfc3339()),
                job.id,
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(())
    }

    /// Load a job, check that `allowed` accepts its status, apply `change`
    /// and persist. Runs under the connection lock.
    fn update<F>(
        &self,
        id: &str,
        operation: &str,
        allowed: impl Fn(JobStatus) -> bool,
        change: F,
    ) -> Result<ProcessingJob, JobError>
    where
        F: FnOnce(&mut ProcessingJob),
    {
        let conn = self.lock()?;
        let mut job = Self::load(&conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if !allowed(job.status) {
            return Err(JobError::invalid_state(&job, operation));
        }

        change(&mut job);
        job.updated_at = Utc::now();
        Self::save(&conn, &job)?;
        Ok(job)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn not_terminal(status: JobStatus) -> bool {
    !status.is_terminal()
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<ProcessingJob, JobError> {
        let conn = self.lock()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO processing_jobs (id, user_id, storage_key, original_filename, status, retry_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
            params![
                id,
                request.user_id,
                request.storage_key,
                request.original_filename,
                JobStatus::Pending.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(ProcessingJob {
            id,
            user_id: request.user_id,
            storage_key: request.storage_key,
            original_filename: request.original_filename,
            status: JobStatus::Pending,
            target_name_hint: None,
            ra: None,
            dec: None,
            exposure_time: None,
            total_integration_time: None,
            filter_name: None,
            capture_date: None,
            metadata: None,
            calibration: None,
            matched_target_id: None,
            match_method: None,
            image_record_id: None,
            error_message: None,
            error_details: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    fn get(&self, id: &str) -> Result<Option<ProcessingJob>, JobError> {
        let conn = self.lock()?;
        Self::load(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<ProcessingJob>, JobError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM processing_jobs {where_clause} ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?"
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result.map_err(|e| JobError::Database(e.to_string()))?);
        }

        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM processing_jobs {where_clause}");
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| JobError::Database(e.to_string()))
    }

    fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>, JobError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM processing_jobs GROUP BY status")
            .map_err(|e| JobError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut counts: Vec<(JobStatus, i64)> = JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in rows {
            let (status, count) = row.map_err(|e| JobError::Database(e.to_string()))?;
            if let Some(slot) = counts
                .iter_mut()
                .find(|(s, _)| Some(*s) == JobStatus::parse(&status))
            {
                slot.1 += count;
            }
        }
        Ok(counts)
    }

    fn restart(&self, id: &str) -> Result<ProcessingJob, JobError> {
        self.update(
            id,
            "restart",
            |s| s == JobStatus::Pending || s.is_in_flight(),
            |job| {
                if job.status != JobStatus::Pending {
                    job.status = JobStatus::Pending;
                    job.reset_results();
                }
            },
        )
    }

    fn set_status(&self, id: &str, status: JobStatus) -> Result<ProcessingJob, JobError> {
        self.update(
            id,
            &format!("move to {status}"),
            |current| current.can_advance_to(status),
            |job| job.status = status,
        )
    }

    fn record_extraction(
        &self,
        id: &str,
        fields: ExtractedFields,
    ) -> Result<ProcessingJob, JobError> {
        self.update(id, "record extraction on", not_terminal, |job| {
            job.apply_extraction(fields)
        })
    }

    fn record_calibration(
        &self,
        id: &str,
        calibration: &Calibration,
    ) -> Result<ProcessingJob, JobError> {
        self.update(id, "record calibration on", not_terminal, |job| {
            job.ra = Some(calibration.ra);
            job.dec = Some(calibration.dec);
            job.calibration = Some(calibration.clone());
        })
    }

    fn complete(&self, id: &str, completion: JobCompletion) -> Result<ProcessingJob, JobError> {
        self.update(id, "complete", not_terminal, |job| {
            job.status = JobStatus::Completed;
            job.matched_target_id = Some(completion.target_id);
            job.match_method = Some(completion.method);
            job.image_record_id = Some(completion.image_record_id);
            job.completed_at = Some(Utc::now());
        })
    }

    fn mark_needs_target(&self, id: &str) -> Result<ProcessingJob, JobError> {
        self.update(id, "mark needs-target", not_terminal, |job| {
            job.status = JobStatus::NeedsTarget;
        })
    }

    fn mark_failed(&self, id: &str, failure: &JobFailure) -> Result<ProcessingJob, JobError> {
        self.update(id, "fail", not_terminal, |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(failure.message.clone());
            job.error_details = Some(failure.details());
        })
    }

    fn retry(&self, id: &str) -> Result<ProcessingJob, JobError> {
        self.update(
            id,
            "retry",
            |s| s.can_retry(),
            |job| {
                job.status = JobStatus::Pending;
                job.reset_results();
                job.retry_count += 1;
            },
        )
    }

    fn complete_manually(
        &self,
        id: &str,
        target_id: &str,
        image_record_id: &str,
    ) -> Result<ProcessingJob, JobError> {
        self.update(
            id,
            "assign a target to",
            |s| s.can_assign_target(),
            |job| {
                job.status = JobStatus::Completed;
                job.matched_target_id = Some(target_id.to_string());
                job.match_method = Some(MatchMethod::Manual);
                job.image_record_id = Some(image_record_id.to_string());
                job.error_message = None;
                job.error_details = None;
                job.completed_at = Some(Utc::now());
            },
        )
    }

    fn delete(&self, id: &str) -> Result<ProcessingJob, JobError> {
        let conn = self.lock()?;

        let job = Self::load(&conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))?;

        conn.execute("DELETE FROM processing_jobs WHERE id = ?", params![id])
            .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(job)
    }

    fn list_unfinished(&self) -> Result<Vec<ProcessingJob>, JobError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM processing_jobs
                 WHERE status NOT IN ('COMPLETED', 'FAILED', 'NEEDS_TARGET')
                 ORDER BY created_at ASC, id ASC"
            ))
            .map_err(|e| JobError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_job)
            .map_err(|e| JobError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| JobError::Database(e.to_string()))
    }
}
