//! Processing jobs: one per uploaded file, persisted so progress survives
//! restarts.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{JobError, JobStore};
pub use types::{
    CreateJobRequest, ErrorKind, ExtractedFields, JobCompletion, JobFailure, JobFilter,
    JobOutcome, JobStatus, ProcessingJob,
};
