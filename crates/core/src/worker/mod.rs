//! Pipeline worker.
//!
//! Drains the work queue, running up to `concurrency` jobs at once. Each job
//! is downloaded to a per-job temp path, converted when needed, extracted,
//! plate solved when extraction found no coordinates, and matched against
//! the catalog. Every failure is written to the job before the worker lets
//! go of it.

mod config;
mod pipeline;
mod runner;
mod temp;
mod types;

pub use config::WorkerConfig;
pub use runner::{PipelineWorker, WorkerServices};
pub use temp::TempFiles;
pub use types::{JobProgress, WorkerError, WorkerStatus};
