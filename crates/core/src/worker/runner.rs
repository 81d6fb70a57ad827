//! Pipeline worker implementation.
//!
//! A dispatch loop leases entries from the work queue and spawns one task
//! per job, bounded by a semaphore. Operator actions (submit, retry, manual
//! target assignment) go through the worker so the queue and progress
//! events stay in step with the job store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogStore, NewImageRecord};
use crate::converter::FormatConverter;
use crate::extractor::MetadataExtractor;
use crate::job::{CreateJobRequest, JobError, JobStore, ProcessingJob};
use crate::matcher::{MatchMethod, MatcherConfig, TargetMatcher};
use crate::queue::{Lease, WorkQueue};
use crate::solver::PlateSolver;
use crate::storage::ObjectStorage;

use super::config::WorkerConfig;
use super::pipeline::PipelineContext;
use super::types::{JobProgress, WorkerError, WorkerStatus};

/// Collaborators the worker drives.
#[derive(Clone)]
pub struct WorkerServices {
    pub jobs: Arc<dyn JobStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub storage: Arc<dyn ObjectStorage>,
    pub converter: Arc<dyn FormatConverter>,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub solver: Arc<dyn PlateSolver>,
}

/// The pipeline worker - drains the work queue through the pipeline.
pub struct PipelineWorker {
    context: Arc<PipelineContext>,

    // Runtime state
    running: Arc<AtomicBool>,
    semaphore: Arc<Semaphore>,
    active_jobs: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    wake: Arc<Notify>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PipelineWorker {
    /// Create a new worker.
    pub fn new(config: WorkerConfig, matcher_config: MatcherConfig, services: WorkerServices) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (progress_tx, _) = broadcast::channel(256);
        let concurrency = config.concurrency.max(1);

        let context = PipelineContext {
            matcher: TargetMatcher::new(Arc::clone(&services.catalog), matcher_config),
            config,
            jobs: services.jobs,
            catalog: services.catalog,
            queue: services.queue,
            storage: services.storage,
            converter: services.converter,
            extractor: services.extractor,
            solver: services.solver,
            progress: progress_tx,
        };

        Self {
            context: Arc::new(context),
            running: Arc::new(AtomicBool::new(false)),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            active_jobs: Arc::new(RwLock::new(HashMap::new())),
            wake: Arc::new(Notify::new()),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.context.config
    }

    /// Start the worker (spawns the dispatch loop).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker already running");
            return;
        }

        info!(
            concurrency = self.context.config.concurrency,
            solver = self.context.solver.name(),
            "Starting pipeline worker"
        );

        // Requeue jobs that were in flight when we shut down
        self.recover_unfinished_jobs();

        self.spawn_dispatch_loop();

        info!("Pipeline worker started");
    }

    /// Stop the worker, waiting up to the grace period for running jobs.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Worker not running");
            return;
        }

        info!("Stopping pipeline worker");

        let _ = self.shutdown_tx.send(());

        let grace = std::time::Duration::from_secs(self.context.config.shutdown_grace_secs);
        let slots = self.context.config.concurrency.max(1) as u32;
        match tokio::time::timeout(grace, self.semaphore.acquire_many(slots)).await {
            Ok(_) => info!("Pipeline worker stopped"),
            Err(_) => {
                let active = self.active_jobs.read().await.len();
                warn!(
                    active_jobs = active,
                    "Grace period elapsed with jobs still running; their leases will expire and be redelivered"
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Get current worker status.
    pub async fn status(&self) -> WorkerStatus {
        let active_jobs = self.active_jobs.read().await.len();
        let queue_depth = self.context.queue.len().unwrap_or(0);
        let jobs_by_status = self.context.jobs.count_by_status().unwrap_or_default();

        WorkerStatus {
            running: self.is_running(),
            concurrency: self.context.config.concurrency,
            active_jobs,
            queue_depth,
            jobs_by_status,
        }
    }

    /// Subscribe to progress events for all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.context.progress.subscribe()
    }

    /// Create a job for an uploaded file and queue it.
    pub fn submit(&self, request: CreateJobRequest) -> Result<ProcessingJob, WorkerError> {
        let job = self.context.jobs.create(request)?;
        self.context.queue.enqueue(&job.id)?;
        info!(job_id = %job.id, filename = %job.original_filename, "Job submitted");
        self.context.publish(&job);
        self.wake.notify_one();
        Ok(job)
    }

    /// Operator retry of a failed job.
    pub fn retry(&self, job_id: &str) -> Result<ProcessingJob, WorkerError> {
        let job = self.context.jobs.retry(job_id)?;
        self.context.queue.enqueue(&job.id)?;
        info!(job_id = %job.id, retry_count = job.retry_count, "Job queued for retry");
        self.context.publish(&job);
        self.wake.notify_one();
        Ok(job)
    }

    /// Complete a job with an operator-chosen target, bypassing the matcher.
    pub fn assign_target(&self, job_id: &str, target_id: &str) -> Result<ProcessingJob, WorkerError> {
        let jobs = &self.context.jobs;
        let catalog = &self.context.catalog;

        let job = jobs
            .get(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if !job.status.can_assign_target() {
            return Err(JobError::invalid_state(&job, "assign a target to").into());
        }

        let target = catalog
            .get_target(target_id)?
            .ok_or_else(|| WorkerError::TargetNotFound(target_id.to_string()))?;

        let record = catalog.create_image_record(NewImageRecord {
            user_id: job.user_id.clone(),
            target_id: target.id.clone(),
            job_id: Some(job.id.clone()),
            storage_key: job.storage_key.clone(),
            original_filename: job.original_filename.clone(),
            match_method: MatchMethod::Manual,
            ra: job.ra,
            dec: job.dec,
            exposure_time: job.exposure_time,
            total_integration_time: job.total_integration_time,
            filter_name: job.filter_name.clone(),
            capture_date: job.capture_date,
            metadata: job.metadata.clone(),
        })?;

        if let Err(e) = catalog.mark_target_captured(&job.user_id, &target.id) {
            warn!(job_id = %job.id, error = %e, "Failed to update wishlist");
        }

        let job = jobs.complete_manually(&job.id, &target.id, &record.id)?;
        info!(job_id = %job.id, target = %target.label(), "Target assigned manually");
        self.context.publish(&job);
        Ok(job)
    }

    /// Lease one entry and process it on the current task.
    /// Returns the job id, or `None` when nothing is available.
    pub async fn process_next(&self) -> Result<Option<String>, WorkerError> {
        let Some(lease) = self.context.queue.lease()? else {
            return Ok(None);
        };
        let job_id = lease.job_id.clone();
        self.context.deliver(lease).await;
        Ok(Some(job_id))
    }

    /// Enqueue unfinished jobs that lost their queue entry.
    fn recover_unfinished_jobs(&self) {
        let jobs = match self.context.jobs.list_unfinished() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to list unfinished jobs for recovery: {}", e);
                return;
            }
        };

        let mut recovered = 0;
        for job in jobs {
            match self.context.queue.contains(&job.id) {
                Ok(true) => {}
                Ok(false) => match self.context.queue.enqueue(&job.id) {
                    Ok(_) => {
                        info!(job_id = %job.id, status = %job.status, "Recovered unqueued job");
                        recovered += 1;
                    }
                    Err(e) => error!(job_id = %job.id, error = %e, "Failed to requeue job"),
                },
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to check queue"),
            }
        }

        if recovered > 0 {
            info!(recovered, "Recovery complete");
        }
    }

    fn spawn_dispatch_loop(&self) {
        let context = Arc::clone(&self.context);
        let semaphore = Arc::clone(&self.semaphore);
        let active_jobs = Arc::clone(&self.active_jobs);
        let wake = Arc::clone(&self.wake);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = context.config.poll_interval();

        tokio::spawn(async move {
            info!("Dispatch loop started");

            loop {
                // Fill every free slot before sleeping
                while let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() {
                    match context.queue.lease() {
                        Ok(Some(lease)) => spawn_delivery(
                            Arc::clone(&context),
                            Arc::clone(&active_jobs),
                            Arc::clone(&wake),
                            lease,
                            permit,
                        ),
                        Ok(None) => break,
                        Err(e) => {
                            error!("Failed to lease from queue: {}", e);
                            break;
                        }
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Dispatch loop shutting down");
                        break;
                    }
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        });
    }
}

fn spawn_delivery(
    context: Arc<PipelineContext>,
    active_jobs: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    wake: Arc<Notify>,
    lease: Lease,
    permit: OwnedSemaphorePermit,
) {
    tokio::spawn(async move {
        let job_id = lease.job_id.clone();
        active_jobs.write().await.insert(job_id.clone(), Utc::now());

        context.deliver(lease).await;

        active_jobs.write().await.remove(&job_id);
        drop(permit);
        debug!(job_id = %job_id, "Slot released");
        wake.notify_one();
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::catalog::SqliteCatalogStore;
    use crate::extractor::FitsMetadataExtractor;
    use crate::job::{ErrorKind, JobFailure, JobStatus, SqliteJobStore};
    use crate::queue::SqliteWorkQueue;
    use crate::solver::SolverError;
    use crate::testing::{fixtures, MockConverter, MockObjectStorage, MockPlateSolver};

    struct Harness {
        worker: PipelineWorker,
        jobs: Arc<SqliteJobStore>,
        catalog: Arc<SqliteCatalogStore>,
        queue: Arc<SqliteWorkQueue>,
        storage: Arc<MockObjectStorage>,
        solver: Arc<MockPlateSolver>,
        _temp: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let temp = tempfile::TempDir::new().unwrap();
        let jobs = Arc::new(SqliteJobStore::in_memory().unwrap());
        let catalog = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        fixtures::seed_catalog(catalog.as_ref()).unwrap();
        let queue = Arc::new(SqliteWorkQueue::in_memory(Duration::from_secs(60)).unwrap());
        let storage = Arc::new(MockObjectStorage::new());
        let solver = Arc::new(MockPlateSolver::new());

        let config = WorkerConfig::default()
            .with_temp_dir(temp.path())
            .with_poll_interval(Duration::from_millis(20));

        let worker = PipelineWorker::new(
            config,
            MatcherConfig::default(),
            WorkerServices {
                jobs: jobs.clone(),
                catalog: catalog.clone(),
                queue: queue.clone(),
                storage: storage.clone(),
                converter: Arc::new(MockConverter::new()),
                extractor: Arc::new(FitsMetadataExtractor::new()),
                solver: solver.clone(),
            },
        );

        Harness {
            worker,
            jobs,
            catalog,
            queue,
            storage,
            solver,
            _temp: temp,
        }
    }

    #[tokio::test]
    async fn test_submit_queues_and_processes() {
        let h = harness();
        h.storage
            .put("uploads/m31.fits", fixtures::fits_with_position(10.68, 41.27)).await;

        let job = h
            .worker
            .submit(CreateJobRequest::new("user-1", "uploads/m31.fits", "m31.fits"))
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(h.queue.contains(&job.id).unwrap());

        let processed = h.worker.process_next().await.unwrap();
        assert_eq!(processed.as_deref(), Some(job.id.as_str()));

        let job = h.jobs.get(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.match_method, Some(MatchMethod::Coordinates));
        assert_eq!(job.matched_target_id.as_deref(), Some("m31"));
        assert!(h.queue.is_empty().unwrap());
        assert_eq!(h.solver.solve_count().await, 0);
    }

    #[tokio::test]
    async fn test_process_next_on_empty_queue() {
        let h = harness();
        assert_eq!(h.worker.process_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_progress_events_are_monotonic() {
        let h = harness();
        h.storage
            .put("uploads/m31.fits", fixtures::fits_with_position(10.68, 41.27)).await;
        let mut events = h.worker.subscribe();

        let job = h
            .worker
            .submit(CreateJobRequest::new("user-1", "uploads/m31.fits", "m31.fits"))
            .unwrap();
        h.worker.process_next().await.unwrap();

        let mut percents = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.job_id, job.id);
            percents.push(event.percent);
        }
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_retry_requires_failed_job() {
        let h = harness();
        let job = h
            .worker
            .submit(CreateJobRequest::new("user-1", "uploads/x.fits", "x.fits"))
            .unwrap();

        let err = h.worker.retry(&job.id).unwrap_err();
        assert!(matches!(err, WorkerError::Job(JobError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_retry_after_missing_upload() {
        let h = harness();
        let job = h
            .worker
            .submit(CreateJobRequest::new("user-1", "uploads/m31.fits", "m31.fits"))
            .unwrap();

        // Upload not there yet: NotFound is not retryable by the queue
        h.worker.process_next().await.unwrap();
        let failed = h.jobs.get(&job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_details.as_ref().unwrap()["kind"], "storage_failure");

        h.storage
            .put("uploads/m31.fits", fixtures::fits_with_position(10.68, 41.27)).await;
        let retried = h.worker.retry(&job.id).unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert!(retried.error_message.is_none());

        h.worker.process_next().await.unwrap();
        let done = h.jobs.get(&job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.id, job.id);
    }

    #[tokio::test]
    async fn test_assign_target_from_needs_target() {
        let h = harness();
        h.storage
            .put("uploads/blank.fits", fixtures::fits_without_position()).await;
        h.solver.set_fallback(Err(SolverError::NoSolution("no stars matched".into()))).await;
        h.catalog.add_to_wishlist("user-1", "ngc7000").unwrap();

        let job = h
            .worker
            .submit(CreateJobRequest::new("user-1", "uploads/blank.fits", "blank.fits"))
            .unwrap();
        h.worker.process_next().await.unwrap();
        assert_eq!(
            h.jobs.get(&job.id).unwrap().unwrap().status,
            JobStatus::NeedsTarget
        );

        let err = h.worker.assign_target(&job.id, "does-not-exist").unwrap_err();
        assert!(matches!(err, WorkerError::TargetNotFound(_)));

        let job = h.worker.assign_target(&job.id, "ngc7000").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.match_method, Some(MatchMethod::Manual));

        let record = h
            .catalog
            .get_image_record(job.image_record_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.target_id, "ngc7000");
        assert_eq!(record.match_method, MatchMethod::Manual);
        assert_eq!(record.exposure_time, Some(300.0));
        assert_eq!(
            h.catalog.wishlist_status("user-1", "ngc7000").unwrap(),
            Some(crate::catalog::WishlistStatus::Captured)
        );
    }

    #[tokio::test]
    async fn test_assign_target_rewrites_stale_record() {
        let h = harness();
        let job = h
            .worker
            .submit(CreateJobRequest::new("user-1", "uploads/m31.fits", "m31.fits"))
            .unwrap();

        // Record written for m31 before the job failed at the last step.
        let stale = h
            .catalog
            .create_image_record(NewImageRecord {
                user_id: "user-1".into(),
                target_id: "m31".into(),
                job_id: Some(job.id.clone()),
                storage_key: "uploads/m31.fits".into(),
                original_filename: "m31.fits".into(),
                match_method: MatchMethod::Coordinates,
                ra: Some(10.68),
                dec: Some(41.27),
                exposure_time: None,
                total_integration_time: None,
                filter_name: None,
                capture_date: None,
                metadata: None,
            })
            .unwrap();
        h.jobs
            .mark_failed(
                &job.id,
                &JobFailure::new(
                    ErrorKind::StorageFailure,
                    JobStatus::Matching,
                    "database is locked",
                ),
            )
            .unwrap();

        let job = h.worker.assign_target(&job.id, "ngc7000").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.image_record_id.as_deref(), Some(stale.id.as_str()));

        let record = h.catalog.get_image_record(&stale.id).unwrap().unwrap();
        assert_eq!(record.target_id, "ngc7000");
        assert_eq!(record.match_method, MatchMethod::Manual);
    }

    #[tokio::test]
    async fn test_assign_target_rejects_running_job() {
        let h = harness();
        let job = h
            .worker
            .submit(CreateJobRequest::new("user-1", "uploads/x.fits", "x.fits"))
            .unwrap();

        let err = h.worker.assign_target(&job.id, "m31").unwrap_err();
        assert!(matches!(err, WorkerError::Job(JobError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_start_recovers_and_drains_queue() {
        let h = harness();
        h.storage
            .put("uploads/m31.fits", fixtures::fits_with_position(10.68, 41.27)).await;

        // Job created behind the worker's back, as after a crash
        let job = h
            .jobs
            .create(CreateJobRequest::new("user-1", "uploads/m31.fits", "m31.fits"))
            .unwrap();
        h.jobs.set_status(&job.id, JobStatus::Extracting).unwrap();
        assert!(!h.queue.contains(&job.id).unwrap());

        h.worker.start().await;
        assert!(h.worker.is_running());

        let mut finished = false;
        for _ in 0..100 {
            if h.jobs.get(&job.id).unwrap().unwrap().status.is_terminal() {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(finished, "job was not processed");
        assert_eq!(
            h.jobs.get(&job.id).unwrap().unwrap().status,
            JobStatus::Completed
        );

        h.worker.stop().await;
        assert!(!h.worker.is_running());

        let status = h.worker.status().await;
        assert!(!status.running);
        assert_eq!(status.active_jobs, 0);
        assert_eq!(status.queue_depth, 0);
    }
}
