//! Client for a local queue-based solving service.
//!
//! The service accepts an upload on `POST /solve`, answers with a job id and
//! processes jobs in the background. Clients poll `GET /job/{id}` until the
//! job is `completed`, `failed` or `cancelled`.

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::LocalQueueConfig;
use super::error::SolverError;
use super::poll::AttemptBudget;
use super::traits::PlateSolver;
use super::types::{Calibration, SolveOutcome, SolveRequest, SolverHealth};
use crate::metrics;

const SOLVER_NAME: &str = "local_queue";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    success: bool,
    job_id: Option<String>,
    queue_position: Option<u32>,
    error: Option<String>,
}

/// Job record as returned by `GET /job/{id}`, with the solve result merged in.
#[derive(Debug, Default, Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default)]
    solved: Option<bool>,
    #[serde(default)]
    ra: Option<f64>,
    #[serde(default)]
    dec: Option<f64>,
    #[serde(default)]
    orientation: Option<f64>,
    #[serde(default)]
    pixscale: Option<f64>,
    #[serde(default)]
    fieldw: Option<f64>,
    #[serde(default)]
    fieldh: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    queued: u32,
    processing: u32,
    max_concurrent: u32,
}

/// Map a job status payload to calibration (`Some`), still running (`None`)
/// or a terminal failure.
fn interpret_status(
    job_id: &str,
    response: JobStatusResponse,
) -> Result<Option<Calibration>, SolverError> {
    match response.status.as_str() {
        "queued" | "processing" => Ok(None),
        "completed" if response.solved == Some(true) => {
            let (Some(ra), Some(dec)) = (response.ra, response.dec) else {
                return Err(SolverError::InvalidResponse(format!(
                    "job {job_id} solved without centre coordinates"
                )));
            };
            Ok(Some(Calibration {
                ra,
                dec,
                orientation: response.orientation.unwrap_or(0.0),
                pixel_scale: response.pixscale.unwrap_or(0.0),
                field_width: response.fieldw.unwrap_or(0.0),
                field_height: response.fieldh.unwrap_or(0.0),
                parity: None,
                radius: None,
            }))
        }
        "completed" => Err(SolverError::NoSolution(
            response
                .error
                .unwrap_or_else(|| "solver found no solution".to_string()),
        )),
        "failed" => Err(SolverError::NoSolution(
            response.error.unwrap_or_else(|| "solve failed".to_string()),
        )),
        "cancelled" => Err(SolverError::Cancelled(job_id.to_string())),
        other => Err(SolverError::InvalidResponse(format!(
            "unknown job status '{other}'"
        ))),
    }
}

/// Strategy A: local queued solver.
pub struct LocalQueueSolver {
    client: Client,
    config: LocalQueueConfig,
}

impl LocalQueueSolver {
    pub fn new(config: LocalQueueConfig) -> Result<Self, SolverError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SolverError::NotConfigured(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LocalQueueConfig {
        &self.config
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    async fn submit(&self, request: &SolveRequest) -> Result<String, SolverError> {
        let url = format!("{}/solve", self.base_url());
        let options = &request.options;

        let part = multipart::Part::bytes(request.image.clone()).file_name(request.filename.clone());
        let mut form = multipart::Form::new().part("file", part);
        if let Some(fov) = options.fov_deg {
            form = form.text("fov", fov.to_string());
        }
        if let Some(center) = options.center {
            form = form
                .text("ra", center.ra.to_string())
                .text("dec", center.dec.to_string())
                .text("radius", center.radius.to_string());
        }
        if let Some(downsample) = options.downsample {
            form = form.text("downsample", downsample.to_string());
        }

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(self.config.upload_timeout(request.size_mb()))
            .send()
            .await
            .map_err(SolverError::from_transport)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SolverError::Network(format!("HTTP {status} from {url}")));
        }

        let body: SubmitResponse = response.json().await.map_err(|e| {
            SolverError::InvalidResponse(format!("submit response (HTTP {status}): {e}"))
        })?;
        if !status.is_success() || !body.success {
            return Err(SolverError::Rejected(
                body.error.unwrap_or_else(|| format!("HTTP {status}")),
            ));
        }

        let job_id = body
            .job_id
            .ok_or_else(|| SolverError::InvalidResponse("submit response without job_id".into()))?;
        info!(
            job_id = %job_id,
            queue_position = ?body.queue_position,
            "Submitted image to local solver"
        );
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatusResponse, SolverError> {
        let url = format!("{}/job/{}", self.base_url(), urlencoding::encode(job_id));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(SolverError::from_transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SolverError::JobExpired(job_id.to_string()));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SolverError::Network(format!("HTTP {status} from {url}")));
        }
        if !status.is_success() {
            return Err(SolverError::InvalidResponse(format!("HTTP {status} from {url}")));
        }

        response
            .json()
            .await
            .map_err(|e| SolverError::InvalidResponse(format!("job status: {e}")))
    }

    /// Best-effort cancellation. The service only cancels queued jobs.
    async fn cancel(&self, job_id: &str) {
        let url = format!("{}/job/{}", self.base_url(), urlencoding::encode(job_id));
        match self.client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(job_id = %job_id, "Cancelled local solve job")
            }
            Ok(response) => debug!(
                job_id = %job_id,
                status = %response.status(),
                "Local solve job not cancelled"
            ),
            Err(e) => debug!(job_id = %job_id, error = %e, "Cancel request failed"),
        }
    }

    async fn run(&self, request: &SolveRequest) -> Result<SolveOutcome, SolverError> {
        let mut budget = AttemptBudget::new(self.config.poll_policy());

        let job_id = loop {
            budget.next_attempt().await?;
            match self.submit(request).await {
                Ok(job_id) => break job_id,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, remaining = budget.remaining(), "Solver submission failed, retrying");
                    budget.record_error(&e);
                }
                Err(e) => return Err(e),
            }
        };

        loop {
            if let Err(timeout) = budget.next_attempt().await {
                self.cancel(&job_id).await;
                return Err(timeout);
            }
            metrics::SOLVER_POLLS.with_label_values(&[SOLVER_NAME]).inc();

            match self.poll(&job_id).await {
                Ok(status) => {
                    debug!(job_id = %job_id, status = %status.status, attempt = budget.used(), "Polled local solver");
                    if let Some(calibration) = interpret_status(&job_id, status)? {
                        return Ok(SolveOutcome {
                            calibration,
                            objects_in_field: Vec::new(),
                            solver: SOLVER_NAME.to_string(),
                            remote_job_id: Some(job_id),
                        });
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(job_id = %job_id, error = %e, "Poll failed, retrying on next tick");
                    budget.record_error(&e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl PlateSolver for LocalQueueSolver {
    fn name(&self) -> &str {
        SOLVER_NAME
    }

    async fn solve(&self, request: SolveRequest) -> Result<SolveOutcome, SolverError> {
        let result = self.run(&request).await;
        let label = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::SOLVER_REQUESTS
            .with_label_values(&[SOLVER_NAME, label])
            .inc();

        match &result {
            Ok(outcome) => info!(
                filename = %request.filename,
                ra = outcome.calibration.ra,
                dec = outcome.calibration.dec,
                "Local solver found a solution"
            ),
            Err(e) => warn!(filename = %request.filename, error = %e, "Local solve failed"),
        }
        result
    }

    async fn health(&self) -> Result<SolverHealth, SolverError> {
        let health_url = format!("{}/health", self.base_url());
        let queue_url = format!("{}/queue", self.base_url());
        let (health_response, queue_response) = futures::future::join(
            self.client.get(&health_url).send(),
            self.client.get(&queue_url).send(),
        )
        .await;

        let response = health_response.map_err(SolverError::from_transport)?;
        let status = response.status();
        let body: Option<HealthResponse> = response.json().await.ok();

        let healthy = status.is_success()
            && body.as_ref().map(|b| b.status == "healthy").unwrap_or(false);
        let mut health = SolverHealth {
            healthy,
            message: body.and_then(|b| b.error),
            ..Default::default()
        };

        match queue_response {
            Ok(response) if response.status().is_success() => {
                if let Ok(queue) = response.json::<QueueResponse>().await {
                    health.queued = Some(queue.queued);
                    health.processing = Some(queue.processing);
                    health.max_concurrent = Some(queue.max_concurrent);
                }
            }
            Ok(response) => debug!(status = %response.status(), "Queue introspection unavailable"),
            Err(e) => debug!(error = %e, "Queue introspection failed"),
        }

        Ok(health)
    }
}
