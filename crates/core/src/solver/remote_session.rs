//! Client for a remote session-based solving API.
//!
//! Protocol outline:
//! 1. `POST /login` trades the API key for a session key.
//! 2. `POST /upload` (multipart) or `POST /url_upload` creates a submission.
//! 3. `GET /submissions/{id}` eventually lists child job ids.
//! 4. `GET /jobs/{id}` reports `solving`, `success` or `failure`.
//! 5. `GET /jobs/{id}/calibration` and `GET /jobs/{id}/objects_in_field`
//!    fetch the result.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::{RemoteSessionConfig, SubmissionMode};
use super::error::SolverError;
use super::poll::AttemptBudget;
use super::session::Session;
use super::traits::PlateSolver;
use super::types::{Calibration, SolveOptions, SolveOutcome, SolveRequest, SolverHealth};
use crate::metrics;

const SOLVER_NAME: &str = "remote_session";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: String,
    session: Option<String>,
    errormessage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    status: String,
    subid: Option<u64>,
    errormessage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    #[serde(default)]
    jobs: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct CalibrationResponse {
    ra: f64,
    dec: f64,
    #[serde(default)]
    orientation: f64,
    #[serde(default)]
    pixscale: f64,
    radius: Option<f64>,
    parity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ObjectsResponse {
    #[serde(default)]
    objects_in_field: Vec<String>,
}

/// Errors reported in-band as `{"status": "error", "errormessage": ..}`.
/// Messages about the session mean the key must be renewed.
fn api_error(message: Option<String>) -> SolverError {
    let message = message.unwrap_or_else(|| "unknown error".to_string());
    if message.to_ascii_lowercase().contains("session") {
        SolverError::AuthenticationFailed(message)
    } else {
        SolverError::Rejected(message)
    }
}

fn to_calibration(response: CalibrationResponse, options: &SolveOptions) -> Calibration {
    let (field_width, field_height) = match (options.image_width, options.image_height) {
        (Some(w), Some(h)) if response.pixscale > 0.0 => (
            w as f64 * response.pixscale / 3600.0,
            h as f64 * response.pixscale / 3600.0,
        ),
        // Square field inscribed in the reported radius.
        _ => {
            let side = response.radius.unwrap_or(0.0) * std::f64::consts::SQRT_2;
            (side, side)
        }
    };

    Calibration {
        ra: response.ra,
        dec: response.dec,
        orientation: response.orientation,
        pixel_scale: response.pixscale,
        field_width,
        field_height,
        parity: response.parity,
        radius: response.radius,
    }
}

/// Strategy B: remote session-based solver.
pub struct RemoteSessionSolver {
    client: Client,
    config: RemoteSessionConfig,
    /// Held across login so concurrent solves share one session.
    session: Mutex<Option<Session>>,
}

impl RemoteSessionSolver {
    pub fn new(config: RemoteSessionConfig) -> Result<Self, SolverError> {
        if config.api_key.trim().is_empty() {
            return Err(SolverError::NotConfigured("remote solver api_key is empty".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SolverError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RemoteSessionConfig {
        &self.config
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.config.session_ttl_secs)
    }

    fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.config.session_refresh_margin_secs)
    }

    /// Current session, logging in when absent or close to expiry.
    async fn session(&self) -> Result<Session, SolverError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.is_fresh(Instant::now(), self.refresh_margin()) {
                return Ok(session.clone());
            }
            debug!("Remote solver session near expiry, renewing");
        }

        let session = self.login().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
    }

    async fn login(&self) -> Result<Session, SolverError> {
        let url = format!("{}/login", self.base_url());
        let payload = json!({ "apikey": self.config.api_key }).to_string();

        let response = self
            .client
            .post(&url)
            .form(&[("request-json", payload.as_str())])
            .send()
            .await
            .map_err(SolverError::from_transport)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SolverError::Network(format!("HTTP {status} from {url}")));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| SolverError::InvalidResponse(format!("login response: {e}")))?;

        match (body.status.as_str(), body.session) {
            ("success", Some(key)) => {
                info!("Logged in to remote solver");
                Ok(Session::new(key, self.session_ttl()))
            }
            _ => Err(SolverError::AuthenticationFailed(
                body.errormessage
                    .unwrap_or_else(|| format!("login failed (HTTP {status})")),
            )),
        }
    }

    fn submission_payload(&self, session: &Session, options: &SolveOptions) -> serde_json::Value {
        let mut payload = json!({
            "session": session.key(),
            "publicly_visible": if self.config.publicly_visible { "y" } else { "n" },
            "allow_commercial_use": "n",
            "allow_modifications": "n",
        });

        if let Some(fov) = options.fov_deg {
            payload["scale_units"] = json!("degwidth");
            payload["scale_type"] = json!("ul");
            payload["scale_lower"] = json!(fov * 0.8);
            payload["scale_upper"] = json!(fov * 1.2);
        }
        if let Some(center) = options.center {
            payload["center_ra"] = json!(center.ra);
            payload["center_dec"] = json!(center.dec);
            payload["radius"] = json!(center.radius);
        }
        if let Some(downsample) = options.downsample {
            payload["downsample_factor"] = json!(downsample);
        }
        payload
    }

    async fn submit_once(
        &self,
        session: &Session,
        request: &SolveRequest,
    ) -> Result<u64, SolverError> {
        let mut payload = self.submission_payload(session, &request.options);

        let builder = match (&self.config.submission, &request.source_url) {
            (SubmissionMode::Url, Some(source_url)) => {
                payload["url"] = json!(source_url);
                let payload = payload.to_string();
                self.client
                    .post(format!("{}/url_upload", self.base_url()))
                    .form(&[("request-json", payload.as_str())])
            }
            (mode, _) => {
                if *mode == SubmissionMode::Url {
                    debug!("No source URL available, uploading image bytes instead");
                }
                let file = multipart::Part::bytes(request.image.clone())
                    .file_name(request.filename.clone());
                let form = multipart::Form::new()
                    .text("request-json", payload.to_string())
                    .part("file", file);
                self.client
                    .post(format!("{}/upload", self.base_url()))
                    .multipart(form)
                    .timeout(self.config.upload_timeout(request.size_mb()))
            }
        };

        let response = builder.send().await.map_err(SolverError::from_transport)?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SolverError::Network(format!("HTTP {status} on submission")));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SolverError::AuthenticationFailed(format!("HTTP {status}")));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| SolverError::InvalidResponse(format!("upload response: {e}")))?;
        match (body.status.as_str(), body.subid) {
            ("success", Some(subid)) => Ok(subid),
            ("success", None) => Err(SolverError::InvalidResponse(
                "upload response without subid".into(),
            )),
            _ => Err(api_error(body.errormessage)),
        }
    }

    /// Submit with the cached session, renewing it once if rejected.
    async fn submit(&self, request: &SolveRequest) -> Result<u64, SolverError> {
        let session = self.session().await?;
        match self.submit_once(&session, request).await {
            Err(SolverError::AuthenticationFailed(reason)) => {
                warn!(reason = %reason, "Remote solver session rejected, re-authenticating");
                self.invalidate_session().await;
                let session = self.session().await?;
                self.submit_once(&session, request).await
            }
            other => other,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SolverError> {
        let url = format!("{}{}", self.base_url(), path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(SolverError::from_transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SolverError::JobExpired(path.to_string()));
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
            .map_err(|e| SolverError::InvalidResponse(format!("{path}: {e}")))
    }

    async fn submission_jobs(&self, subid: u64) -> Result<Vec<u64>, SolverError> {
        let response: SubmissionResponse = self.get_json(&format!("/submissions/{subid}")).await?;
        Ok(response.jobs.into_iter().flatten().collect())
    }

    async fn job_status(&self, job_id: u64) -> Result<String, SolverError> {
        let response: JobResponse = self.get_json(&format!("/jobs/{job_id}")).await?;
        Ok(response.status)
    }

    async fn calibration(
        &self,
        job_id: u64,
        options: &SolveOptions,
    ) -> Result<Calibration, SolverError> {
        let response: CalibrationResponse = self
            .get_json(&format!("/jobs/{job_id}/calibration"))
            .await?;
        Ok(to_calibration(response, options))
    }

    async fn objects_in_field(&self, job_id: u64) -> Result<Vec<String>, SolverError> {
        let response: ObjectsResponse = self
            .get_json(&format!("/jobs/{job_id}/objects_in_field"))
            .await?;
        Ok(response.objects_in_field)
    }

    /// Poll the submission and its jobs until one job succeeds.
    async fn wait_for_success(
        &self,
        subid: u64,
        budget: &mut AttemptBudget,
    ) -> Result<u64, SolverError> {
        let mut job_ids: Vec<u64> = Vec::new();
        let mut failed: HashSet<u64> = HashSet::new();

        loop {
            budget.next_attempt().await?;
            metrics::SOLVER_POLLS.with_label_values(&[SOLVER_NAME]).inc();

            if job_ids.is_empty() {
                match self.submission_jobs(subid).await {
                    Ok(ids) if !ids.is_empty() => {
                        debug!(subid, jobs = ?ids, "Submission produced jobs");
                        job_ids = ids;
                    }
                    Ok(_) => debug!(subid, "Submission has no jobs yet"),
                    Err(e) if e.is_transient() => {
                        warn!(subid, error = %e, "Submission poll failed, retrying on next tick");
                        budget.record_error(&e);
                    }
                    Err(e) => return Err(e),
                }
                continue;
            }

            let pending: Vec<u64> = job_ids
                .iter()
                .copied()
                .filter(|id| !failed.contains(id))
                .collect();
            for job_id in pending {
                match self.job_status(job_id).await.as_deref() {
                    Ok("success") => return Ok(job_id),
                    Ok("failure") => {
                        debug!(job_id, "Remote job failed");
                        failed.insert(job_id);
                    }
                    Ok(status) => debug!(job_id, status, "Remote job still running"),
                    Err(e) if e.is_transient() => {
                        warn!(job_id, error = %e, "Job poll failed, retrying on next tick");
                        budget.record_error(e);
                    }
                    Err(e) => return Err(e.clone()),
                }
            }

            if failed.len() == job_ids.len() {
                return Err(SolverError::NoSolution(format!(
                    "all {} job(s) of submission {subid} failed",
                    job_ids.len()
                )));
            }
        }
    }

    async fn run(&self, request: &SolveRequest) -> Result<SolveOutcome, SolverError> {
        let mut budget = AttemptBudget::new(self.config.poll_policy());

        let subid = loop {
            budget.next_attempt().await?;
            match self.submit(request).await {
                Ok(subid) => break subid,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, remaining = budget.remaining(), "Remote submission failed, retrying");
                    budget.record_error(&e);
                }
                Err(e) => return Err(e),
            }
        };
        info!(subid, filename = %request.filename, "Submitted image to remote solver");

        let job_id = self.wait_for_success(subid, &mut budget).await?;

        let calibration = loop {
            match self.calibration(job_id, &request.options).await {
                Ok(calibration) => break calibration,
                Err(e) if e.is_transient() => {
                    budget.record_error(&e);
                    budget.next_attempt().await?;
                }
                Err(e) => return Err(e),
            }
        };

        let objects_in_field = match self.objects_in_field(job_id).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!(job_id, error = %e, "Could not fetch objects in field");
                Vec::new()
            }
        };

        Ok(SolveOutcome {
            calibration,
            objects_in_field,
            solver: SOLVER_NAME.to_string(),
            remote_job_id: Some(job_id.to_string()),
        })
    }
}

#[async_trait]
impl PlateSolver for RemoteSessionSolver {
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
                objects = outcome.objects_in_field.len(),
                "Remote solver found a solution"
            ),
            Err(e) => warn!(filename = %request.filename, error = %e, "Remote solve failed"),
        }
        result
    }

    async fn health(&self) -> Result<SolverHealth, SolverError> {
        match self.session().await {
            Ok(_) => Ok(SolverHealth {
                healthy: true,
                ..Default::default()
            }),
            Err(e) if e.is_transient() => Err(e),
            Err(e) => Ok(SolverHealth {
                healthy: false,
                message: Some(e.to_string()),
                ..Default::default()
            }),
        }
    }
}
