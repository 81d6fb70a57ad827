//! Plate-solver protocol tests.
//!
//! Both solving strategies run against in-process fake services:
//! - Local queue: submit, poll to completion, attempt budget, cancellation,
//!   expiry and health
//! - Remote session: login, session reuse and renewal, child job fan-out,
//!   URL submission and optional follow-up fetches

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};

use skyingest_core::solver::{
    LocalQueueConfig, LocalQueueSolver, PlateSolver, RemoteSessionConfig, RemoteSessionSolver,
    SolveOptions, SolveRequest, SolverError, SubmissionMode,
};

/// Serve `app` on an ephemeral port and return its base URL.
async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A base URL nothing listens on.
async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn request() -> SolveRequest {
    SolveRequest::new(vec![0u8; 2880], "frame.fits")
}

// =============================================================================
// Local queue service
// =============================================================================

#[derive(Default)]
struct LocalFake {
    /// Polls before the job completes. `None` keeps it processing forever.
    polls_until_solved: Option<u32>,
    expire: bool,
    fail: bool,
    polls: AtomicU32,
    fields: Mutex<Vec<(String, String)>>,
    cancels: Mutex<Vec<String>>,
}

async fn local_submit(State(fake): State<Arc<LocalFake>>, mut multipart: Multipart) -> Json<Value> {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let value = field.bytes().await.unwrap();
        fake.fields
            .lock()
            .unwrap()
            .push((name, String::from_utf8_lossy(&value).into_owned()));
    }
    Json(json!({ "success": true, "job_id": "job-1", "queue_position": 0 }))
}

async fn local_job(State(fake): State<Arc<LocalFake>>, Path(_id): Path<String>) -> Response {
    let polls = fake.polls.fetch_add(1, Ordering::SeqCst) + 1;
    if fake.expire {
        return StatusCode::NOT_FOUND.into_response();
    }
    if fake.fail {
        return Json(json!({ "status": "failed", "error": "too few stars" })).into_response();
    }
    match fake.polls_until_solved {
        Some(needed) if polls >= needed => Json(json!({
            "status": "completed",
            "solved": true,
            "ra": 10.68,
            "dec": 41.27,
            "orientation": 12.5,
            "pixscale": 1.1,
            "fieldw": 1.2,
            "fieldh": 0.8
        }))
        .into_response(),
        _ => Json(json!({ "status": "processing" })).into_response(),
    }
}

async fn local_cancel(State(fake): State<Arc<LocalFake>>, Path(id): Path<String>) -> Json<Value> {
    fake.cancels.lock().unwrap().push(id);
    Json(json!({ "success": true }))
}

async fn local_health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn local_queue() -> Json<Value> {
    Json(json!({ "queued": 1, "processing": 2, "max_concurrent": 4 }))
}

async fn local_service(fake: LocalFake) -> (String, Arc<LocalFake>) {
    let fake = Arc::new(fake);
    let app = Router::new()
        .route("/solve", post(local_submit))
        .route("/job/{id}", get(local_job).delete(local_cancel))
        .route("/health", get(local_health))
        .route("/queue", get(local_queue))
        .with_state(Arc::clone(&fake));
    (spawn(app).await, fake)
}

fn local_solver(url: &str, interval_ms: u64, max_attempts: u32) -> LocalQueueSolver {
    LocalQueueSolver::new(LocalQueueConfig::new(url).with_polling(interval_ms, max_attempts))
        .unwrap()
}

#[tokio::test]
async fn test_local_solve_after_polling() {
    let (url, fake) = local_service(LocalFake {
        polls_until_solved: Some(2),
        ..Default::default()
    })
    .await;
    let solver = local_solver(&url, 10, 10);

    let options = SolveOptions::default().with_fov(1.5).with_downsample(2);
    let outcome = solver.solve(request().with_options(options)).await.unwrap();

    assert_eq!(outcome.calibration.ra, 10.68);
    assert_eq!(outcome.calibration.dec, 41.27);
    assert_eq!(outcome.calibration.field_width, 1.2);
    assert_eq!(outcome.solver, "local_queue");
    assert_eq!(outcome.remote_job_id.as_deref(), Some("job-1"));
    assert_eq!(fake.polls.load(Ordering::SeqCst), 2);

    let fields = fake.fields.lock().unwrap().clone();
    let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"file"));
    assert!(fields.contains(&("fov".to_string(), "1.5".to_string())));
    assert!(fields.contains(&("downsample".to_string(), "2".to_string())));
    assert!(!names.contains(&"ra"));
}

#[tokio::test]
async fn test_local_budget_bounds_wait_and_cancels() {
    let (url, fake) = local_service(LocalFake::default()).await;
    let interval = Duration::from_millis(100);
    let solver = local_solver(&url, interval.as_millis() as u64, 3);

    let started = Instant::now();
    let err = solver.solve(request()).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(matches!(err, SolverError::Timeout { attempts: 3, .. }));
    // Submission plus two polls, never more than the budget ceiling
    assert_eq!(fake.polls.load(Ordering::SeqCst), 2);
    assert!(
        elapsed < interval * 3 + Duration::from_millis(400),
        "took {elapsed:?}"
    );
    assert_eq!(fake.cancels.lock().unwrap().as_slice(), ["job-1".to_string()]);
}

#[tokio::test]
async fn test_local_expired_job_is_definitive() {
    let (url, _fake) = local_service(LocalFake {
        expire: true,
        ..Default::default()
    })
    .await;
    let solver = local_solver(&url, 10, 10);

    let err = solver.solve(request()).await.unwrap_err();
    assert!(matches!(err, SolverError::JobExpired(_)));
    assert!(err.is_definitive());
}

#[tokio::test]
async fn test_local_failed_job_is_no_solution() {
    let (url, _fake) = local_service(LocalFake {
        fail: true,
        ..Default::default()
    })
    .await;
    let solver = local_solver(&url, 10, 10);

    let err = solver.solve(request()).await.unwrap_err();
    match err {
        SolverError::NoSolution(message) => assert!(message.contains("too few stars")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_local_unreachable_service_times_out() {
    let url = closed_port_url().await;
    let solver = local_solver(&url, 20, 3);

    let err = solver.solve(request()).await.unwrap_err();
    match &err {
        SolverError::Timeout {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(*attempts, 3);
            assert!(last_error.is_some());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_timeout());

    assert!(solver.health().await.is_err());
}

#[tokio::test]
async fn test_local_health_reports_queue() {
    let (url, _fake) = local_service(LocalFake::default()).await;
    let solver = local_solver(&url, 10, 10);

    let health = solver.health().await.unwrap();
    assert!(health.healthy);
    assert_eq!(health.queued, Some(1));
    assert_eq!(health.processing, Some(2));
    assert_eq!(health.max_concurrent, Some(4));
}

// =============================================================================
// Remote session service
// =============================================================================

#[derive(Default)]
struct RemoteFake {
    logins: AtomicU32,
    sessions: Mutex<Vec<String>>,
    reject_next_upload: AtomicBool,
    all_children_fail: bool,
    objects_broken: bool,
    submission_polls: AtomicU32,
    uploads: Mutex<Vec<Value>>,
    url_uploads: Mutex<Vec<Value>>,
}

impl RemoteFake {
    fn session_valid(&self, payload: &Value) -> bool {
        let session = payload["session"].as_str().unwrap_or_default();
        self.sessions.lock().unwrap().iter().any(|s| s == session)
    }
}

fn request_json(form: &HashMap<String, String>) -> Value {
    form.get("request-json")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(Value::Null)
}

async fn remote_login(
    State(fake): State<Arc<RemoteFake>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let payload = request_json(&form);
    if payload["apikey"] != "good-key" {
        return Json(json!({ "status": "error", "errormessage": "bad apikey" }));
    }
    let n = fake.logins.fetch_add(1, Ordering::SeqCst) + 1;
    let session = format!("sess-{n}");
    fake.sessions.lock().unwrap().push(session.clone());
    Json(json!({ "status": "success", "session": session }))
}

async fn remote_upload(State(fake): State<Arc<RemoteFake>>, mut multipart: Multipart) -> Json<Value> {
    let mut payload = Value::Null;
    let mut file_bytes = 0;
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap();
        match name.as_str() {
            "request-json" => payload = serde_json::from_slice(&bytes).unwrap(),
            "file" => file_bytes = bytes.len(),
            _ => {}
        }
    }

    if fake.reject_next_upload.swap(false, Ordering::SeqCst) {
        fake.sessions.lock().unwrap().clear();
    }
    if !fake.session_valid(&payload) {
        return Json(json!({ "status": "error", "errormessage": "no session with key" }));
    }

    payload["file_bytes"] = json!(file_bytes);
    fake.uploads.lock().unwrap().push(payload);
    Json(json!({ "status": "success", "subid": 7 }))
}

async fn remote_url_upload(
    State(fake): State<Arc<RemoteFake>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let payload = request_json(&form);
    if !fake.session_valid(&payload) {
        return Json(json!({ "status": "error", "errormessage": "no session with key" }));
    }
    fake.url_uploads.lock().unwrap().push(payload);
    Json(json!({ "status": "success", "subid": 8 }))
}

async fn remote_submission(State(fake): State<Arc<RemoteFake>>, Path(_id): Path<u64>) -> Json<Value> {
    // Jobs appear on the second poll
    if fake.submission_polls.fetch_add(1, Ordering::SeqCst) == 0 {
        Json(json!({ "jobs": [] }))
    } else {
        Json(json!({ "jobs": [null, 11, 12] }))
    }
}

async fn remote_job(State(fake): State<Arc<RemoteFake>>, Path(id): Path<u64>) -> Json<Value> {
    let status = match id {
        12 if !fake.all_children_fail => "success",
        _ => "failure",
    };
    Json(json!({ "status": status }))
}

async fn remote_calibration(Path(_id): Path<u64>) -> Json<Value> {
    Json(json!({
        "ra": 314.7,
        "dec": 44.3,
        "orientation": 90.0,
        "pixscale": 1.2,
        "radius": 1.5,
        "parity": 1.0
    }))
}

async fn remote_objects(State(fake): State<Arc<RemoteFake>>, Path(_id): Path<u64>) -> Response {
    if fake.objects_broken {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({ "objects_in_field": ["NGC 7000", "North America Nebula"] })).into_response()
}

async fn remote_service(fake: RemoteFake) -> (String, Arc<RemoteFake>) {
    let fake = Arc::new(fake);
    let app = Router::new()
        .route("/login", post(remote_login))
        .route("/upload", post(remote_upload))
        .route("/url_upload", post(remote_url_upload))
        .route("/submissions/{id}", get(remote_submission))
        .route("/jobs/{id}", get(remote_job))
        .route("/jobs/{id}/calibration", get(remote_calibration))
        .route("/jobs/{id}/objects_in_field", get(remote_objects))
        .with_state(Arc::clone(&fake));
    (spawn(app).await, fake)
}

fn remote_config(url: &str) -> RemoteSessionConfig {
    RemoteSessionConfig::new(url, "good-key").with_polling(10, 20)
}

#[tokio::test]
async fn test_remote_solve_first_successful_child_wins() {
    let (url, fake) = remote_service(RemoteFake::default()).await;
    let solver = RemoteSessionSolver::new(remote_config(&url)).unwrap();

    let options = SolveOptions::default()
        .with_fov(2.0)
        .with_downsample(4)
        .with_dimensions(1000, 800);
    let outcome = solver.solve(request().with_options(options)).await.unwrap();

    assert_eq!(outcome.calibration.ra, 314.7);
    assert_eq!(outcome.calibration.parity, Some(1.0));
    assert!((outcome.calibration.field_width - 1000.0 * 1.2 / 3600.0).abs() < 1e-9);
    assert!((outcome.calibration.field_height - 800.0 * 1.2 / 3600.0).abs() < 1e-9);
    assert_eq!(outcome.remote_job_id.as_deref(), Some("12"));
    assert_eq!(outcome.objects_in_field, vec!["NGC 7000", "North America Nebula"]);
    assert_eq!(outcome.solver, "remote_session");

    let uploads = fake.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    let payload = &uploads[0];
    assert_eq!(payload["session"], "sess-1");
    assert_eq!(payload["publicly_visible"], "n");
    assert_eq!(payload["allow_commercial_use"], "n");
    assert_eq!(payload["scale_units"], "degwidth");
    assert_eq!(payload["downsample_factor"], 4);
    assert_eq!(payload["file_bytes"], 2880);
}

#[tokio::test]
async fn test_remote_session_is_reused() {
    let (url, fake) = remote_service(RemoteFake::default()).await;
    let solver = RemoteSessionSolver::new(remote_config(&url)).unwrap();

    solver.solve(request()).await.unwrap();
    solver.solve(request()).await.unwrap();

    assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remote_session_renewed_near_expiry() {
    let (url, fake) = remote_service(RemoteFake::default()).await;
    // A session that is always inside the refresh margin
    let config = remote_config(&url).with_session_ttl(1, 1);
    let solver = RemoteSessionSolver::new(config).unwrap();

    solver.solve(request()).await.unwrap();
    solver.solve(request()).await.unwrap();

    assert_eq!(fake.logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_remote_rejected_session_relogs_once() {
    let fake = RemoteFake::default();
    fake.reject_next_upload.store(true, Ordering::SeqCst);
    let (url, fake) = remote_service(fake).await;
    let solver = RemoteSessionSolver::new(remote_config(&url)).unwrap();

    let outcome = solver.solve(request()).await.unwrap();

    assert_eq!(outcome.remote_job_id.as_deref(), Some("12"));
    assert_eq!(fake.logins.load(Ordering::SeqCst), 2);
    assert_eq!(fake.uploads.lock().unwrap()[0]["session"], "sess-2");
}

#[tokio::test]
async fn test_remote_all_children_failing_is_no_solution() {
    let (url, _fake) = remote_service(RemoteFake {
        all_children_fail: true,
        ..Default::default()
    })
    .await;
    let solver = RemoteSessionSolver::new(remote_config(&url)).unwrap();

    let err = solver.solve(request()).await.unwrap_err();
    assert!(matches!(err, SolverError::NoSolution(_)));
    assert!(err.is_definitive());
}

#[tokio::test]
async fn test_remote_url_submission() {
    let (url, fake) = remote_service(RemoteFake::default()).await;
    let config = remote_config(&url).with_submission(SubmissionMode::Url);
    let solver = RemoteSessionSolver::new(config).unwrap();

    let request = request().with_source_url("https://storage.test/user-1/m31.jpg");
    solver.solve(request).await.unwrap();

    assert!(fake.uploads.lock().unwrap().is_empty());
    let url_uploads = fake.url_uploads.lock().unwrap().clone();
    assert_eq!(url_uploads.len(), 1);
    assert_eq!(url_uploads[0]["url"], "https://storage.test/user-1/m31.jpg");
}

#[tokio::test]
async fn test_remote_url_mode_without_url_uploads_bytes() {
    let (url, fake) = remote_service(RemoteFake::default()).await;
    let config = remote_config(&url).with_submission(SubmissionMode::Url);
    let solver = RemoteSessionSolver::new(config).unwrap();

    solver.solve(request()).await.unwrap();

    assert_eq!(fake.uploads.lock().unwrap().len(), 1);
    assert!(fake.url_uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_objects_failure_gives_empty_list() {
    let (url, _fake) = remote_service(RemoteFake {
        objects_broken: true,
        ..Default::default()
    })
    .await;
    let solver = RemoteSessionSolver::new(remote_config(&url)).unwrap();

    let outcome = solver.solve(request()).await.unwrap();
    assert!(outcome.objects_in_field.is_empty());
    assert_eq!(outcome.calibration.dec, 44.3);
}

#[tokio::test]
async fn test_remote_bad_key() {
    let (url, _fake) = remote_service(RemoteFake::default()).await;
    let config = RemoteSessionConfig::new(&url, "wrong-key").with_polling(10, 20);
    let solver = RemoteSessionSolver::new(config).unwrap();

    let err = solver.solve(request()).await.unwrap_err();
    assert!(matches!(err, SolverError::AuthenticationFailed(_)));

    let health = solver.health().await.unwrap();
    assert!(!health.healthy);
    assert!(health.message.unwrap().contains("bad apikey"));
}

#[tokio::test]
async fn test_remote_unreachable_service_times_out() {
    let url = closed_port_url().await;
    let config = RemoteSessionConfig::new(&url, "good-key").with_polling(20, 3);
    let solver = RemoteSessionSolver::new(config).unwrap();

    let err = solver.solve(request()).await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err:?}");
}
