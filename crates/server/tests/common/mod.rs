//! Common test utilities for API testing with mocks.
//!
//! The fixture builds the real router over in-memory SQLite stores, a mock
//! object store and a mock plate solver. The worker is never started; tests
//! drive the pipeline one job at a time with [`TestFixture::process_next`].

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use skyingest_core::{
    solver::{RemoteSessionConfig, SolverBackend},
    testing::{MockConverter, MockObjectStorage, MockPlateSolver},
    CatalogStore, Config, FitsMetadataExtractor, JobStore, PipelineWorker, SqliteCatalogStore,
    SqliteJobStore, SqliteWorkQueue, WorkerConfig, WorkerServices,
};
use skyingest_server::{create_router, AppState};

/// Re-export fixtures for test convenience
pub use skyingest_core::testing::fixtures;

/// API key configured for the remote solver section; must never be served.
pub const SECRET_API_KEY: &str = "very-secret-key";

/// In-process server with controllable collaborators.
pub struct TestFixture {
    pub router: Router,
    pub storage: Arc<MockObjectStorage>,
    pub solver: Arc<MockPlateSolver>,
    pub catalog: Arc<dyn CatalogStore>,
    pub worker: Arc<PipelineWorker>,
    /// Worker scratch space
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Create a fixture with the sample catalog seeded.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.solver.backend = SolverBackend::RemoteSession;
        config.solver.remote_session = Some(RemoteSessionConfig::new(
            "https://solver.test/api",
            SECRET_API_KEY,
        ));
        config.worker = WorkerConfig::default()
            .with_concurrency(1)
            .with_temp_dir(temp_dir.path().join("work"));

        let jobs: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::in_memory().expect("Failed to create job store"));
        let catalog: Arc<dyn CatalogStore> =
            Arc::new(SqliteCatalogStore::in_memory().expect("Failed to create catalog"));
        fixtures::seed_catalog(catalog.as_ref()).expect("Failed to seed catalog");
        let queue = Arc::new(
            SqliteWorkQueue::in_memory(config.worker.lease_timeout())
                .expect("Failed to create queue"),
        );

        let storage = Arc::new(MockObjectStorage::new());
        let solver = Arc::new(MockPlateSolver::new());

        let services = WorkerServices {
            jobs: Arc::clone(&jobs),
            catalog: Arc::clone(&catalog),
            queue,
            storage: storage.clone(),
            converter: Arc::new(MockConverter::new()),
            extractor: Arc::new(FitsMetadataExtractor::new()),
            solver: solver.clone(),
        };
        let worker = Arc::new(PipelineWorker::new(
            config.worker.clone(),
            config.matcher.clone(),
            services,
        ));

        let state = Arc::new(AppState::new(
            config,
            jobs,
            Arc::clone(&catalog),
            solver.clone(),
            Arc::clone(&worker),
        ));

        Self {
            router: create_router(state),
            storage,
            solver,
            catalog,
            worker,
            temp_dir,
        }
    }

    /// Run the next queued job through the pipeline.
    pub async fn process_next(&self) -> Option<String> {
        self.worker
            .process_next()
            .await
            .expect("Failed to process job")
    }

    /// Upload a file to the mock store and create a job for it.
    pub async fn submit(&self, key: &str, filename: &str, bytes: Vec<u8>) -> String {
        self.storage.put(key, bytes).await;
        let response = self
            .post(
                "/api/v1/jobs",
                serde_json::json!({
                    "user_id": "user-1",
                    "storage_key": key,
                    "original_filename": filename,
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}
