//! Mock plate solver for testing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::solver::{
    Calibration, PlateSolver, SolveOptions, SolveOutcome, SolveRequest, SolverError, SolverHealth,
};

/// A recorded solve request for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedSolve {
    pub filename: String,
    pub size_bytes: usize,
    pub options: SolveOptions,
    pub source_url: Option<String>,
}

/// Mock implementation of the PlateSolver trait.
///
/// Scripted results are returned in order; once they run out every call
/// gets the fallback, which defaults to `NoSolution`.
#[derive(Debug)]
pub struct MockPlateSolver {
    scripted: Arc<RwLock<VecDeque<Result<SolveOutcome, SolverError>>>>,
    fallback: Arc<RwLock<Result<SolveOutcome, SolverError>>>,
    requests: Arc<RwLock<Vec<RecordedSolve>>>,
    delay: Arc<RwLock<Duration>>,
    health: Arc<RwLock<SolverHealth>>,
}

impl Default for MockPlateSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlateSolver {
    pub fn new() -> Self {
        Self {
            scripted: Arc::new(RwLock::new(VecDeque::new())),
            fallback: Arc::new(RwLock::new(Err(SolverError::NoSolution(
                "mock solver has no solution".to_string(),
            )))),
            requests: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            health: Arc::new(RwLock::new(SolverHealth {
                healthy: true,
                ..Default::default()
            })),
        }
    }

    /// Successful outcome centred on the given position.
    pub fn outcome(ra: f64, dec: f64) -> SolveOutcome {
        SolveOutcome {
            calibration: Calibration {
                ra,
                dec,
                orientation: 0.0,
                pixel_scale: 1.5,
                field_width: 1.0,
                field_height: 0.75,
                parity: None,
                radius: None,
            },
            objects_in_field: Vec::new(),
            solver: "mock".to_string(),
            remote_job_id: None,
        }
    }

    /// Queue a result for the next call.
    pub async fn push_result(&self, result: Result<SolveOutcome, SolverError>) {
        self.scripted.write().await.push_back(result);
    }

    /// Result returned once scripted results run out.
    pub async fn set_fallback(&self, result: Result<SolveOutcome, SolverError>) {
        *self.fallback.write().await = result;
    }

    /// Make every call take this long.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub async fn set_health(&self, health: SolverHealth) {
        *self.health.write().await = health;
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<RecordedSolve> {
        self.requests.read().await.clone()
    }

    pub async fn solve_count(&self) -> usize {
        self.requests.read().await.len()
    }
}

#[async_trait]
impl PlateSolver for MockPlateSolver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn solve(&self, request: SolveRequest) -> Result<SolveOutcome, SolverError> {
        self.requests.write().await.push(RecordedSolve {
            filename: request.filename.clone(),
            size_bytes: request.image.len(),
            options: request.options.clone(),
            source_url: request.source_url.clone(),
        });

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(result) = self.scripted.write().await.pop_front() {
            return result;
        }
        self.fallback.read().await.clone()
    }

    async fn health(&self) -> Result<SolverHealth, SolverError> {
        Ok(self.health.read().await.clone())
    }
}
