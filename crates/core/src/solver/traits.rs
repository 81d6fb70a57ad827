//! Trait definitions for the solver module.

use async_trait::async_trait;

use super::error::SolverError;
use super::types::{SolveOutcome, SolveRequest, SolverHealth};

/// A plate-solving strategy.
///
/// Implementations own submission, polling and timeouts. Callers only see a
/// final calibration or an error.
#[async_trait]
pub trait PlateSolver: Send + Sync {
    /// Returns the name of this solver implementation.
    fn name(&self) -> &str;

    /// Solve an image. Bounded by the implementation's attempt budget.
    async fn solve(&self, request: SolveRequest) -> Result<SolveOutcome, SolverError>;

    /// Liveness and capacity of the backing service.
    async fn health(&self) -> Result<SolverHealth, SolverError>;
}
