//! Plate-solving clients.
//!
//! This module provides the `PlateSolver` trait and two interchangeable
//! strategies:
//!
//! - [`LocalQueueSolver`]: a local service with a submit/poll job queue.
//! - [`RemoteSessionSolver`]: a remote API with login sessions and
//!   submission/job resources.
//!
//! Both share the same attempt budget semantics ([`PollPolicy`]): transport
//! failures during submission or polling consume one attempt and are retried
//! on the next tick; exhausting the budget yields [`SolverError::Timeout`].
//! The strategy is chosen from configuration by [`create_plate_solver`].

mod config;
mod error;
mod local_queue;
mod poll;
mod remote_session;
mod session;
mod traits;
mod types;

pub use config::{
    LocalQueueConfig, RemoteSessionConfig, SolverBackend, SolverConfig, SubmissionMode,
};
pub use error::SolverError;
pub use local_queue::LocalQueueSolver;
pub use poll::{AttemptBudget, PollPolicy};
pub use remote_session::RemoteSessionSolver;
pub use session::Session;
pub use traits::PlateSolver;
pub use types::{Calibration, CenterHint, SolveOptions, SolveOutcome, SolveRequest, SolverHealth};

use std::sync::Arc;

/// Build the configured solving strategy.
pub fn create_plate_solver(config: &SolverConfig) -> Result<Arc<dyn PlateSolver>, SolverError> {
    match config.backend {
        SolverBackend::LocalQueue => Ok(Arc::new(LocalQueueSolver::new(
            config.local_queue.clone(),
        )?)),
        SolverBackend::RemoteSession => {
            let remote = config.remote_session.clone().ok_or_else(|| {
                SolverError::NotConfigured("solver.remote_session section missing".into())
            })?;
            Ok(Arc::new(RemoteSessionSolver::new(remote)?))
        }
    }
}
