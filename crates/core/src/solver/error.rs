//! Error types for the solver module.

use thiserror::Error;

/// Errors from a plate-solving client.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// The attempt budget ran out before the service reached a terminal state.
    #[error("Plate solve timed out after {attempts} attempts ({elapsed_secs}s){}", last_error_suffix(.last_error))]
    Timeout {
        attempts: u32,
        elapsed_secs: u64,
        last_error: Option<String>,
    },

    /// The service finished but found no solution.
    #[error("No solution found: {0}")]
    NoSolution(String),

    #[error("Solve job {0} was cancelled")]
    Cancelled(String),

    /// The service no longer knows the job.
    #[error("Solve job {0} not found or expired")]
    JobExpired(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The service refused the submission.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    /// Connection-level failure; retried on the next tick.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Solver not configured: {0}")]
    NotConfigured(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(": last error: {e}"),
        None => String::new(),
    }
}

impl SolverError {
    /// Retried within the attempt budget instead of aborting the solve.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// The service could not be reached or never finished in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network(_))
    }

    /// The service gave a final answer about this image.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            Self::NoSolution(_) | Self::Cancelled(_) | Self::JobExpired(_) | Self::Rejected(_)
        )
    }

    /// Short machine-readable classification.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::NoSolution(_) => "no_solution",
            Self::Cancelled(_) => "cancelled",
            Self::JobExpired(_) => "expired",
            Self::AuthenticationFailed(_) => "auth",
            Self::Rejected(_) => "rejected",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::NotConfigured(_) => "not_configured",
        }
    }

    /// Map a transport error. Decode failures are not transient.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
