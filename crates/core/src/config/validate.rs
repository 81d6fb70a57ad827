use super::{types::Config, ConfigError};
use crate::solver::SolverBackend;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Worker concurrency, poll interval and retry attempts are not 0
/// - The queue lease outlives the job timeout
/// - Matcher tolerance is positive
/// - Solver polling is not 0 and a remote backend has its section and key
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    // Worker validation
    if config.worker.concurrency == 0 {
        return Err(invalid("worker.concurrency cannot be 0"));
    }
    if config.worker.poll_interval_ms == 0 {
        return Err(invalid("worker.poll_interval_ms cannot be 0"));
    }
    if config.worker.retry.max_attempts == 0 {
        return Err(invalid("worker.retry.max_attempts cannot be 0"));
    }
    if config.worker.lease_timeout_secs <= config.worker.job_timeout_secs {
        return Err(invalid(
            "worker.lease_timeout_secs must be greater than worker.job_timeout_secs",
        ));
    }

    // Matcher validation
    let tolerance = config.matcher.tolerance_deg;
    if tolerance.is_nan() || tolerance <= 0.0 {
        return Err(invalid("matcher.tolerance_deg must be positive"));
    }

    // Solver validation
    let local = &config.solver.local_queue;
    if local.poll_interval_ms == 0 || local.max_attempts == 0 {
        return Err(invalid(
            "solver.local_queue poll_interval_ms and max_attempts cannot be 0",
        ));
    }

    if config.solver.backend == SolverBackend::RemoteSession {
        let remote = config.solver.remote_session.as_ref().ok_or_else(|| {
            invalid("solver.remote_session section is required for the remote_session backend")
        })?;
        if remote.api_key.trim().is_empty() {
            return Err(invalid("solver.remote_session.api_key cannot be empty"));
        }
        if remote.poll_interval_ms == 0 || remote.max_attempts == 0 {
            return Err(invalid(
                "solver.remote_session poll_interval_ms and max_attempts cannot be 0",
            ));
        }
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::RemoteSessionConfig;

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = Config::default();
        config.worker.concurrency = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_lease_must_outlive_job_timeout() {
        let mut config = Config::default();
        config.worker.job_timeout_secs = 1800;
        config.worker.lease_timeout_secs = 10;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("lease_timeout_secs"));

        config.worker.lease_timeout_secs = 1800;
        assert!(validate_config(&config).is_err());

        config.worker.lease_timeout_secs = 1801;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_tolerance_must_be_positive() {
        let mut config = Config::default();
        config.matcher.tolerance_deg = 0.0;
        assert!(validate_config(&config).is_err());

        config.matcher.tolerance_deg = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_solver_attempts_fails() {
        let mut config = Config::default();
        config.solver.local_queue.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_remote_session_requirements() {
        let mut config = Config::default();
        config.solver.backend = SolverBackend::RemoteSession;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("solver.remote_session"));

        config.solver.remote_session = Some(RemoteSessionConfig::new("http://solver.test", "  "));
        assert!(validate_config(&config).is_err());

        config.solver.remote_session = Some(RemoteSessionConfig::new("http://solver.test", "key"));
        assert!(validate_config(&config).is_ok());
    }
}
