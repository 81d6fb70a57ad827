//! Bounded attempt budget shared by submission and polling.

use std::time::{Duration, Instant};

use super::error::SolverError;

/// How often and how many times a solver talks to its service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Fixed pause between consecutive attempts.
    pub interval: Duration,
    /// Total network attempts, submission included.
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Worst-case time spent waiting between attempts.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Counts attempts against a [`PollPolicy`].
///
/// The first attempt starts immediately; every later one waits one interval.
#[derive(Debug)]
pub struct AttemptBudget {
    policy: PollPolicy,
    used: u32,
    started: Instant,
    last_error: Option<String>,
}

impl AttemptBudget {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            used: 0,
            started: Instant::now(),
            last_error: None,
        }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.policy.max_attempts.saturating_sub(self.used)
    }

    /// Claim the next attempt, sleeping one interval unless it is the first.
    pub async fn next_attempt(&mut self) -> Result<u32, SolverError> {
        if self.used >= self.policy.max_attempts {
            return Err(self.exhausted());
        }
        if self.used > 0 {
            tokio::time::sleep(self.policy.interval).await;
        }
        self.used += 1;
        Ok(self.used)
    }

    /// Remember a transient failure for the eventual timeout message.
    pub fn record_error(&mut self, error: &SolverError) {
        self.last_error = Some(error.to_string());
    }

    pub fn exhausted(&self) -> SolverError {
        SolverError::Timeout {
            attempts: self.used,
            elapsed_secs: self.started.elapsed().as_secs(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling() {
        let policy = PollPolicy::new(Duration::from_secs(5), 60);
        assert_eq!(policy.ceiling(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_budget_exhausts_after_max_attempts() {
        let mut budget = AttemptBudget::new(PollPolicy::new(Duration::from_millis(20), 3));

        let started = Instant::now();
        assert_eq!(budget.next_attempt().await.unwrap(), 1);
        assert!(started.elapsed() < Duration::from_millis(20));
        assert_eq!(budget.next_attempt().await.unwrap(), 2);
        assert_eq!(budget.next_attempt().await.unwrap(), 3);
        assert_eq!(budget.remaining(), 0);

        budget.record_error(&SolverError::Network("refused".into()));
        let err = budget.next_attempt().await.unwrap_err();
        match err {
            SolverError::Timeout {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.unwrap().contains("refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_secs(1));
    }
}
