//! Pipeline worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::RetryConfig;

/// Configuration for the pipeline worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Start the worker with the server.
    /// When disabled, jobs are queued but not processed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum jobs processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How often to check the queue when idle (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Directory for per-job temporary files.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Wall-clock limit for one pipeline run in seconds.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// How long a leased queue entry stays hidden in seconds. Should exceed
    /// the job timeout so a live run is never delivered twice.
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,

    /// Canonical files at least this large are solved with downsample 2.
    #[serde(default = "default_downsample_large")]
    pub downsample_large_bytes: u64,

    /// Canonical files at least this large are solved with downsample 4.
    #[serde(default = "default_downsample_huge")]
    pub downsample_huge_bytes: u64,

    /// How long `stop` waits for running jobs in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Queue redelivery policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("skyingest")
}

fn default_job_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_lease_timeout() -> u64 {
    2100 // job timeout plus 5 minutes
}

fn default_downsample_large() -> u64 {
    50 * 1024 * 1024 // 50 MB
}

fn default_downsample_huge() -> u64 {
    200 * 1024 * 1024 // 200 MB
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            temp_dir: default_temp_dir(),
            job_timeout_secs: default_job_timeout(),
            lease_timeout_secs: default_lease_timeout(),
            downsample_large_bytes: default_downsample_large(),
            downsample_huge_bytes: default_downsample_huge(),
            shutdown_grace_secs: default_shutdown_grace(),
            retry: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Sets the concurrency ceiling.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Sets the per-job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Sets the redelivery policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    /// Downsample factor for a canonical file of `size_bytes`.
    pub fn downsample_for(&self, size_bytes: u64) -> Option<u32> {
        if size_bytes >= self.downsample_huge_bytes {
            Some(4)
        } else if size_bytes >= self.downsample_large_bytes {
            Some(2)
        } else {
            None
        }
    }
}
