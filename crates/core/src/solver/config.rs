//! Configuration for the plate-solving clients.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::poll::PollPolicy;

/// Which solving strategy the pipeline uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverBackend {
    /// Local queue-based solving service.
    #[default]
    LocalQueue,
    /// Remote session-based solving API.
    RemoteSession,
}

impl std::fmt::Display for SolverBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalQueue => write!(f, "local_queue"),
            Self::RemoteSession => write!(f, "remote_session"),
        }
    }
}

/// Solver selection plus per-strategy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default)]
    pub backend: SolverBackend,

    #[serde(default)]
    pub local_queue: LocalQueueConfig,

    /// Required when `backend = "remote_session"`.
    #[serde(default)]
    pub remote_session: Option<RemoteSessionConfig>,
}

/// Local queued solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalQueueConfig {
    /// Base URL of the solving service.
    #[serde(default = "default_local_url")]
    pub url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Total attempts for submission and polling.
    #[serde(default = "default_local_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for status and health requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Base upload timeout.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,

    /// Extra upload seconds per megabyte.
    #[serde(default = "default_upload_timeout_per_mb")]
    pub upload_timeout_secs_per_mb: u64,
}

fn default_local_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_local_max_attempts() -> u32 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_upload_timeout() -> u64 {
    120
}

fn default_upload_timeout_per_mb() -> u64 {
    5
}

impl Default for LocalQueueConfig {
    fn default() -> Self {
        Self {
            url: default_local_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_local_max_attempts(),
            request_timeout_secs: default_request_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            upload_timeout_secs_per_mb: default_upload_timeout_per_mb(),
        }
    }
}

impl LocalQueueConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_polling(mut self, interval_ms: u64, max_attempts: u32) -> Self {
        self.poll_interval_ms = interval_ms;
        self.max_attempts = max_attempts;
        self
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.poll_interval_ms), self.max_attempts)
    }

    pub fn upload_timeout(&self, size_mb: u64) -> Duration {
        upload_timeout(self.upload_timeout_secs, self.upload_timeout_secs_per_mb, size_mb)
    }
}

/// How images reach the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    /// Multipart upload of the image bytes.
    #[default]
    Upload,
    /// Let the service fetch the image from a public URL.
    Url,
}

/// Remote session-based solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSessionConfig {
    /// API base URL, e.g. `http://nova.astrometry.net/api`.
    #[serde(default = "default_remote_url")]
    pub url: String,

    pub api_key: String,

    #[serde(default)]
    pub submission: SubmissionMode,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Total attempts for submission and polling.
    #[serde(default = "default_remote_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_remote_upload_timeout")]
    pub upload_timeout_secs: u64,

    #[serde(default = "default_upload_timeout_per_mb")]
    pub upload_timeout_secs_per_mb: u64,

    /// Lifetime the server grants a session.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Sessions are renewed this long before they expire.
    #[serde(default = "default_session_refresh_margin")]
    pub session_refresh_margin_secs: u64,

    #[serde(default)]
    pub publicly_visible: bool,
}

fn default_remote_url() -> String {
    "http://nova.astrometry.net/api".to_string()
}

fn default_remote_max_attempts() -> u32 {
    120
}

fn default_remote_upload_timeout() -> u64 {
    300
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_session_refresh_margin() -> u64 {
    300
}

impl RemoteSessionConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            submission: SubmissionMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_remote_max_attempts(),
            request_timeout_secs: default_request_timeout(),
            upload_timeout_secs: default_remote_upload_timeout(),
            upload_timeout_secs_per_mb: default_upload_timeout_per_mb(),
            session_ttl_secs: default_session_ttl(),
            session_refresh_margin_secs: default_session_refresh_margin(),
            publicly_visible: false,
        }
    }

    pub fn with_polling(mut self, interval_ms: u64, max_attempts: u32) -> Self {
        self.poll_interval_ms = interval_ms;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_session_ttl(mut self, ttl_secs: u64, refresh_margin_secs: u64) -> Self {
        self.session_ttl_secs = ttl_secs;
        self.session_refresh_margin_secs = refresh_margin_secs;
        self
    }

    pub fn with_submission(mut self, mode: SubmissionMode) -> Self {
        self.submission = mode;
        self
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.poll_interval_ms), self.max_attempts)
    }

    pub fn upload_timeout(&self, size_mb: u64) -> Duration {
        upload_timeout(self.upload_timeout_secs, self.upload_timeout_secs_per_mb, size_mb)
    }
}

fn upload_timeout(base_secs: u64, per_mb_secs: u64, size_mb: u64) -> Duration {
    Duration::from_secs(base_secs.saturating_add(per_mb_secs.saturating_mul(size_mb)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SolverConfig::default();
        assert_eq!(config.backend, SolverBackend::LocalQueue);
        assert_eq!(
            config.local_queue.poll_policy().ceiling(),
            Duration::from_secs(300)
        );
        assert!(config.remote_session.is_none());
    }

    #[test]
    fn test_deserialize_remote() {
        let config: SolverConfig = toml::from_str(
            r#"
            backend = "remote_session"

            [remote_session]
            api_key = "secret"
            submission = "url"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, SolverBackend::RemoteSession);
        let remote = config.remote_session.unwrap();
        assert_eq!(remote.url, "http://nova.astrometry.net/api");
        assert_eq!(remote.submission, SubmissionMode::Url);
        assert_eq!(remote.session_ttl_secs, 3600);
    }

    #[test]
    fn test_upload_timeout_scales() {
        let config = LocalQueueConfig::default();
        assert_eq!(config.upload_timeout(0), Duration::from_secs(120));
        assert_eq!(config.upload_timeout(40), Duration::from_secs(320));
    }
}
