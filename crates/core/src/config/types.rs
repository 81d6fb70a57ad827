use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::converter::ConverterConfig;
use crate::matcher::MatcherConfig;
use crate::solver::{LocalQueueConfig, SolverBackend, SolverConfig, SubmissionMode};
use crate::storage::StorageConfig;
use crate::worker::WorkerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// One SQLite file holds jobs, the work queue and the catalog.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("skyingest.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub converter: ConverterConfig,
    pub worker: WorkerConfig,
    pub solver: SanitizedSolverConfig,
    pub matcher: MatcherConfig,
}

/// Sanitized solver config (API key redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSolverConfig {
    pub backend: String,
    pub local_queue: LocalQueueConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_session: Option<SanitizedRemoteSessionConfig>,
}

/// Sanitized remote session config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedRemoteSessionConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub submission: SubmissionMode,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub session_ttl_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            converter: config.converter.clone(),
            worker: config.worker.clone(),
            solver: SanitizedSolverConfig {
                backend: match config.solver.backend {
                    SolverBackend::LocalQueue => "local_queue".to_string(),
                    SolverBackend::RemoteSession => "remote_session".to_string(),
                },
                local_queue: config.solver.local_queue.clone(),
                remote_session: config.solver.remote_session.as_ref().map(|r| {
                    SanitizedRemoteSessionConfig {
                        url: r.url.clone(),
                        api_key_configured: !r.api_key.is_empty(),
                        submission: r.submission,
                        poll_interval_ms: r.poll_interval_ms,
                        max_attempts: r.max_attempts,
                        session_ttl_secs: r.session_ttl_secs,
                    }
                }),
            },
            matcher: config.matcher.clone(),
        }
    }
}
