//! Configuration for the converter module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the external conversion tool.
///
/// The tool is invoked as `<program> [<script>] [extra args] <input> <output>`
/// and reports its result as one JSON object on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Program to execute (an interpreter or the tool itself).
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Optional script passed as the first argument.
    #[serde(default)]
    pub script: Option<PathBuf>,

    /// Additional arguments placed before the input/output paths.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Base timeout for a single conversion in seconds.
    #[serde(default = "default_base_timeout")]
    pub base_timeout_secs: u64,

    /// Extra seconds granted per megabyte of input.
    #[serde(default = "default_timeout_per_mb")]
    pub timeout_secs_per_mb: u64,

    /// Upper bound for the scaled timeout.
    #[serde(default = "default_max_timeout")]
    pub max_timeout_secs: u64,
}

fn default_program() -> PathBuf {
    PathBuf::from("convert-to-fits")
}

fn default_base_timeout() -> u64 {
    120
}

fn default_timeout_per_mb() -> u64 {
    2
}

fn default_max_timeout() -> u64 {
    900
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: None,
            extra_args: Vec::new(),
            base_timeout_secs: default_base_timeout(),
            timeout_secs_per_mb: default_timeout_per_mb(),
            max_timeout_secs: default_max_timeout(),
        }
    }
}

impl ConverterConfig {
    /// Creates a config that runs `script` through `program`.
    pub fn with_script(program: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: Some(script.into()),
            ..Default::default()
        }
    }

    /// Sets the base timeout.
    pub fn with_base_timeout(mut self, secs: u64) -> Self {
        self.base_timeout_secs = secs;
        self
    }

    /// Sets the per-megabyte timeout allowance.
    pub fn with_timeout_per_mb(mut self, secs: u64) -> Self {
        self.timeout_secs_per_mb = secs;
        self
    }

    /// Timeout for an input of `size_bytes`, capped at `max_timeout_secs`.
    pub fn timeout_secs_for(&self, size_bytes: u64) -> u64 {
        let size_mb = size_bytes.div_ceil(1024 * 1024);
        self.base_timeout_secs
            .saturating_add(self.timeout_secs_per_mb.saturating_mul(size_mb))
            .min(self.max_timeout_secs.max(self.base_timeout_secs))
    }

    pub fn timeout_for(&self, size_bytes: u64) -> Duration {
        Duration::from_secs(self.timeout_secs_for(size_bytes))
    }
}
