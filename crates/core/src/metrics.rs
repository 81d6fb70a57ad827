//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Pipeline worker (job outcomes, stage timings, queue redeliveries)
//! - Format conversion
//! - Plate solving (requests and poll attempts per strategy)
//! - Target matching

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Worker Metrics
// =============================================================================

/// Jobs that left the pipeline, by outcome.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("skyingest_jobs_finished_total", "Jobs finished by outcome"),
        &["outcome"], // "completed", "needs_target", "failed"
    )
    .unwrap()
});

/// End-to-end job duration in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "skyingest_job_duration_seconds",
            "Duration of one pipeline run",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Duration of each pipeline stage in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "skyingest_stage_duration_seconds",
            "Duration of pipeline stages",
        )
        .buckets(vec![0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 180.0, 600.0]),
        &["stage"],
    )
    .unwrap()
});

/// Queue redeliveries scheduled after a failed attempt.
pub static QUEUE_REDELIVERIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "skyingest_queue_redeliveries_total",
        "Jobs scheduled for another delivery attempt",
    )
    .unwrap()
});

// =============================================================================
// Conversion Metrics
// =============================================================================

/// Conversions by source format and result.
pub static CONVERSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("skyingest_conversions_total", "Total format conversions"),
        &["format", "result"], // result: "success", "error"
    )
    .unwrap()
});

/// Conversion duration in seconds.
pub static CONVERSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "skyingest_conversion_duration_seconds",
            "Duration of format conversions",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
        &["format"],
    )
    .unwrap()
});

// =============================================================================
// Solver Metrics
// =============================================================================

/// Solve requests by strategy and result.
pub static SOLVER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("skyingest_solver_requests_total", "Total plate-solve requests"),
        &["solver", "result"],
    )
    .unwrap()
});

/// Status polls sent to the solving service.
pub static SOLVER_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("skyingest_solver_polls_total", "Total solver status polls"),
        &["solver"],
    )
    .unwrap()
});

// =============================================================================
// Matcher Metrics
// =============================================================================

/// Target matches by method.
pub static MATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("skyingest_matches_total", "Target matches by method"),
        &["method"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Worker
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(QUEUE_REDELIVERIES.clone()),
        // Conversion
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        // Solver
        Box::new(SOLVER_REQUESTS.clone()),
        Box::new(SOLVER_POLLS.clone()),
        // Matcher
        Box::new(MATCHES_TOTAL.clone()),
    ]
}
