//! Processing job entity and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinates::SkyPosition;
use crate::extractor::ImageMetadata;
use crate::matcher::MatchMethod;
use crate::solver::Calibration;

/// Pipeline stage of a processing job.
///
/// In-flight stages only move forward. `COMPLETED`, `FAILED` and
/// `NEEDS_TARGET` end the pipeline; only an explicit retry or manual
/// assignment leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Converting,
    Extracting,
    PlateSolving,
    Matching,
    Completed,
    Failed,
    NeedsTarget,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Pending,
        JobStatus::Converting,
        JobStatus::Extracting,
        JobStatus::PlateSolving,
        JobStatus::Matching,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::NeedsTarget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Converting => "CONVERTING",
            Self::Extracting => "EXTRACTING",
            Self::PlateSolving => "PLATE_SOLVING",
            Self::Matching => "MATCHING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::NeedsTarget => "NEEDS_TARGET",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(value))
    }

    /// The pipeline is done with this job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NeedsTarget)
    }

    /// A worker is (or was, before a crash) driving this job.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Converting | Self::Extracting | Self::PlateSolving | Self::Matching
        )
    }

    /// Position along the pipeline; terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Converting => 1,
            Self::Extracting => 2,
            Self::PlateSolving => 3,
            Self::Matching => 4,
            Self::Completed | Self::Failed | Self::NeedsTarget => 5,
        }
    }

    /// Whether the pipeline may move from `self` to the in-flight stage `next`.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.is_in_flight() && next.rank() >= self.rank()
    }

    pub fn can_retry(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn can_assign_target(&self) -> bool {
        matches!(self, Self::NeedsTarget | Self::Failed)
    }

    /// Coarse progress at stage-boundary granularity.
    pub fn progress_percent(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Converting => 10,
            Self::Extracting => 30,
            Self::PlateSolving => 50,
            Self::Matching => 80,
            Self::Completed | Self::Failed | Self::NeedsTarget => 100,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification written to `error_details.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    ConversionFailure,
    ExtractionFailure,
    SolveTimeout,
    SolveFailure,
    QueueDeliveryFailure,
    JobTimeout,
    StorageFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "unsupported_format",
            Self::ConversionFailure => "conversion_failure",
            Self::ExtractionFailure => "extraction_failure",
            Self::SolveTimeout => "solve_timeout",
            Self::SolveFailure => "solve_failure",
            Self::QueueDeliveryFailure => "queue_delivery_failure",
            Self::JobTimeout => "job_timeout",
            Self::StorageFailure => "storage_failure",
        }
    }
}

/// A pipeline failure ready to be written to a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub stage: JobStatus,
    pub message: String,
    /// Extra fields merged into `error_details`.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, stage: JobStatus, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Structured detail blob: `kind`, `stage` and any extra fields.
    pub fn details(&self) -> serde_json::Value {
        let mut map = self.fields.clone();
        map.insert("kind".into(), self.kind.as_str().into());
        map.insert("stage".into(), self.stage.as_str().into());
        serde_json::Value::Object(map)
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} during {}: {}", self.kind.as_str(), self.stage, self.message)
    }
}

/// Fields copied from the metadata extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub target_name_hint: Option<String>,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub exposure_time: Option<f64>,
    pub total_integration_time: Option<f64>,
    pub filter_name: Option<String>,
    pub capture_date: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl From<&ImageMetadata> for ExtractedFields {
    fn from(meta: &ImageMetadata) -> Self {
        let position = meta.position();
        Self {
            target_name_hint: meta.name_hint().map(String::from),
            ra: position.map(|p| p.ra),
            dec: position.map(|p| p.dec),
            exposure_time: meta.exposure_time,
            total_integration_time: meta.total_integration_time,
            filter_name: meta.filter.clone(),
            capture_date: meta.capture_time,
            metadata: Some(meta.to_json()),
        }
    }
}

/// Match result written on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub target_id: String,
    pub method: MatchMethod,
    pub image_record_id: String,
}

/// Final outcome exposed to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        image_record_id: Option<String>,
        target_id: Option<String>,
    },
    NeedsTarget {
        name_hint: Option<String>,
        ra: Option<f64>,
        dec: Option<f64>,
    },
    Failed {
        error: String,
    },
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// One uploaded file moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub user_id: String,
    /// Key of the source object in durable storage.
    pub storage_key: String,
    pub original_filename: String,
    pub status: JobStatus,

    pub target_name_hint: Option<String>,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub exposure_time: Option<f64>,
    pub total_integration_time: Option<f64>,
    pub filter_name: Option<String>,
    pub capture_date: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub calibration: Option<Calibration>,

    pub matched_target_id: Option<String>,
    pub match_method: Option<MatchMethod>,
    pub image_record_id: Option<String>,

    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    /// Number of operator-triggered retries.
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    pub fn progress_percent(&self) -> u8 {
        self.status.progress_percent()
    }

    /// Coordinates recorded on the job, from extraction or a solve.
    pub fn position(&self) -> Option<SkyPosition> {
        Some(SkyPosition::new(self.ra?, self.dec?))
    }

    /// Outcome once the pipeline has finished with the job.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.status {
            JobStatus::Completed => Some(JobOutcome::Completed {
                image_record_id: self.image_record_id.clone(),
                target_id: self.matched_target_id.clone(),
            }),
            JobStatus::NeedsTarget => Some(JobOutcome::NeedsTarget {
                name_hint: self.target_name_hint.clone(),
                ra: self.ra,
                dec: self.dec,
            }),
            JobStatus::Failed => Some(JobOutcome::Failed {
                error: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
            _ => None,
        }
    }

    /// Clear everything a pipeline run writes, keeping identity and file
    /// reference.
    pub(crate) fn reset_results(&mut self) {
        let extracted = ExtractedFields::default();
        self.apply_extraction(extracted);
        self.calibration = None;
        self.matched_target_id = None;
        self.match_method = None;
        self.image_record_id = None;
        self.error_message = None;
        self.error_details = None;
        self.completed_at = None;
    }

    pub(crate) fn apply_extraction(&mut self, fields: ExtractedFields) {
        self.target_name_hint = fields.target_name_hint;
        self.ra = fields.ra;
        self.dec = fields.dec;
        self.exposure_time = fields.exposure_time;
        self.total_integration_time = fields.total_integration_time;
        self.filter_name = fields.filter_name;
        self.capture_date = fields.capture_date;
        self.metadata = fields.metadata;
    }
}

/// Request to create a processing job for an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub user_id: String,
    pub storage_key: String,
    pub original_filename: String,
}

impl CreateJobRequest {
    pub fn new(
        user_id: impl Into<String>,
        storage_key: impl Into<String>,
        original_filename: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            storage_key: storage_key.into(),
            original_filename: original_filename.into(),
        }
    }
}

/// Filter for querying jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub user_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            user_id: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic_along_pipeline() {
        let path = [
            JobStatus::Pending,
            JobStatus::Converting,
            JobStatus::Extracting,
            JobStatus::PlateSolving,
            JobStatus::Matching,
            JobStatus::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].progress_percent() < pair[1].progress_percent());
        }
        assert_eq!(JobStatus::NeedsTarget.progress_percent(), 100);
    }

    #[test]
    fn test_advance_rules() {
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Extracting));
        assert!(JobStatus::Converting.can_advance_to(JobStatus::Converting));
        assert!(!JobStatus::Matching.can_advance_to(JobStatus::Extracting));
        assert!(!JobStatus::Pending.can_advance_to(JobStatus::Completed));
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::Converting));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(JobStatus::parse("plate_solving"), Some(JobStatus::PlateSolving));
        assert_eq!(JobStatus::parse("NEEDS_TARGET"), Some(JobStatus::NeedsTarget));
        assert_eq!(JobStatus::parse("done"), None);
        assert_eq!(
            serde_json::to_string(&JobStatus::NeedsTarget).unwrap(),
            "\"NEEDS_TARGET\""
        );
    }

    #[test]
    fn test_failure_details() {
        let failure = JobFailure::new(
            ErrorKind::SolveTimeout,
            JobStatus::PlateSolving,
            "gave up after 3 attempts",
        )
        .with_field("attempts", 3);

        let details = failure.details();
        assert_eq!(details["kind"], "solve_timeout");
        assert_eq!(details["stage"], "PLATE_SOLVING");
        assert_eq!(details["attempts"], 3);
    }

    #[test]
    fn test_extracted_fields_from_metadata() {
        let meta = ImageMetadata {
            target_name: Some("  M31 ".into()),
            ra_text: Some("00:42:44.3".into()),
            dec_text: Some("+41:16:09".into()),
            exposure_time: Some(120.0),
            filter: Some("L".into()),
            ..Default::default()
        };
        let fields = ExtractedFields::from(&meta);
        assert_eq!(fields.target_name_hint.as_deref(), Some("M31"));
        assert!((fields.ra.unwrap() - 10.684583).abs() < 1e-5);
        assert!((fields.dec.unwrap() - 41.269167).abs() < 1e-5);
        assert_eq!(fields.filter_name.as_deref(), Some("L"));
        assert!(fields.metadata.is_some());
    }
}
