pub mod catalog;
pub mod config;
pub mod converter;
pub mod coordinates;
pub mod extractor;
pub mod fits;
pub mod job;
pub mod matcher;
pub mod metrics;
pub mod queue;
pub mod solver;
pub mod storage;
pub mod testing;
pub mod worker;

pub use catalog::{CatalogError, CatalogStore, SqliteCatalogStore, Target};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, LogFormat,
    SanitizedConfig,
};
pub use converter::{ExternalToolConverter, FormatConverter, ImageFormat};
pub use coordinates::SkyPosition;
pub use extractor::{FitsMetadataExtractor, ImageMetadata, MetadataExtractor};
pub use job::{
    CreateJobRequest, JobError, JobFilter, JobOutcome, JobStatus, JobStore, ProcessingJob,
    SqliteJobStore,
};
pub use matcher::{MatchMethod, TargetMatcher};
pub use queue::{SqliteWorkQueue, WorkQueue};
pub use solver::{create_plate_solver, PlateSolver, SolverError};
pub use storage::{create_object_storage, ObjectStorage, StorageError};
pub use worker::{JobProgress, PipelineWorker, WorkerConfig, WorkerError, WorkerServices, WorkerStatus};
