use std::sync::Arc;

use skyingest_core::{
    CatalogStore, Config, JobStore, PipelineWorker, PlateSolver, SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    jobs: Arc<dyn JobStore>,
    catalog: Arc<dyn CatalogStore>,
    solver: Arc<dyn PlateSolver>,
    worker: Arc<PipelineWorker>,
}

impl AppState {
    pub fn new(
        config: Config,
        jobs: Arc<dyn JobStore>,
        catalog: Arc<dyn CatalogStore>,
        solver: Arc<dyn PlateSolver>,
        worker: Arc<PipelineWorker>,
    ) -> Self {
        Self {
            config,
            jobs,
            catalog,
            solver,
            worker,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn job_store(&self) -> &dyn JobStore {
        self.jobs.as_ref()
    }

    pub fn catalog(&self) -> &dyn CatalogStore {
        self.catalog.as_ref()
    }

    pub fn solver(&self) -> &dyn PlateSolver {
        self.solver.as_ref()
    }

    pub fn worker(&self) -> &PipelineWorker {
        self.worker.as_ref()
    }
}
