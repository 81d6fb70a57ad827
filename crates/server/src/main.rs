use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skyingest_core::{
    create_object_storage, create_plate_solver, load_config, validate_config, CatalogStore,
    ExternalToolConverter, FitsMetadataExtractor, JobStore, LogFormat, PipelineWorker,
    SanitizedConfig, SqliteCatalogStore, SqliteJobStore, SqliteWorkQueue, WorkQueue,
    WorkerServices,
};
use skyingest_server::{create_router, AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be initialized yet
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            "skyingest=info,skyingest_core=info,skyingest_server=info,tower_http=info".into()
        });
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("SKYINGEST_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Logging depends on the config, so load it first
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(config.server.log_format);
    info!("Loaded configuration from {:?}", config_path);

    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    let config_json = serde_json::to_string(&sanitized).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        solver = %sanitized.solver.backend,
        database = ?config.database.path,
        "Configuration validated"
    );

    // Stores share one SQLite file
    let db_path = &config.database.path;
    let jobs: Arc<dyn JobStore> =
        Arc::new(SqliteJobStore::new(db_path).context("Failed to open job store")?);
    let catalog: Arc<dyn CatalogStore> =
        Arc::new(SqliteCatalogStore::new(db_path).context("Failed to open catalog store")?);
    let queue: Arc<dyn WorkQueue> = Arc::new(
        SqliteWorkQueue::new(db_path, config.worker.lease_timeout())
            .context("Failed to open work queue")?,
    );
    info!("Stores initialized");

    let storage =
        create_object_storage(&config.storage).context("Failed to create object storage")?;
    let solver = create_plate_solver(&config.solver).context("Failed to create plate solver")?;
    info!(solver = solver.name(), "Plate solver ready");

    let services = WorkerServices {
        jobs: Arc::clone(&jobs),
        catalog: Arc::clone(&catalog),
        queue,
        storage,
        converter: Arc::new(ExternalToolConverter::new(config.converter.clone())),
        extractor: Arc::new(FitsMetadataExtractor::new()),
        solver: Arc::clone(&solver),
    };
    let worker = Arc::new(PipelineWorker::new(
        config.worker.clone(),
        config.matcher.clone(),
        services,
    ));

    if config.worker.enabled {
        worker.start().await;
    } else {
        info!("Pipeline worker disabled in config");
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        jobs,
        catalog,
        solver,
        Arc::clone(&worker),
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    if worker.is_running() {
        worker.stop().await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
