//! IncidentHub background worker daemon.
//!
//! Wires configuration, logging, the database, and the job registry
//! together, then runs the scheduler until Ctrl+C or SIGTERM.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use incidenthub_core::config::AppConfig;
use incidenthub_core::error::AppError;
use incidenthub_database::DatabasePool;
use incidenthub_database::store::JobStore;
use incidenthub_worker::{BackgroundJobScheduler, JobRegistry, jobs, signal};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Worker error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_path =
        std::env::var("INCIDENTHUB_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

    let env = std::env::var("INCIDENTHUB_ENV").unwrap_or_else(|_| "development".to_string());

    AppConfig::load(&config_path, &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main worker run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting IncidentHub worker v{}", env!("CARGO_PKG_VERSION"));

    if !config.worker.enabled {
        tracing::warn!("Background worker disabled by configuration; exiting");
        return Ok(());
    }

    // ── Step 1: Database connection + migrations ─────────────────
    let db_pool = DatabasePool::connect(&config.database).await?;

    if config.database.auto_migrate {
        db_pool.migrate().await?;
    }

    // ── Step 2: Job handlers ─────────────────────────────────────
    let mut registry = JobRegistry::new();
    jobs::register_builtin(&mut registry);
    tracing::info!(handlers = ?registry.registered_names(), "Job handlers registered");

    // ── Step 3: Scheduler ────────────────────────────────────────
    let store: Arc<dyn JobStore> = Arc::new(db_pool.job_repository());
    let scheduler = BackgroundJobScheduler::new(store, Arc::new(registry), config.worker);

    scheduler.run(signal::shutdown_channel()).await;

    // ── Step 4: Cleanup ──────────────────────────────────────────
    db_pool.close().await;
    tracing::info!("IncidentHub worker shut down");
    Ok(())
}
