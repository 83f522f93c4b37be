//! Worker management CLI commands.

use std::sync::Arc;

use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::output::{self, JobRow, OutputFormat};
use incidenthub_core::config::AppConfig;
use incidenthub_core::error::AppError;
use incidenthub_database::store::JobStore;
use incidenthub_entity::job::JobStatus;
use incidenthub_worker::{BackgroundJobScheduler, JobQueue, JobRegistry, jobs, signal};

/// Arguments for worker commands
#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Worker subcommand
    #[command(subcommand)]
    pub command: WorkerCommand,
}

/// Worker subcommands
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Run the background job scheduler until Ctrl+C / SIGTERM
    Run {
        /// Override the configured concurrency
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Enqueue a job by name
    Enqueue {
        /// Handler name (e.g. "Echo")
        name: String,
        /// Queue label
        #[arg(short, long)]
        queue: Option<String>,
        /// JSON object payload
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },
    /// Show a single job
    Show {
        /// Job ID
        id: Uuid,
    },
    /// List recent jobs
    List {
        /// Only jobs with this status (pending, processing, processed, error)
        #[arg(short, long)]
        status: Option<JobStatus>,
        /// Maximum number of jobs
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show queue status
    Status,
}

/// Execute worker commands
pub async fn execute(
    args: &WorkerArgs,
    mut config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let pool = super::create_db_pool(&config).await?;
    if config.database.auto_migrate {
        pool.migrate().await?;
    }

    let store: Arc<dyn JobStore> = Arc::new(pool.job_repository());
    let queue = JobQueue::new(Arc::clone(&store));

    match &args.command {
        WorkerCommand::Run { concurrency } => {
            if let Some(concurrency) = concurrency {
                config.worker.concurrency = *concurrency;
            }

            let mut registry = JobRegistry::new();
            jobs::register_builtin(&mut registry);

            if !config.worker.enabled {
                output::print_warning(
                    "Background worker disabled by configuration (worker.enabled = false)",
                );
            }

            let scheduler = BackgroundJobScheduler::new(store, Arc::new(registry), config.worker);
            if scheduler.is_enabled() {
                println!(
                    "Scheduler {} running (concurrency {}). Press Ctrl+C to stop.",
                    scheduler.worker_id(),
                    scheduler.concurrency()
                );
            }
            scheduler.run(signal::shutdown_channel()).await;
        }
        WorkerCommand::Enqueue {
            name,
            queue: queue_name,
            payload,
        } => {
            let payload_value: serde_json::Value = serde_json::from_str(payload)
                .map_err(|e| AppError::validation(format!("Invalid JSON payload: {}", e)))?;

            let job = queue
                .enqueue(name, queue_name.as_deref(), Some(payload_value))
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Job '{}' enqueued (id: {})", job.name, job.id))
                }
                OutputFormat::Json => output::print_job(&job, format),
            }
        }
        WorkerCommand::Show { id } => {
            let job = queue.require(*id).await?;
            output::print_job(&job, format);
        }
        WorkerCommand::List { status, limit } => {
            let jobs = queue.list(*status, *limit).await?;
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
            output::print_list(&rows, format);
        }
        WorkerCommand::Status => {
            let stats = queue.stats().await?;
            match format {
                OutputFormat::Table => {
                    println!("Job Queue Status:");
                    output::print_kv("Pending", &stats.pending.to_string());
                    output::print_kv("Processing", &stats.processing.to_string());
                    output::print_kv("Processed", &stats.processed.to_string());
                    output::print_kv("Error", &stats.error.to_string());
                    output::print_kv("Worker Enabled", &config.worker.enabled.to_string());
                    output::print_kv("Concurrency", &config.worker.concurrency.to_string());
                }
                OutputFormat::Json => output::print_json(&stats),
            }
        }
    }

    pool.close().await;
    Ok(())
}
