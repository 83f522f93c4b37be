//! Table and JSON output formatting for CLI commands.

use serde::Serialize;
use tabled::{Table, Tabled};

use incidenthub_entity::job::Job;

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
}

/// One job, flattened for table output
#[derive(Debug, Serialize, Tabled)]
pub struct JobRow {
    /// Job ID
    #[tabled(rename = "ID")]
    pub id: String,
    /// Handler name
    #[tabled(rename = "Name")]
    pub name: String,
    /// Queue label
    #[tabled(rename = "Queue")]
    pub queue: String,
    /// Status
    #[tabled(rename = "Status")]
    pub status: String,
    /// Creation time
    #[tabled(rename = "Created")]
    pub created_at: String,
    /// Failure text, truncated
    #[tabled(rename = "Exception")]
    pub exception: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            name: job.name.clone(),
            queue: job.queue.clone(),
            status: job.status.to_string(),
            created_at: job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            exception: job
                .exception
                .as_deref()
                .map(|e| truncate(e, 60))
                .unwrap_or_default(),
        }
    }
}

/// Print a list of items in the selected format
pub fn print_list<T: Serialize + Tabled>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No results found.");
            } else {
                let table = Table::new(items).to_string();
                println!("{}", table);
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string());
            println!("{}", json);
        }
    }
}

/// Print a single job in the selected format
pub fn print_job(job: &Job, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            print_kv("ID", &job.id.to_string());
            print_kv("Name", &job.name);
            print_kv("Queue", &job.queue);
            print_kv("Status", job.status.as_str());
            print_kv("Payload", &job.payload.to_string());
            if let Some(result) = &job.result {
                print_kv("Result", &result.to_string());
            }
            if let Some(exception) = &job.exception {
                print_kv("Exception", exception);
            }
            print_kv("Retryable", &job.is_retryable.to_string());
            print_kv("Created", &job.created_at.to_rfc3339());
            print_kv("Updated", &job.updated_at.to_rfc3339());
            for (label, at) in [
                ("Processing", job.processing_at),
                ("Processed", job.processed_at),
                ("Errored", job.errored_at),
            ] {
                if let Some(at) = at {
                    print_kv(label, &at.to_rfc3339());
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(job).unwrap_or_else(|_| "{}".to_string());
            println!("{}", json);
        }
    }
}

/// Print a serializable value as JSON
pub fn print_json<T: Serialize>(item: &T) {
    let json = serde_json::to_string_pretty(item).unwrap_or_else(|_| "{}".to_string());
    println!("{}", json);
}

/// Print a success message
pub fn print_success(msg: &str) {
    println!("✓ {}", msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("⚠ {}", msg);
}

/// Print an error message
pub fn print_error(msg: &str) {
    eprintln!("✗ {}", msg);
}

/// Print a key-value pair
pub fn print_kv(key: &str, value: &str) {
    println!("  {:<24} {}", format!("{}:", key), value);
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{head}…")
}
