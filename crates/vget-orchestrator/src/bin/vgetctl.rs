//! Operator CLI: health, retry, cancel.
//!
//! Exit codes: 0 ok, 2 invalid arguments, 3 not found, 4 wrong state,
//! 5 backend unavailable.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vget_cookies::{CookieConfig, CookieStore, EncryptionKey};
use vget_jobstore::{JobStore, MemoryJobStore, RedisJobStore};
use vget_models::JobId;
use vget_orchestrator::{
    AppConfig, CancelOutcome, HealthReport, Orchestrator, OrchestratorError,
};
use vget_queue::{ProgressBus, Queue, QueueBackendConfig};
use vget_storage::{Storage, StorageConfig};

#[derive(Parser)]
#[command(name = "vgetctl", about = "vget operator commands", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe the job store, storage, queue and credentials
    Health,
    /// Re-queue a failed job
    Retry {
        /// Job id
        id: String,
    },
    /// Cancel a queued or running job
    Cancel {
        /// Job id
        id: String,
    },
}

const EXIT_NOT_FOUND: u8 = 3;
const EXIT_CONFLICT: u8 = 4;
const EXIT_UNAVAILABLE: u8 = 5;

#[tokio::main]
async fn main() -> ExitCode {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let backends = match Backends::from_env().await {
        Ok(backends) => backends,
        Err(message) => {
            eprintln!("error: {}", message);
            return ExitCode::from(EXIT_UNAVAILABLE);
        }
    };

    match cli.command {
        Command::Health => {
            let report = HealthReport::collect(
                &backends.store,
                &backends.storage,
                &backends.queue,
                backends.cookies.as_ref(),
            )
            .await;

            println!(
                "{}",
                serde_json::to_string_pretty(&report).unwrap_or_default()
            );
            if report.healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_UNAVAILABLE)
            }
        }
        Command::Retry { id } => {
            let orchestrator = backends.orchestrator();
            match orchestrator.retry(&JobId::from(id)).await {
                Ok(job) => {
                    println!("requeued {} (attempt {})", job.id, job.attempts);
                    ExitCode::SUCCESS
                }
                Err(e) => report_error(e),
            }
        }
        Command::Cancel { id } => {
            let orchestrator = backends.orchestrator();
            match orchestrator.cancel(&JobId::from(id)).await {
                Ok(CancelOutcome::Cancelled) => {
                    println!("cancelled");
                    ExitCode::SUCCESS
                }
                Ok(CancelOutcome::Accepted) => {
                    println!("cancel accepted; worker will stop at its next checkpoint");
                    ExitCode::SUCCESS
                }
                Err(e) => report_error(e),
            }
        }
    }
}

fn report_error(e: OrchestratorError) -> ExitCode {
    eprintln!("error: {}", e);
    match e {
        OrchestratorError::NotFound(_) => ExitCode::from(EXIT_NOT_FOUND),
        OrchestratorError::Conflict(_) => ExitCode::from(EXIT_CONFLICT),
        OrchestratorError::InvalidInput(_) => ExitCode::from(2),
        OrchestratorError::Unavailable(_) => ExitCode::from(EXIT_UNAVAILABLE),
    }
}

struct Backends {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    queue: Arc<dyn Queue>,
    cookies: Option<Arc<CookieStore>>,
}

impl Backends {
    async fn from_env() -> Result<Self, String> {
        let storage = StorageConfig::from_env()
            .map_err(|e| e.to_string())?
            .connect()
            .await
            .map_err(|e| e.to_string())?;

        let queue_config = QueueBackendConfig::from_env().map_err(|e| e.to_string())?;
        let store: Arc<dyn JobStore> = match &queue_config {
            QueueBackendConfig::Broker(_) => {
                Arc::new(RedisJobStore::from_env().map_err(|e| e.to_string())?)
            }
            QueueBackendConfig::Memory => Arc::new(MemoryJobStore::new()),
        };
        let queue = queue_config.connect().await.map_err(|e| e.to_string())?;

        let cookies = match EncryptionKey::from_env() {
            Ok(key) => Some(Arc::new(
                CookieStore::new(Arc::clone(&storage), key, CookieConfig::from_env())
                    .map_err(|e| e.to_string())?,
            )),
            Err(_) => None,
        };

        Ok(Self {
            store,
            storage,
            queue,
            cookies,
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            Arc::new(ProgressBus::new()),
            AppConfig::from_env(),
        )
    }
}
