//! Download worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vget_cookies::{CookieConfig, CookieStore, EncryptionKey};
use vget_extractor::YtDlp;
use vget_jobstore::{JobStore, MemoryJobStore, RedisJobStore};
use vget_queue::{ProgressBus, QueueBackendConfig};
use vget_storage::StorageConfig;
use vget_worker::{JobExecutor, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS to Redis/S3)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("vget=info".parse().unwrap()))
        .init();

    info!("starting vget-worker");

    let config = WorkerConfig::from_env();
    info!("worker config: {:?}", config);

    let storage = match StorageConfig::from_env() {
        Ok(cfg) => match cfg.connect().await {
            Ok(storage) => storage,
            Err(e) => {
                error!("failed to connect storage: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!("bad storage configuration: {}", e);
            std::process::exit(1);
        }
    };

    let queue_config = match QueueBackendConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("bad queue configuration: {}", e);
            std::process::exit(1);
        }
    };

    // The job store rides the same backend class as the queue: a brokered
    // deployment shares rows through Redis, a memory deployment is
    // single-process by definition.
    let store: Arc<dyn JobStore> = match &queue_config {
        QueueBackendConfig::Broker(_) => match RedisJobStore::from_env() {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("failed to connect job store: {}", e);
                std::process::exit(1);
            }
        },
        QueueBackendConfig::Memory => Arc::new(MemoryJobStore::new()),
    };

    let queue = match queue_config.connect().await {
        Ok(queue) => queue,
        Err(e) => {
            error!("failed to connect queue: {}", e);
            std::process::exit(1);
        }
    };

    let cookies = match EncryptionKey::from_env() {
        Ok(key) => {
            match CookieStore::new(Arc::clone(&storage), key, CookieConfig::from_env()) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    error!("failed to build cookie store: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(_) => {
            warn!("CREDENTIAL_ENCRYPTION_KEY not set; credentialed jobs will fail");
            None
        }
    };

    let extractor = Arc::new(
        YtDlp::new()
            .with_timeout(config.job_timeout)
            .with_heartbeat(config.progress_heartbeat),
    );

    let ctx = Arc::new(WorkerContext::new(
        store,
        queue,
        storage,
        cookies,
        Arc::new(ProgressBus::new()),
        extractor,
        config,
    ));

    let executor = Arc::new(JobExecutor::new(ctx));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("executor error: {}", e);
        std::process::exit(1);
    }

    info!("worker shutdown complete");
}
