use anyhow::Result;
use clap::Parser;
use redis::aio::MultiplexedConnection;
use sintegra_scraper::api::dispatcher::Dispatcher;
use sintegra_scraper::api::handlers::router;
use sintegra_scraper::bootstrap::connect_redis;
use sintegra_scraper::config::{ApiConfig, Cli, Command, SharedConfig, WorkerConfig};
use sintegra_scraper::error::QueueError;
use sintegra_scraper::executor::executor::TaskExecutor;
use sintegra_scraper::executor::queue::{MemoryWorkQueue, RedisWorkQueue, WorkQueue};
use sintegra_scraper::extractor::client::SintegraClient;
use sintegra_scraper::storage::memory::MemoryTaskStore;
use sintegra_scraper::storage::redis::RedisTaskStore;
use sintegra_scraper::storage::TaskStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Consumer name of the API's queue handle; it only publishes.
const API_CONSUMER: &str = "api";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let shared = cli.shared;

    // 1. Shutdown signal:
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        let _ = shutdown_tx.send(true);
    });

    // 2. Roles:
    match cli.command {
        Command::Api(api) => {
            let conn = connect_redis(&shared.redis_url, shared.connect_policy()).await?;
            let store = redis_store(&shared, conn.clone());
            let queue = Arc::new(RedisWorkQueue::new(conn, &shared.queue_name, API_CONSUMER));
            serve_api(&api, store, queue, shutdown_rx).await?;
        }
        Command::Worker(worker) => {
            let conn = connect_redis(&shared.redis_url, shared.connect_policy()).await?;
            let store = redis_store(&shared, conn.clone());
            let queue = redis_worker_queue(&shared, &worker, conn);
            let handle = spawn_worker(&worker, store, queue, shutdown_rx)?;
            handle.await??;
        }
        Command::All {
            api,
            worker,
            in_memory,
        } => {
            let (store, api_queue, worker_queue) = if in_memory {
                tracing::warn!("Running on in-memory store and queue; nothing survives a restart");
                let memory_store = Arc::new(MemoryTaskStore::with_ttl(shared.task_ttl()));
                spawn_purger(memory_store.clone(), shared.task_ttl(), shutdown_rx.clone());
                let store: Arc<dyn TaskStore> = memory_store;
                let queue = Arc::new(MemoryWorkQueue::new().with_lease(worker.lease()));
                let api_queue: Arc<dyn WorkQueue> = queue.clone();
                let worker_queue: Arc<dyn WorkQueue> = queue;
                (store, api_queue, worker_queue)
            } else {
                let conn = connect_redis(&shared.redis_url, shared.connect_policy()).await?;
                let api_queue: Arc<dyn WorkQueue> = Arc::new(RedisWorkQueue::new(
                    conn.clone(),
                    &shared.queue_name,
                    API_CONSUMER,
                ));
                let worker_queue = redis_worker_queue(&shared, &worker, conn.clone());
                (redis_store(&shared, conn), api_queue, worker_queue)
            };

            let handle = spawn_worker(&worker, store.clone(), worker_queue, shutdown_rx.clone())?;
            serve_api(&api, store, api_queue, shutdown_rx).await?;
            handle.await??;
        }
    }

    tracing::info!("Bye");
    Ok(())
}

fn redis_store(shared: &SharedConfig, conn: MultiplexedConnection) -> Arc<dyn TaskStore> {
    Arc::new(RedisTaskStore::new(conn).with_ttl(shared.task_ttl()))
}

fn redis_worker_queue(
    shared: &SharedConfig,
    worker: &WorkerConfig,
    conn: MultiplexedConnection,
) -> Arc<dyn WorkQueue> {
    Arc::new(
        RedisWorkQueue::new(conn, &shared.queue_name, worker.consumer_name())
            .with_lease(worker.lease()),
    )
}

async fn serve_api(
    api: &ApiConfig,
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::new(store, queue));
    let app = router(dispatcher);

    tracing::info!("HTTP server listening on {}", api.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(api.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}

fn spawn_worker(
    worker: &WorkerConfig,
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn WorkQueue>,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<Result<(), QueueError>>> {
    let extractor = Arc::new(SintegraClient::new(
        &worker.registry_url,
        worker.request_timeout(),
    )?);

    tracing::info!("Starting worker (registry {})", worker.registry_url);

    let executor = TaskExecutor::new(queue, store, extractor, worker.poll_interval());
    Ok(executor.start(shutdown))
}

/// Expired in-memory records are otherwise only dropped when read.
fn spawn_purger(store: Arc<MemoryTaskStore>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    store.purge_expired();
                    tracing::debug!("{} live task records", store.len());
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
    });
}
