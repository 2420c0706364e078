//! Command-line and environment configuration.

use crate::bootstrap::RetryPolicy;
use crate::executor::queue::DEFAULT_CONSUMER_LEASE;
use crate::extractor::client::{DEFAULT_REGISTRY_URL, DEFAULT_REQUEST_TIMEOUT};

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "sintegra-scraper", version, about = "Asynchronous Sintegra registry lookups")]
pub struct Cli {
    #[command(flatten)]
    pub shared: SharedConfig,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings used by every role.
#[derive(Debug, Clone, Args)]
pub struct SharedConfig {
    /// Redis URL holding both the task store and the work queue.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379", global = true)]
    pub redis_url: String,

    /// Name of the work queue.
    #[arg(long, env = "QUEUE_NAME", default_value = "scrape_tasks", global = true)]
    pub queue_name: String,

    /// Lifetime of a task record, in seconds.
    #[arg(long, env = "TASK_TTL_SECS", default_value_t = 3600, global = true)]
    pub task_ttl_secs: u64,

    /// Connection attempts at startup before giving up.
    #[arg(long, env = "CONNECT_ATTEMPTS", default_value_t = 10, global = true)]
    pub connect_attempts: usize,

    /// Delay between connection attempts, in milliseconds.
    #[arg(long, env = "CONNECT_DELAY_MS", default_value_t = 3000, global = true)]
    pub connect_delay_ms: u64,
}

impl SharedConfig {
    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }

    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.connect_attempts,
            Duration::from_millis(self.connect_delay_ms),
        )
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API (dispatcher).
    Api(ApiConfig),
    /// Run one worker consuming the queue.
    Worker(WorkerConfig),
    /// Run the API and one worker in the same process.
    All {
        #[command(flatten)]
        api: ApiConfig,
        #[command(flatten)]
        worker: WorkerConfig,
        /// Keep tasks and the queue in process memory instead of Redis.
        #[arg(long)]
        in_memory: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ApiConfig {
    /// Address the HTTP server binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerConfig {
    /// Consumer name. Defaults to `$HOSTNAME-<random>`; an explicit name is
    /// refused while another live worker holds it.
    #[arg(long = "name", env = "WORKER_NAME")]
    pub name: Option<String>,

    /// Seconds without a heartbeat after which this worker's messages are recovered.
    #[arg(long, env = "CONSUMER_LEASE_SECS", default_value_t = DEFAULT_CONSUMER_LEASE.as_secs())]
    pub lease_secs: u64,

    /// Registry endpoint queried by the extractor.
    #[arg(long, env = "REGISTRY_URL", default_value = DEFAULT_REGISTRY_URL)]
    pub registry_url: String,

    /// Timeout of one registry request, in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout_secs: u64,

    /// Sleep between polls of an empty queue, in milliseconds.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 200)]
    pub poll_interval_ms: u64,
}

impl WorkerConfig {
    /// The configured name, or a fresh unique one.
    pub fn consumer_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", host, &suffix[..8])
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
