//! Worker configuration from environment variables.

use anyhow::{bail, Context, Result};
use partition_registry::PartitionDatatype;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackendKind {
    Postgres,
    Nats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Redis,
    SqlTable,
    InMemory,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub queue_backend: QueueBackendKind,
    pub cache_backend: CacheBackendKind,

    /// Database the queue tables live in (Postgres queue backend only).
    pub queue_database_url: Option<String>,
    pub nats_url: Option<String>,
    pub redis_url: Option<String>,

    /// Authoritative source database that fragment SQL is executed
    /// against. Falls back to `queue_database_url` when unset, since a
    /// single-node deployment typically shares one Postgres instance.
    pub source_database_url: String,

    pub partition_key: String,
    pub partition_datatype: PartitionDatatype,
    pub partition_bitsize: Option<u32>,

    pub metrics_port: u16,
    pub worker_pool_size: usize,
    pub fragment_deadline_secs: u64,
    pub max_retries: u32,
    pub lock_reap_interval_secs: u64,
    pub lock_ttl_secs: i64,
    pub decomposition_workers: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let queue_backend = match env_or("QUEUE_BACKEND", "postgres").as_str() {
            "postgres" | "pg" => QueueBackendKind::Postgres,
            "nats" => QueueBackendKind::Nats,
            other => bail!("unknown QUEUE_BACKEND '{other}', expected postgres or nats"),
        };
        let cache_backend = match env_or("CACHE_BACKEND", "redis").as_str() {
            "redis" => CacheBackendKind::Redis,
            "sql_table" | "sql" => CacheBackendKind::SqlTable,
            "in_memory" | "memory" => CacheBackendKind::InMemory,
            other => bail!("unknown CACHE_BACKEND '{other}', expected redis, sql_table or in_memory"),
        };

        let queue_database_url = std::env::var("QUEUE_DATABASE_URL").ok();
        let source_database_url = std::env::var("SOURCE_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .context("SOURCE_DATABASE_URL or DATABASE_URL is required")?;

        if queue_backend == QueueBackendKind::Postgres && queue_database_url.is_none() {
            bail!("QUEUE_DATABASE_URL is required when QUEUE_BACKEND=postgres (falls back to DATABASE_URL if also unset)");
        }

        let partition_datatype = PartitionDatatype::parse(&env_or("PARTITION_DATATYPE", "integer"))
            .context("invalid PARTITION_DATATYPE")?;

        Ok(Self {
            worker_id: std::env::var("WORKER_ID")
                .unwrap_or_else(|_| Uuid::new_v4().to_string()),
            queue_backend,
            cache_backend,
            queue_database_url: queue_database_url.or_else(|| std::env::var("DATABASE_URL").ok()),
            nats_url: std::env::var("NATS_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            source_database_url,
            partition_key: env_or("PARTITION_KEY", "partition_key"),
            partition_datatype,
            partition_bitsize: std::env::var("PARTITION_BITSIZE").ok().and_then(|v| v.parse().ok()),
            metrics_port: parse_env("METRICS_PORT", 9091u16)?,
            worker_pool_size: parse_env("WORKER_POOL_SIZE", 4usize)?,
            fragment_deadline_secs: parse_env("FRAGMENT_DEADLINE_SECS", 30u64)?,
            max_retries: parse_env("MAX_RETRIES", 5u32)?,
            lock_reap_interval_secs: parse_env("LOCK_REAP_INTERVAL_SECS", 60u64)?,
            lock_ttl_secs: parse_env("LOCK_TTL_SECS", 300i64)?,
            decomposition_workers: parse_env("DECOMPOSITION_WORKERS", 1usize)?,
        })
    }
}
