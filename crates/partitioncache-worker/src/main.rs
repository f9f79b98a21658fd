//! partitioncache-worker — standalone daemon that decomposes queued
//! original queries into fragments and evaluates pending fragments against
//! the source database, writing results into a cache backend.

mod config;
mod health;
mod metrics;
mod reaper;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{watch, RwLock};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use partition_cache::backends::{InMemorySetBackend, RedisSetBackend, SqlTableBackend};
use partition_cache::{CacheBackend, CacheRegistryStore, ElementType};
use partition_queue::{
    DecompositionWorker, NatsQueueBackend, PgQueueBackend, Queue, SqlxFragmentExecutor, Worker,
};
use partition_registry::{PartitionMeta, PartitionRegistry, RegistryPersistence};

use config::{CacheBackendKind, QueueBackendKind, WorkerConfig};
use health::HealthState;
use metrics::WorkerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = WorkerConfig::from_env()?;
    info!(worker_id = %config.worker_id, "starting partitioncache-worker");

    let element_type = match config.partition_datatype {
        partition_registry::PartitionDatatype::Integer
        | partition_registry::PartitionDatatype::Timestamp => ElementType::Int,
        partition_registry::PartitionDatatype::Float | partition_registry::PartitionDatatype::Text => {
            ElementType::Text
        }
    };

    let cache: Arc<dyn CacheBackend> = match config.cache_backend {
        CacheBackendKind::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("REDIS_URL is required when CACHE_BACKEND=redis"))?;
            Arc::new(RedisSetBackend::connect(url, element_type).await?)
        }
        CacheBackendKind::SqlTable => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.source_database_url)
                .await?;
            let table = format!("{}_cache", config.partition_key);
            Arc::new(SqlTableBackend::connect(pool, &table, element_type).await?)
        }
        CacheBackendKind::InMemory => Arc::new(InMemorySetBackend::new()),
    };
    info!(backend = ?config.cache_backend, "cache backend ready");

    let registry = Arc::new(RwLock::new(PartitionRegistry::new()));
    {
        let store = CacheRegistryStore::new(cache.as_ref());
        let persisted = store.load_all().await?;
        let mut registry = registry.write().await;
        for (name, meta) in persisted {
            registry.upsert(&name, meta);
        }
        if registry.get(&config.partition_key).is_none() {
            let mut meta = PartitionMeta::new(config.partition_datatype);
            if let Some(bitsize) = config.partition_bitsize {
                meta = meta.with_bitsize(bitsize);
            }
            registry.upsert(&config.partition_key, meta.clone());
            store.save(&config.partition_key, &meta).await?;
        }
    }

    let mut pg_queue_backend: Option<Arc<PgQueueBackend>> = None;
    let queue: Arc<dyn Queue> = match config.queue_backend {
        QueueBackendKind::Postgres => {
            let url = config
                .queue_database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("QUEUE_DATABASE_URL is required when QUEUE_BACKEND=postgres"))?;
            let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let backend = Arc::new(PgQueueBackend::connect(pool).await?);
            pg_queue_backend = Some(backend.clone());
            backend
        }
        QueueBackendKind::Nats => {
            let url = config
                .nats_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("NATS_URL is required when QUEUE_BACKEND=nats"))?;
            Arc::new(NatsQueueBackend::connect(url).await?)
        }
    };
    info!(backend = ?config.queue_backend, "queue backend ready");

    let executor_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.source_database_url)
        .await?;
    let executor = Arc::new(SqlxFragmentExecutor::new(executor_pool));

    let worker_metrics = WorkerMetrics::new();
    let ready = Arc::new(AtomicBool::new(true));
    let health_state = Arc::new(HealthState {
        metrics: worker_metrics.clone(),
        ready: ready.clone(),
    });
    let metrics_port = config.metrics_port;
    let health_router = health::health_router(health_state);
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{metrics_port}");
        info!(%addr, "health/metrics server listening");
        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, health_router).await.unwrap();
    });

    if let Some(pg_backend) = pg_queue_backend {
        reaper::spawn_lock_reaper(
            pg_backend,
            worker_metrics.clone(),
            config.lock_reap_interval_secs,
            config.lock_ttl_secs,
        );
        info!(interval_secs = config.lock_reap_interval_secs, "lock reaper started");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(true);

    let mut handles = Vec::new();
    for i in 0..config.decomposition_workers {
        let decomposer = DecompositionWorker::new(
            queue.clone(),
            cache.clone(),
            partition_core::QueryProcessorOptions::default(),
        );
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            info!(decomposer = i, "decomposition worker started");
            decomposer.run(rx).await;
        }));
    }

    for i in 0..config.worker_pool_size {
        let worker = Worker::new(
            queue.clone(),
            cache.clone(),
            executor.clone(),
            registry.clone(),
            Duration::from_secs(config.fragment_deadline_secs),
            config.max_retries,
        );
        let metrics = worker_metrics.clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            info!(worker = i, "fragment worker started");
            run_worker_with_metrics(worker, metrics, rx).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight work");
    ready.store(false, std::sync::atomic::Ordering::Relaxed);
    let _ = shutdown_tx.send(false);

    for handle in handles {
        let _ = handle.await;
    }
    queue.close().await.ok();
    cache.close().await.ok();

    Ok(())
}

/// Runs a [`Worker`] loop manually (instead of [`Worker::run`]) so each
/// step's outcome can be folded into Prometheus metrics before the next
/// iteration — the metrics types live in this binary, not the library
/// crate, so [`Worker::run`] alone can't drive them.
async fn run_worker_with_metrics(worker: Worker, metrics: WorkerMetrics, mut shutdown: watch::Receiver<bool>) {
    while *shutdown.borrow() {
        match worker.run_once().await {
            Ok(outcome) => {
                let is_idle = matches!(outcome, partition_queue::StepOutcome::Idle);
                metrics.observe(&outcome);
                if is_idle {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "worker step errored"),
        }
    }
}
