//! Background task that reclaims fragment locks left behind by a worker
//! that died mid-evaluation. Only meaningful for [`partition_queue::PgQueueBackend`]:
//! the NATS backend's lock bucket already expires entries via JetStream KV's
//! `max_age`.

use std::sync::Arc;
use std::time::Duration;

use partition_queue::PgQueueBackend;
use tracing::warn;

use crate::metrics::WorkerMetrics;

pub fn spawn_lock_reaper(
    backend: Arc<PgQueueBackend>,
    metrics: WorkerMetrics,
    interval_secs: u64,
    ttl_secs: i64,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match backend.reap_stale_locks(ttl_secs).await {
                Ok(reclaimed) => {
                    if reclaimed > 0 {
                        for _ in 0..reclaimed {
                            metrics.lock_reaper_reclaimed_total.inc();
                        }
                    }
                }
                Err(e) => warn!(error = %e, "lock reaper pass failed"),
            }
        }
    });
}
