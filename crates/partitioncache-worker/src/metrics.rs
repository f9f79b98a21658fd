//! Prometheus metrics for worker observability.

use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for OutcomeLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("outcome", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct WorkerMetrics {
    pub fragment_queue_depth: Gauge,
    pub original_queue_depth: Gauge,
    pub fragments_evaluated: Family<OutcomeLabel, Counter>,
    pub lock_contention_total: Counter,
    pub fragment_retries_total: Counter,
    pub fragments_dropped_total: Counter,
    pub lock_reaper_reclaimed_total: Counter,
    registry: Arc<Registry>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let fragment_queue_depth = Gauge::default();
        registry.register(
            "partitioncache_fragment_queue_depth",
            "Number of fragment tasks pending evaluation",
            fragment_queue_depth.clone(),
        );

        let original_queue_depth = Gauge::default();
        registry.register(
            "partitioncache_original_queue_depth",
            "Number of original queries pending decomposition",
            original_queue_depth.clone(),
        );

        let fragments_evaluated = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "partitioncache_fragments_evaluated_total",
            "Fragment evaluations by outcome",
            fragments_evaluated.clone(),
        );

        let lock_contention_total = Counter::default();
        registry.register(
            "partitioncache_lock_contention_total",
            "Times a worker lost the fragment lock race",
            lock_contention_total.clone(),
        );

        let fragment_retries_total = Counter::default();
        registry.register(
            "partitioncache_fragment_retries_total",
            "Fragment tasks re-enqueued after contention or failure",
            fragment_retries_total.clone(),
        );

        let fragments_dropped_total = Counter::default();
        registry.register(
            "partitioncache_fragments_dropped_total",
            "Fragment tasks dropped after exceeding max_retries",
            fragments_dropped_total.clone(),
        );

        let lock_reaper_reclaimed_total = Counter::default();
        registry.register(
            "partitioncache_lock_reaper_reclaimed_total",
            "Stale fragment locks reclaimed by the reaper",
            lock_reaper_reclaimed_total.clone(),
        );

        Self {
            fragment_queue_depth,
            original_queue_depth,
            fragments_evaluated,
            lock_contention_total,
            fragment_retries_total,
            fragments_dropped_total,
            lock_reaper_reclaimed_total,
            registry: Arc::new(registry),
        }
    }

    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }

    /// Fold a [`partition_queue::StepOutcome`] into the relevant counters.
    pub fn observe(&self, outcome: &partition_queue::StepOutcome) {
        use partition_queue::StepOutcome::*;
        match outcome {
            Idle => {}
            AlreadyCached => {
                self.fragments_evaluated
                    .get_or_create(&OutcomeLabel("already_cached".to_string()))
                    .inc();
            }
            LockContention { dropped } => {
                self.lock_contention_total.inc();
                if *dropped {
                    self.fragments_dropped_total.inc();
                } else {
                    self.fragment_retries_total.inc();
                }
            }
            Evaluated { .. } => {
                self.fragments_evaluated
                    .get_or_create(&OutcomeLabel("evaluated".to_string()))
                    .inc();
            }
            EvaluatedNull { .. } => {
                self.fragments_evaluated
                    .get_or_create(&OutcomeLabel("evaluated_null".to_string()))
                    .inc();
            }
            Failed { dropped, .. } => {
                if *dropped {
                    self.fragments_dropped_total.inc();
                } else {
                    self.fragment_retries_total.inc();
                }
            }
        }
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_all_metrics() {
        let metrics = WorkerMetrics::new();
        let output = metrics.encode();
        assert!(output.contains("partitioncache_fragment_queue_depth"));
        assert!(output.contains("partitioncache_fragments_evaluated_total"));
        assert!(output.contains("partitioncache_lock_contention_total"));
    }

    #[test]
    fn observe_evaluated_increments_family_counter() {
        let metrics = WorkerMetrics::new();
        metrics.observe(&partition_queue::StepOutcome::Evaluated {
            hash: "h1".to_string(),
            rows: 3,
        });
        let output = metrics.encode();
        assert!(output.contains("outcome=\"evaluated\""));
    }

    #[test]
    fn observe_dropped_lock_contention_increments_both_counters() {
        let metrics = WorkerMetrics::new();
        metrics.observe(&partition_queue::StepOutcome::LockContention { dropped: true });
        let output = metrics.encode();
        assert!(output.contains("partitioncache_lock_contention_total_total 1"));
        assert!(output.contains("partitioncache_fragments_dropped_total_total 1"));
    }
}
