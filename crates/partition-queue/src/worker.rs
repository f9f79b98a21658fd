//! Consumer-side protocol of spec.md §4.4: a pool of independent workers
//! popping fragment tasks, enforcing single-flight via the queue's
//! fragment lock, executing against the source DB with a deadline, and
//! writing the result back to the cache — plus a decomposition worker
//! that turns original queries into the fragment tasks workers consume.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use fixedbitset::FixedBitSet;
use tokio::sync::{watch, RwLock};

use partition_cache::{CacheBackend, CacheError, CacheValue};
use partition_core::QueryProcessorOptions;
use partition_registry::{PartitionDatatype, PartitionMeta, PartitionRegistry};

use crate::backend::Queue;
use crate::error::QueueError;
use crate::executor::{ExecutedValue, FragmentExecutor};
use crate::model::FragmentTask;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Outcome of a single `Worker::run_once` iteration, informative enough
/// for a caller to drive metrics without the library depending on any
/// particular metrics crate.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The fragment queue was empty.
    Idle,
    /// The popped hash was already present in the cache; discarded
    /// without re-executing it.
    AlreadyCached,
    /// The fragment lock was held by another worker; re-enqueued (or
    /// dropped, if `max_retries` was reached).
    LockContention { dropped: bool },
    /// Executed with rows; wrote an explicit/bitmap set.
    Evaluated { hash: String, rows: usize },
    /// Executed with no rows; wrote a null-marker.
    EvaluatedNull { hash: String },
    /// Execution or cache-write failed; re-enqueued (or dropped, if
    /// `max_retries` was reached).
    Failed { hash: String, dropped: bool },
}

/// A single long-lived worker. Holds no state shared with other workers
/// beyond the queue and cache handles — a pool is just N of these spawned
/// as independent tokio tasks.
pub struct Worker {
    queue: Arc<dyn Queue>,
    cache: Arc<dyn CacheBackend>,
    executor: Arc<dyn FragmentExecutor>,
    registry: Arc<RwLock<PartitionRegistry>>,
    deadline: Duration,
    max_retries: u32,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn Queue>,
        cache: Arc<dyn CacheBackend>,
        executor: Arc<dyn FragmentExecutor>,
        registry: Arc<RwLock<PartitionRegistry>>,
        deadline: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            cache,
            executor,
            registry,
            deadline,
            max_retries,
        }
    }

    /// One iteration of the consumer protocol: pop, short-circuit on an
    /// already-cached hash, acquire the fragment lock, execute with a
    /// deadline, write the result, release the lock.
    pub async fn run_once(&self) -> Result<StepOutcome, QueueError> {
        let task = match self.queue.pop_fragment().await? {
            Some(task) => task,
            None => return Ok(StepOutcome::Idle),
        };

        if self.cache.exists(&task.hash).await? {
            return Ok(StepOutcome::AlreadyCached);
        }

        if !self.queue.try_acquire_lock(&task.partition, &task.hash).await? {
            let dropped = self.retire_or_requeue(task).await?;
            return Ok(StepOutcome::LockContention { dropped });
        }

        let outcome = self.evaluate(&task).await;
        self.queue.release_lock(&task.partition, &task.hash).await?;
        outcome
    }

    async fn evaluate(&self, task: &FragmentTask) -> Result<StepOutcome, QueueError> {
        let rows = match self.executor.execute(&task.fragment_sql, self.deadline).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(hash = %task.hash, error = %e, "fragment evaluation failed");
                let dropped = self.retire_or_requeue(task.clone()).await?;
                return Ok(StepOutcome::Failed {
                    hash: task.hash.clone(),
                    dropped,
                });
            }
        };

        if rows.is_empty() {
            self.cache.set_null(&task.hash).await?;
            return Ok(StepOutcome::EvaluatedNull {
                hash: task.hash.clone(),
            });
        }

        let meta = {
            let registry = self.registry.read().await;
            registry.get(&task.partition).cloned()
        };
        let meta = match meta {
            Some(meta) => meta,
            None => {
                tracing::error!(
                    partition = %task.partition,
                    "fragment task for an unregistered partition; dropping without retry"
                );
                return Ok(StepOutcome::Failed {
                    hash: task.hash.clone(),
                    dropped: true,
                });
            }
        };

        let value = match to_cache_value(rows, &task.partition, &meta) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(hash = %task.hash, error = %e, "cache write rejected, key left absent");
                return Ok(StepOutcome::Failed {
                    hash: task.hash.clone(),
                    dropped: true,
                });
            }
        };

        let rows_count = match &value {
            CacheValue::IntSet(s) => s.len(),
            CacheValue::TextSet(s) => s.len(),
            CacheValue::Bitmap { bits, .. } => bits.count_ones(..),
        };
        self.cache.set_set(&task.hash, value).await?;
        Ok(StepOutcome::Evaluated {
            hash: task.hash.clone(),
            rows: rows_count,
        })
    }

    /// Increment the retry counter and either re-enqueue or drop the
    /// task, returning `true` if it was dropped.
    async fn retire_or_requeue(&self, mut task: FragmentTask) -> Result<bool, QueueError> {
        task.retries += 1;
        if task.retries >= self.max_retries {
            tracing::warn!(
                hash = %task.hash,
                retries = task.retries,
                "fragment task exceeded max_retries, dropping"
            );
            Ok(true)
        } else {
            self.queue.requeue_fragment(task).await?;
            Ok(false)
        }
    }

    /// Run until `shutdown` flips to `false`. The fragment currently
    /// being processed always finishes; only the next pop is skipped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        while *shutdown.borrow() {
            match self.run_once().await {
                Ok(StepOutcome::Idle) => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "worker step errored"),
            }
        }
        tracing::info!("worker loop exited after shutdown signal");
    }
}

fn to_cache_value(
    rows: Vec<ExecutedValue>,
    partition: &str,
    meta: &PartitionMeta,
) -> Result<CacheValue, CacheError> {
    if let Some(bitsize) = meta.bitsize {
        let mut bits = FixedBitSet::with_capacity(bitsize as usize);
        for row in rows {
            let v = match row {
                ExecutedValue::Int(i) => i,
                ExecutedValue::Text(s) => s.parse::<i64>().map_err(|_| CacheError::DatatypeMismatch {
                    partition: partition.to_string(),
                    expected: "integer".to_string(),
                    actual: "text".to_string(),
                })?,
            };
            if v < 0 || v as u32 >= bitsize {
                return Err(CacheError::OutOfDomain {
                    partition: partition.to_string(),
                    value: v,
                    bitsize,
                });
            }
            bits.insert(v as usize);
        }
        return Ok(CacheValue::Bitmap { bits, bitsize });
    }

    match meta.datatype {
        PartitionDatatype::Integer | PartitionDatatype::Timestamp => {
            let mut set = BTreeSet::new();
            for row in rows {
                let v = match row {
                    ExecutedValue::Int(i) => i,
                    ExecutedValue::Text(s) => s.parse::<i64>().map_err(|_| CacheError::DatatypeMismatch {
                        partition: partition.to_string(),
                        expected: meta.datatype.as_str().to_string(),
                        actual: "text".to_string(),
                    })?,
                };
                set.insert(v);
            }
            Ok(CacheValue::IntSet(set))
        }
        PartitionDatatype::Text | PartitionDatatype::Float => {
            let set: BTreeSet<String> = rows
                .into_iter()
                .map(|row| match row {
                    ExecutedValue::Int(i) => i.to_string(),
                    ExecutedValue::Text(s) => s,
                })
                .collect();
            Ok(CacheValue::TextSet(set))
        }
    }
}

/// Pops original-query entries, runs the query processor, and pushes the
/// resulting fragment tasks — the other half of spec.md §4.4's producer
/// side.
pub struct DecompositionWorker {
    queue: Arc<dyn Queue>,
    cache: Arc<dyn CacheBackend>,
    options: QueryProcessorOptions,
}

impl DecompositionWorker {
    pub fn new(queue: Arc<dyn Queue>, cache: Arc<dyn CacheBackend>, options: QueryProcessorOptions) -> Self {
        Self { queue, cache, options }
    }

    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let entry = match self.queue.pop_original().await? {
            Some(entry) => entry,
            None => return Ok(0),
        };

        let fragments = partition_core::generate_fragments(&entry.payload, &entry.partition, &self.options)?;
        let tasks: Vec<FragmentTask> = fragments
            .into_iter()
            .map(|f| FragmentTask::new(f.sql, f.hash, entry.partition.clone()))
            .collect();
        let count = tasks.len();
        self.queue.push_fragments(tasks, self.cache.as_ref()).await?;
        Ok(count)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        while *shutdown.borrow() {
            match self.run_once().await {
                Ok(0) => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "decomposition step errored"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OriginalEntry;
    use async_trait::async_trait;
    use partition_cache::backends::InMemorySetBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryQueue {
        originals: StdMutex<std::collections::VecDeque<OriginalEntry>>,
        fragments: StdMutex<std::collections::VecDeque<FragmentTask>>,
        locks: StdMutex<std::collections::HashSet<(String, String)>>,
    }

    #[async_trait]
    impl Queue for InMemoryQueue {
        async fn push_original(&self, entry: OriginalEntry) -> Result<(), QueueError> {
            self.originals.lock().unwrap().push_back(entry);
            Ok(())
        }

        async fn push_fragments(
            &self,
            tasks: Vec<FragmentTask>,
            cache: &dyn CacheBackend,
        ) -> Result<(), QueueError> {
            for task in tasks {
                if cache.exists(&task.hash).await? {
                    continue;
                }
                self.fragments.lock().unwrap().push_back(task);
            }
            Ok(())
        }

        async fn pop_original(&self) -> Result<Option<OriginalEntry>, QueueError> {
            Ok(self.originals.lock().unwrap().pop_front())
        }

        async fn pop_fragment(&self) -> Result<Option<FragmentTask>, QueueError> {
            Ok(self.fragments.lock().unwrap().pop_front())
        }

        async fn requeue_fragment(&self, task: FragmentTask) -> Result<(), QueueError> {
            self.fragments.lock().unwrap().push_back(task);
            Ok(())
        }

        async fn try_acquire_lock(&self, partition: &str, hash: &str) -> Result<bool, QueueError> {
            Ok(self
                .locks
                .lock()
                .unwrap()
                .insert((partition.to_string(), hash.to_string())))
        }

        async fn release_lock(&self, partition: &str, hash: &str) -> Result<(), QueueError> {
            self.locks
                .lock()
                .unwrap()
                .remove(&(partition.to_string(), hash.to_string()));
            Ok(())
        }

        async fn queue_lengths(&self) -> Result<crate::model::QueueLengths, QueueError> {
            Ok(crate::model::QueueLengths {
                original: self.originals.lock().unwrap().len() as u64,
                fragment: self.fragments.lock().unwrap().len() as u64,
            })
        }

        async fn clear_all(&self) -> Result<(), QueueError> {
            self.originals.lock().unwrap().clear();
            self.fragments.lock().unwrap().clear();
            Ok(())
        }

        async fn close(&self) -> Result<(), QueueError> {
            Ok(())
        }
    }

    struct StaticExecutor {
        rows: Vec<ExecutedValue>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FragmentExecutor for StaticExecutor {
        async fn execute(&self, _sql: &str, _deadline: Duration) -> Result<Vec<ExecutedValue>, QueueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.clone())
        }
    }

    async fn registry_with(partition: &str, meta: PartitionMeta) -> Arc<RwLock<PartitionRegistry>> {
        let mut registry = PartitionRegistry::new();
        registry.register(partition, meta).unwrap();
        Arc::new(RwLock::new(registry))
    }

    #[tokio::test]
    async fn idle_when_queue_empty() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemorySetBackend::new());
        let executor = Arc::new(StaticExecutor {
            rows: vec![],
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with("region_id", PartitionMeta::new(PartitionDatatype::Integer)).await;
        let worker = Worker::new(queue, cache, executor, registry, Duration::from_secs(1), 3);
        assert_eq!(worker.run_once().await.unwrap(), StepOutcome::Idle);
    }

    #[tokio::test]
    async fn evaluates_and_writes_int_set() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemorySetBackend::new());
        queue
            .push_fragments(
                vec![FragmentTask::new("select distinct region_id from t", "h1", "region_id")],
                cache.as_ref(),
            )
            .await
            .unwrap();
        let executor = Arc::new(StaticExecutor {
            rows: vec![ExecutedValue::Int(1), ExecutedValue::Int(2)],
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with("region_id", PartitionMeta::new(PartitionDatatype::Integer)).await;
        let worker = Worker::new(queue.clone(), cache.clone(), executor, registry, Duration::from_secs(1), 3);

        let outcome = worker.run_once().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Evaluated {
                hash: "h1".to_string(),
                rows: 2
            }
        );
        assert!(cache.exists("h1").await.unwrap());
    }

    #[tokio::test]
    async fn empty_rows_write_null_marker() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemorySetBackend::new());
        queue
            .push_fragments(
                vec![FragmentTask::new("select distinct region_id from t", "h1", "region_id")],
                cache.as_ref(),
            )
            .await
            .unwrap();
        let executor = Arc::new(StaticExecutor {
            rows: vec![],
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with("region_id", PartitionMeta::new(PartitionDatatype::Integer)).await;
        let worker = Worker::new(queue, cache.clone(), executor, registry, Duration::from_secs(1), 3);

        let outcome = worker.run_once().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::EvaluatedNull {
                hash: "h1".to_string()
            }
        );
        assert_eq!(
            cache.get("h1").await.unwrap(),
            partition_cache::GetResult::Null
        );
    }

    #[tokio::test]
    async fn already_cached_hash_is_discarded_without_executing() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemorySetBackend::new());
        cache.set_null("h1").await.unwrap();
        queue
            .push_fragments(
                vec![FragmentTask::new("select distinct region_id from t", "h1", "region_id")],
                // bypass push_fragments' own dedup so the worker, not the
                // push path, is what's under test
                &NeverExistsCache,
            )
            .await
            .unwrap();

        let executor = Arc::new(StaticExecutor {
            rows: vec![ExecutedValue::Int(1)],
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with("region_id", PartitionMeta::new(PartitionDatatype::Integer)).await;
        let worker = Worker::new(queue, cache, executor.clone(), registry, Duration::from_secs(1), 3);

        let outcome = worker.run_once().await.unwrap();
        assert_eq!(outcome, StepOutcome::AlreadyCached);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    struct NeverExistsCache;

    #[async_trait]
    impl CacheBackend for NeverExistsCache {
        async fn get(&self, _key: &str) -> Result<partition_cache::GetResult<CacheValue>, CacheError> {
            Ok(partition_cache::GetResult::Miss)
        }
        async fn filter_existing(&self, _keys: &[String]) -> Result<Vec<String>, CacheError> {
            Ok(vec![])
        }
        async fn get_intersected(&self, _keys: &[String]) -> Result<(Option<CacheValue>, usize), CacheError> {
            Ok((None, 0))
        }
        async fn set_set(&self, _key: &str, _value: CacheValue) -> Result<(), CacheError> {
            Ok(())
        }
        async fn set_null(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
        async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
            Ok(vec![])
        }
        async fn close(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lock_contention_requeues_with_incremented_retries() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemorySetBackend::new());
        // Pre-acquire the lock so the worker loses the race.
        queue.try_acquire_lock("region_id", "h1").await.unwrap();
        queue
            .push_fragments(
                vec![FragmentTask::new("select distinct region_id from t", "h1", "region_id")],
                cache.as_ref(),
            )
            .await
            .unwrap();
        let executor = Arc::new(StaticExecutor {
            rows: vec![],
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with("region_id", PartitionMeta::new(PartitionDatatype::Integer)).await;
        let worker = Worker::new(queue.clone(), cache, executor.clone(), registry, Duration::from_secs(1), 3);

        let outcome = worker.run_once().await.unwrap();
        assert_eq!(outcome, StepOutcome::LockContention { dropped: false });
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.queue_lengths().await.unwrap().fragment, 1);
    }

    #[tokio::test]
    async fn decomposition_worker_generates_and_pushes_fragments() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemorySetBackend::new());
        queue
            .push_original(OriginalEntry::new(
                "select * from customer where c_mktsegment = 'BUILDING'",
                "region_id",
            ))
            .await
            .unwrap();

        let decomposer = DecompositionWorker::new(queue.clone(), cache, QueryProcessorOptions::default());
        let pushed = decomposer.run_once().await.unwrap();
        assert_eq!(pushed, 1);
        assert_eq!(queue.queue_lengths().await.unwrap().fragment, 1);
    }

    #[tokio::test]
    async fn bitmap_out_of_domain_leaves_key_absent() {
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::default());
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemorySetBackend::new());
        queue
            .push_fragments(
                vec![FragmentTask::new("select distinct region_id from t", "h1", "region_id")],
                cache.as_ref(),
            )
            .await
            .unwrap();
        let executor = Arc::new(StaticExecutor {
            rows: vec![ExecutedValue::Int(2048)],
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with(
            "region_id",
            PartitionMeta::new(PartitionDatatype::Integer).with_bitsize(1024),
        )
        .await;
        let worker = Worker::new(queue, cache.clone(), executor, registry, Duration::from_secs(1), 3);

        let outcome = worker.run_once().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Failed {
                hash: "h1".to_string(),
                dropped: true
            }
        );
        assert!(!cache.exists("h1").await.unwrap());
    }
}
