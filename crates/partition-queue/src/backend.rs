use async_trait::async_trait;

use crate::error::QueueError;
use crate::model::{FragmentTask, OriginalEntry, QueueLengths};

/// Producer/consumer contract over the two queues of spec.md §4.4: raw
/// original queries awaiting decomposition, and fragments awaiting
/// evaluation.
///
/// Implementations provide FIFO delivery at the backend level, at-most-once
/// dequeue, and the fragment-level lock the single-flight guarantee is
/// built on — they do not provide ordering across a pool of concurrent
/// workers.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a raw original query for later decomposition.
    async fn push_original(&self, entry: OriginalEntry) -> Result<(), QueueError>;

    /// Enqueue fragment tasks. Duplicates — a hash already queued or
    /// already present (non-absent) in `cache` — are silently dropped;
    /// callers pass the cache backend so dedup can check `exists`.
    async fn push_fragments(
        &self,
        tasks: Vec<FragmentTask>,
        cache: &dyn partition_cache::CacheBackend,
    ) -> Result<(), QueueError>;

    /// Pop the next original entry, or `None` if the queue is empty.
    async fn pop_original(&self) -> Result<Option<OriginalEntry>, QueueError>;

    /// Pop the next fragment task, or `None` if the queue is empty.
    async fn pop_fragment(&self) -> Result<Option<FragmentTask>, QueueError>;

    /// Re-enqueue a fragment task (lock contention or a failed attempt
    /// below `max_retries`). Callers increment `task.retries` first.
    async fn requeue_fragment(&self, task: FragmentTask) -> Result<(), QueueError>;

    /// Non-blocking attempt to acquire the key-level mutex for
    /// `(partition, hash)`. `false` means another evaluator currently
    /// holds it.
    async fn try_acquire_lock(&self, partition: &str, hash: &str) -> Result<bool, QueueError>;

    /// Release a previously acquired lock. Idempotent.
    async fn release_lock(&self, partition: &str, hash: &str) -> Result<(), QueueError>;

    /// Current depth of both queues.
    async fn queue_lengths(&self) -> Result<QueueLengths, QueueError>;

    /// Remove every entry from both queues. Test/operator use only.
    async fn clear_all(&self) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}
