//! Entries that flow through the two queues: raw original queries awaiting
//! decomposition, and fragments awaiting evaluation against the source DB.

use serde::{Deserialize, Serialize};

/// An unprocessed original query, queued by a producer before
/// decomposition into fragments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OriginalEntry {
    /// Raw SQL text of the original query.
    pub payload: String,
    /// Partition key this query is meant to be decomposed against.
    pub partition: String,
    /// Monotonic arrival ordinal assigned by the backend at push time.
    #[serde(default)]
    pub enqueued_at: u64,
}

impl OriginalEntry {
    pub fn new(payload: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            partition: partition.into(),
            enqueued_at: 0,
        }
    }
}

/// A single fragment awaiting evaluation, carrying enough context for the
/// worker to execute it and write the result back under the right key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FragmentTask {
    /// Canonical fragment SQL text.
    pub fragment_sql: String,
    /// Fragment hash — the cache key this task will populate.
    pub hash: String,
    /// Partition namespace the hash belongs to.
    pub partition: String,
    /// Monotonic arrival ordinal assigned by the backend at push time.
    #[serde(default)]
    pub enqueued_at: u64,
    /// Number of times this task has been re-enqueued after failing to
    /// acquire its fragment lock or after an evaluation failure.
    #[serde(default)]
    pub retries: u32,
}

impl FragmentTask {
    pub fn new(
        fragment_sql: impl Into<String>,
        hash: impl Into<String>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            fragment_sql: fragment_sql.into(),
            hash: hash.into(),
            partition: partition.into(),
            enqueued_at: 0,
            retries: 0,
        }
    }
}

/// Current depth of each queue, for metrics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLengths {
    pub original: u64,
    pub fragment: u64,
}
