use thiserror::Error;

/// Errors raised by a queue backend or the worker loop built on top of it.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("nats error: {0}")]
    Nats(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("fragment lock contention for ({partition}, {hash})")]
    LockContention { partition: String, hash: String },

    #[error("cache error: {0}")]
    Cache(#[from] partition_cache::CacheError),

    #[error("query processor error: {0}")]
    QueryProcessor(#[from] partition_core::QueryProcessorError),

    #[error("fragment evaluation against the source database failed: {0}")]
    Execution(String),

    #[error("fragment evaluation against the source database timed out")]
    Timeout,
}
