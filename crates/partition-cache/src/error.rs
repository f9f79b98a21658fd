use thiserror::Error;

/// Errors surfaced by a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("datatype mismatch for partition '{partition}': expected {expected}, got {actual}")]
    DatatypeMismatch {
        partition: String,
        expected: String,
        actual: String,
    },

    #[error("value {value} is out of domain [0, {bitsize}) for partition '{partition}'")]
    OutOfDomain {
        partition: String,
        value: i64,
        bitsize: u32,
    },

    #[error("backend does not support lazy mode")]
    LazyNotSupported,

    #[error("backend temporarily unavailable: {0}")]
    BackendUnavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("embedded store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
