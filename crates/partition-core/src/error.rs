use thiserror::Error;

/// Errors raised while deriving fragments from a query.
#[derive(Debug, Error)]
pub enum QueryProcessorError {
    #[error("failed to parse query: {0}")]
    ParseError(String),

    #[error("query has no fragment reachable from partition key '{0}'")]
    NoPartitionKey(String),
}
