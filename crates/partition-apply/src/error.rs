use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    QueryProcessor(#[from] partition_core::QueryProcessorError),

    #[error("cache error: {0}")]
    Cache(#[from] partition_cache::CacheError),

    #[error("failed to parse query for rewriting: {0}")]
    Parse(String),

    #[error("query shape not supported for rewriting (expected a simple SELECT)")]
    UnsupportedQueryShape,

    #[error("spatial apply requires a geometry_column in the query processor options")]
    MissingGeometryColumn,
}
