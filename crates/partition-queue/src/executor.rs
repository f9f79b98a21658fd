//! `FragmentExecutor`: the interface-only binding to the source DB that
//! spec.md §6 calls out as an external collaborator, plus one concrete
//! Postgres adapter so the worker daemon is runnable end-to-end.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::QueueError;

/// One value from a fragment's first (and only) projected column.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutedValue {
    Int(i64),
    Text(String),
}

/// Executes fragment SQL against the authoritative source database and
/// returns the first-column rows as the partition-key set, per spec.md
/// §6's "Source DB" contract. Out of scope for this crate beyond the
/// interface: the driver and the database itself are external
/// collaborators.
#[async_trait]
pub trait FragmentExecutor: Send + Sync {
    async fn execute(&self, sql: &str, deadline: Duration) -> Result<Vec<ExecutedValue>, QueueError>;
}

/// Reference binding: executes fragments via a `sqlx` Postgres pool,
/// decoding the first column as an integer if possible, falling back to
/// text.
pub struct SqlxFragmentExecutor {
    pool: PgPool,
}

impl SqlxFragmentExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FragmentExecutor for SqlxFragmentExecutor {
    async fn execute(&self, sql: &str, deadline: Duration) -> Result<Vec<ExecutedValue>, QueueError> {
        let rows = tokio::time::timeout(deadline, sqlx::query(sql).fetch_all(&self.pool))
            .await
            .map_err(|_| QueueError::Timeout)?
            .map_err(|e| QueueError::Execution(e.to_string()))?;

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Ok(v) = row.try_get::<i64, usize>(0) {
                values.push(ExecutedValue::Int(v));
            } else if let Ok(v) = row.try_get::<String, usize>(0) {
                values.push(ExecutedValue::Text(v));
            } else {
                return Err(QueueError::Execution(
                    "fragment's projected column is neither integer nor text".to_string(),
                ));
            }
        }
        Ok(values)
    }
}
