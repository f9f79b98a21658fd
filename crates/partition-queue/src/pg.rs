//! Postgres-backed queue: relational tables for the two queues plus a
//! lock table for the fragment mutex, per spec.md §6's "relational store
//! with advisory locking" option.
//!
//! Uses a conditional-`INSERT` lock table rather than
//! `pg_try_advisory_lock`/`pg_advisory_unlock`: those are session-scoped,
//! and a connection-pooled client cannot guarantee the connection that
//! acquired a lock is the one that releases it. A dedicated table keyed by
//! `(partition, hash)` gives the same non-blocking try-acquire semantics
//! without that hazard, at the cost of an explicit TTL reap instead of a
//! session-death release (see [`PgQueueBackend::reap_stale_locks`]).

use async_trait::async_trait;
use sqlx::PgPool;

use crate::backend::Queue;
use crate::error::QueueError;
use crate::model::{FragmentTask, OriginalEntry, QueueLengths};

pub struct PgQueueBackend {
    pool: PgPool,
}

impl PgQueueBackend {
    pub async fn connect(pool: PgPool) -> Result<Self, QueueError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS original_query_queue (
                id BIGSERIAL PRIMARY KEY,
                payload TEXT NOT NULL,
                partition TEXT NOT NULL,
                enqueued_at BIGINT NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fragment_queue (
                id BIGSERIAL PRIMARY KEY,
                fragment_sql TEXT NOT NULL,
                hash TEXT NOT NULL,
                partition TEXT NOT NULL,
                enqueued_at BIGINT NOT NULL DEFAULT 0,
                retries INT NOT NULL DEFAULT 0,
                UNIQUE (partition, hash)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fragment_locks (
                partition TEXT NOT NULL,
                hash TEXT NOT NULL,
                locked_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (partition, hash)
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Delete locks older than `ttl_secs`, reclaiming ones whose holder
    /// died without releasing. Intended to run on the same interval as
    /// the worker's reaper.
    pub async fn reap_stale_locks(&self, ttl_secs: i64) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "DELETE FROM fragment_locks WHERE locked_at < now() - make_interval(secs => $1)",
        )
        .bind(ttl_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Queue for PgQueueBackend {
    async fn push_original(&self, entry: OriginalEntry) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO original_query_queue (payload, partition) VALUES ($1, $2)",
        )
        .bind(&entry.payload)
        .bind(&entry.partition)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_fragments(
        &self,
        tasks: Vec<FragmentTask>,
        cache: &dyn partition_cache::CacheBackend,
    ) -> Result<(), QueueError> {
        for task in tasks {
            if cache.exists(&task.hash).await? {
                continue;
            }
            sqlx::query(
                "INSERT INTO fragment_queue (fragment_sql, hash, partition, retries)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (partition, hash) DO NOTHING",
            )
            .bind(&task.fragment_sql)
            .bind(&task.hash)
            .bind(&task.partition)
            .bind(task.retries as i32)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn pop_original(&self) -> Result<Option<OriginalEntry>, QueueError> {
        let row: Option<(i64, String, String, i64)> = sqlx::query_as(
            "DELETE FROM original_query_queue
             WHERE id = (
                 SELECT id FROM original_query_queue ORDER BY id LIMIT 1 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, payload, partition, enqueued_at",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, payload, partition, _)| OriginalEntry {
            payload,
            partition,
            enqueued_at: id as u64,
        }))
    }

    async fn pop_fragment(&self) -> Result<Option<FragmentTask>, QueueError> {
        let row: Option<(i64, String, String, String, i32)> = sqlx::query_as(
            "DELETE FROM fragment_queue
             WHERE id = (
                 SELECT id FROM fragment_queue ORDER BY id LIMIT 1 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, fragment_sql, hash, partition, retries",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, fragment_sql, hash, partition, retries)| FragmentTask {
            fragment_sql,
            hash,
            partition,
            enqueued_at: id as u64,
            retries: retries as u32,
        }))
    }

    async fn requeue_fragment(&self, task: FragmentTask) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO fragment_queue (fragment_sql, hash, partition, retries)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (partition, hash) DO UPDATE SET retries = EXCLUDED.retries",
        )
        .bind(&task.fragment_sql)
        .bind(&task.hash)
        .bind(&task.partition)
        .bind(task.retries as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_acquire_lock(&self, partition: &str, hash: &str) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "INSERT INTO fragment_locks (partition, hash) VALUES ($1, $2)
             ON CONFLICT (partition, hash) DO NOTHING",
        )
        .bind(partition)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, partition: &str, hash: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM fragment_locks WHERE partition = $1 AND hash = $2")
            .bind(partition)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn queue_lengths(&self) -> Result<QueueLengths, QueueError> {
        let (original,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM original_query_queue")
                .fetch_one(&self.pool)
                .await?;
        let (fragment,): (i64,) = sqlx::query_as("SELECT count(*) FROM fragment_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(QueueLengths {
            original: original as u64,
            fragment: fragment as u64,
        })
    }

    async fn clear_all(&self) -> Result<(), QueueError> {
        sqlx::query("TRUNCATE original_query_queue, fragment_queue, fragment_locks")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.pool.close().await;
        Ok(())
    }
}
