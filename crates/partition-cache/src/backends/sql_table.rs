//! Postgres-backed explicit-set cache: one table per partition, as
//! described for the `persistent layout` in the wire-format contract.
//! Uses `sqlx::PgPool` with runtime `query`/`query_as` rather than
//! compile-time checked queries, since the table name is per-partition
//! and dynamic.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::backend::{CacheBackend, LazyCacheBackend};
use crate::error::CacheError;
use crate::value::{CacheValue, ElementType, GetResult};

pub struct SqlTableBackend {
    pool: PgPool,
    table: String,
    element_type: ElementType,
}

impl SqlTableBackend {
    /// `table` must already be a valid, trusted identifier — callers
    /// derive it from the partition name, not from user input.
    pub async fn connect(
        pool: PgPool,
        table: &str,
        element_type: ElementType,
    ) -> Result<Self, CacheError> {
        let value_type = match element_type {
            ElementType::Int => "BIGINT[]",
            ElementType::Text => "TEXT[]",
        };
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                hash TEXT PRIMARY KEY,
                value {value_type},
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            table = table,
            value_type = value_type,
        );
        sqlx::query(&ddl).execute(&pool).await?;
        Ok(Self {
            pool,
            table: table.to_string(),
            element_type,
        })
    }

    fn decode_row(&self, value: Option<Vec<String>>) -> GetResult<CacheValue> {
        match value {
            None => GetResult::Null,
            Some(members) => GetResult::Hit(match self.element_type {
                ElementType::Int => CacheValue::IntSet(
                    members.into_iter().filter_map(|m| m.parse().ok()).collect(),
                ),
                ElementType::Text => CacheValue::TextSet(members.into_iter().collect()),
            }),
        }
    }

    fn encode(&self, value: &CacheValue) -> Result<Vec<String>, CacheError> {
        match value {
            CacheValue::IntSet(s) => Ok(s.iter().map(|v| v.to_string()).collect()),
            CacheValue::TextSet(s) => Ok(s.iter().cloned().collect()),
            CacheValue::Bitmap { .. } => Err(CacheError::DatatypeMismatch {
                partition: self.table.clone(),
                expected: "explicit set".to_string(),
                actual: "bitmap".to_string(),
            }),
        }
    }
}

#[async_trait]
impl CacheBackend for SqlTableBackend {
    async fn get(&self, key: &str) -> Result<GetResult<CacheValue>, CacheError> {
        let row: Option<(Option<Vec<String>>,)> = sqlx::query_as(&format!(
            "SELECT value FROM {} WHERE hash = $1",
            self.table
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            None => GetResult::Miss,
            Some((value,)) => self.decode_row(value),
        })
    }

    async fn filter_existing(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT hash FROM {} WHERE hash = ANY($1)",
            self.table
        ))
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(h,)| h).collect())
    }

    async fn get_intersected(
        &self,
        keys: &[String],
    ) -> Result<(Option<CacheValue>, usize), CacheError> {
        let rows: Vec<(Option<Vec<String>>,)> = sqlx::query_as(&format!(
            "SELECT value FROM {} WHERE hash = ANY($1) AND value IS NOT NULL",
            self.table
        ))
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok((None, 0));
        }

        let mut acc = self.decode_row(rows[0].0.clone());
        let mut count = 1;
        for (value,) in &rows[1..] {
            if let GetResult::Hit(v) = self.decode_row(value.clone()) {
                if let GetResult::Hit(current) = &acc {
                    acc = GetResult::Hit(current.intersect(&v).unwrap_or_else(|| current.clone()));
                }
                count += 1;
            }
        }
        match acc {
            GetResult::Hit(v) => Ok((Some(v), count)),
            _ => Ok((None, 0)),
        }
    }

    async fn set_set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        if value.is_empty() {
            return self.set_null(key).await;
        }
        let members = self.encode(&value)?;
        sqlx::query(&format!(
            "INSERT INTO {} (hash, value) VALUES ($1, $2)
             ON CONFLICT (hash) DO UPDATE SET value = EXCLUDED.value",
            self.table
        ))
        .bind(key)
        .bind(members)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_null(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query(&format!(
            "INSERT INTO {} (hash, value) VALUES ($1, NULL)
             ON CONFLICT (hash) DO UPDATE SET value = NULL",
            self.table
        ))
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query(&format!("DELETE FROM {} WHERE hash = $1", self.table))
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        let rows: Vec<(String,)> = sqlx::query_as(&format!("SELECT hash FROM {}", self.table))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(h,)| h).collect())
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[async_trait]
impl LazyCacheBackend for SqlTableBackend {
    async fn get_intersected_sql(&self, keys: &[String]) -> Result<String, CacheError> {
        let quoted_keys: Vec<String> = keys
            .iter()
            .map(|k| format!("'{}'", k.replace('\'', "''")))
            .collect();
        let key_list = quoted_keys.join(", ");
        Ok(format!(
            "(SELECT v FROM (
                SELECT unnest(value) AS v FROM {table} WHERE hash IN ({keys}) AND value IS NOT NULL
            ) present_values
            GROUP BY v
            HAVING count(*) = (SELECT count(*) FROM {table} WHERE hash IN ({keys}) AND value IS NOT NULL))",
            table = self.table,
            keys = key_list,
        ))
    }
}
