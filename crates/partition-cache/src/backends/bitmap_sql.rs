//! Postgres-backed bitmap cache: one table per partition, with a fixed-
//! width `BIT VARYING` column sized to the registered bitsize.

use async_trait::async_trait;
use fixedbitset::FixedBitSet;
use sqlx::PgPool;

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::value::{CacheValue, GetResult};

pub struct BitmapSqlTableBackend {
    pool: PgPool,
    table: String,
    bitsize: u32,
}

impl BitmapSqlTableBackend {
    pub async fn connect(pool: PgPool, table: &str, bitsize: u32) -> Result<Self, CacheError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                hash TEXT PRIMARY KEY,
                value VARBIT({bitsize}),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            table = table,
            bitsize = bitsize,
        );
        sqlx::query(&ddl).execute(&pool).await?;
        Ok(Self {
            pool,
            table: table.to_string(),
            bitsize,
        })
    }

    fn encode(&self, bits: &FixedBitSet) -> String {
        (0..self.bitsize as usize)
            .map(|i| if bits.contains(i) { '1' } else { '0' })
            .collect()
    }

    fn decode(&self, ascii: &str) -> FixedBitSet {
        let mut bits = FixedBitSet::with_capacity(self.bitsize as usize);
        for (i, c) in ascii.chars().enumerate().take(self.bitsize as usize) {
            if c == '1' {
                bits.insert(i);
            }
        }
        bits
    }
}

#[async_trait]
impl CacheBackend for BitmapSqlTableBackend {
    async fn get(&self, key: &str) -> Result<GetResult<CacheValue>, CacheError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as(&format!("SELECT value::text FROM {} WHERE hash = $1", self.table))
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            None => GetResult::Miss,
            Some((None,)) => GetResult::Null,
            Some((Some(raw),)) => GetResult::Hit(CacheValue::Bitmap {
                bits: self.decode(&raw),
                bitsize: self.bitsize,
            }),
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
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT value::text FROM {} WHERE hash = ANY($1) AND value IS NOT NULL",
            self.table
        ))
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok((None, 0));
        }

        let mut acc = self.decode(&rows[0].0);
        for (raw,) in &rows[1..] {
            acc.intersect_with(&self.decode(raw));
        }
        Ok((
            Some(CacheValue::Bitmap {
                bits: acc,
                bitsize: self.bitsize,
            }),
            rows.len(),
        ))
    }

    async fn set_set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        let bits = match value {
            CacheValue::Bitmap { bits, .. } => bits,
            other => {
                return Err(CacheError::DatatypeMismatch {
                    partition: key.to_string(),
                    expected: "bitmap".to_string(),
                    actual: other.kind().to_string(),
                })
            }
        };
        if bits.count_ones(..) == 0 {
            return Ok(());
        }
        if let Some(last) = bits.ones().max() {
            if last as u32 >= self.bitsize {
                return Err(CacheError::OutOfDomain {
                    partition: key.to_string(),
                    value: last as i64,
                    bitsize: self.bitsize,
                });
            }
        }
        sqlx::query(&format!(
            "INSERT INTO {} (hash, value) VALUES ($1, $2::varbit)
             ON CONFLICT (hash) DO UPDATE SET value = EXCLUDED.value",
            self.table
        ))
        .bind(key)
        .bind(self.encode(&bits))
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
