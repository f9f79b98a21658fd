//! Redis-backed bitmap cache: a bitmap is stored as an ASCII `'0'`/`'1'`
//! string, which lets `BITOP AND` compute the intersection directly on
//! the raw bytes (`0x31 & 0x31 == 0x31`, and `0x30` dominates either way)
//! without a bit-packed encoding.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use fixedbitset::FixedBitSet;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::value::{CacheValue, GetResult};

const NULL_MARKER: &str = "\u{0}";
static TEMP_KEY_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct RedisBitBackend {
    conn: ConnectionManager,
    bitsize: u32,
}

impl RedisBitBackend {
    pub async fn connect(url: &str, bitsize: u32) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, bitsize })
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

    fn temp_key() -> String {
        format!(
            "__partitioncache_bitop_tmp_{}_{}",
            std::process::id(),
            TEMP_KEY_COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }
}

#[async_trait]
impl CacheBackend for RedisBitBackend {
    async fn get(&self, key: &str) -> Result<GetResult<CacheValue>, CacheError> {
        let mut conn = self.conn.clone();
        let key_type: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
        if key_type == "none" {
            return Ok(GetResult::Miss);
        }
        let raw: String = conn.get(key).await?;
        if raw == NULL_MARKER {
            return Ok(GetResult::Null);
        }
        Ok(GetResult::Hit(CacheValue::Bitmap {
            bits: self.decode(&raw),
            bitsize: self.bitsize,
        }))
    }

    async fn filter_existing(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut out = Vec::new();
        for key in keys {
            let key_type: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
            if key_type != "none" {
                out.push(key.clone());
            }
        }
        Ok(out)
    }

    async fn get_intersected(
        &self,
        keys: &[String],
    ) -> Result<(Option<CacheValue>, usize), CacheError> {
        let mut conn = self.conn.clone();
        let mut valid = Vec::new();
        for key in keys {
            let key_type: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
            if key_type == "string" {
                let raw: String = conn.get(key).await?;
                if raw != NULL_MARKER {
                    valid.push(key.clone());
                }
            }
        }
        if valid.is_empty() {
            return Ok((None, 0));
        }
        if valid.len() == 1 {
            let raw: String = conn.get(&valid[0]).await?;
            return Ok((
                Some(CacheValue::Bitmap {
                    bits: self.decode(&raw),
                    bitsize: self.bitsize,
                }),
                1,
            ));
        }
        let temp = Self::temp_key();
        let _: () = redis::cmd("BITOP")
            .arg("AND")
            .arg(&temp)
            .arg(&valid)
            .query_async(&mut conn)
            .await?;
        let raw: String = conn.get(&temp).await?;
        let _: () = conn.del(&temp).await?;
        Ok((
            Some(CacheValue::Bitmap {
                bits: self.decode(&raw),
                bitsize: self.bitsize,
            }),
            valid.len(),
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
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, self.encode(&bits)).await?;
        Ok(())
    }

    async fn set_null(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, NULL_MARKER).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys("*").await?;
        Ok(keys)
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
