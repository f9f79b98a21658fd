//! Redis-backed explicit-set cache: values are Redis `SET`s, and a lone
//! `\x00` byte string at the key marks the null-marker (distinguished
//! from a real member because an explicit-set partition value is never
//! stored as a bare Redis string).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::value::{CacheValue, ElementType, GetResult};

const NULL_MARKER: &str = "\u{0}";

pub struct RedisSetBackend {
    conn: ConnectionManager,
    element_type: ElementType,
}

impl RedisSetBackend {
    pub async fn connect(url: &str, element_type: ElementType) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, element_type })
    }

    fn decode(&self, members: Vec<String>) -> CacheValue {
        match self.element_type {
            ElementType::Int => {
                CacheValue::IntSet(members.into_iter().filter_map(|m| m.parse().ok()).collect())
            }
            ElementType::Text => CacheValue::TextSet(members.into_iter().collect()),
        }
    }

    fn encode(&self, value: &CacheValue) -> Result<Vec<String>, CacheError> {
        match value {
            CacheValue::IntSet(s) => Ok(s.iter().map(|v| v.to_string()).collect()),
            CacheValue::TextSet(s) => Ok(s.iter().cloned().collect()),
            CacheValue::Bitmap { .. } => Err(CacheError::DatatypeMismatch {
                partition: "<redis-set>".to_string(),
                expected: "explicit set".to_string(),
                actual: "bitmap".to_string(),
            }),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisSetBackend {
    async fn get(&self, key: &str) -> Result<GetResult<CacheValue>, CacheError> {
        let mut conn = self.conn.clone();
        let key_type: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
        match key_type.as_str() {
            "none" => Ok(GetResult::Miss),
            "string" => {
                let value: String = conn.get(key).await?;
                if value == NULL_MARKER {
                    Ok(GetResult::Null)
                } else {
                    Ok(GetResult::Miss)
                }
            }
            "set" => {
                let members: Vec<String> = conn.smembers(key).await?;
                Ok(GetResult::Hit(self.decode(members)))
            }
            _ => Ok(GetResult::Miss),
        }
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
        let mut set_keys = Vec::new();
        for key in keys {
            let key_type: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
            if key_type == "set" {
                set_keys.push(key.clone());
            }
        }
        if set_keys.is_empty() {
            return Ok((None, 0));
        }
        if set_keys.len() == 1 {
            let members: Vec<String> = conn.smembers(&set_keys[0]).await?;
            return Ok((Some(self.decode(members)), 1));
        }
        let members: Vec<String> = conn.sinter(&set_keys).await?;
        Ok((Some(self.decode(members)), set_keys.len()))
    }

    async fn set_set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        let members = self.encode(&value)?;
        if members.is_empty() {
            return self.set_null(key).await;
        }
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, members).await?;
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
