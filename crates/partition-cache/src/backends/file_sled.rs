//! File-backed embedded cache: a single on-disk store, no server process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::value::{CacheValue, GetResult};

#[derive(Serialize, Deserialize)]
enum StoredValue {
    IntSet(Vec<i64>),
    TextSet(Vec<String>),
    Bitmap { bits: Vec<u32>, bitsize: u32 },
    Null,
}

impl From<&CacheValue> for StoredValue {
    fn from(v: &CacheValue) -> Self {
        match v {
            CacheValue::IntSet(s) => StoredValue::IntSet(s.iter().cloned().collect()),
            CacheValue::TextSet(s) => StoredValue::TextSet(s.iter().cloned().collect()),
            CacheValue::Bitmap { bits, bitsize } => StoredValue::Bitmap {
                bits: bits.ones().map(|i| i as u32).collect(),
                bitsize: *bitsize,
            },
        }
    }
}

impl StoredValue {
    fn into_cache_value(self) -> Option<CacheValue> {
        match self {
            StoredValue::IntSet(v) => Some(CacheValue::IntSet(v.into_iter().collect())),
            StoredValue::TextSet(v) => Some(CacheValue::TextSet(v.into_iter().collect())),
            StoredValue::Bitmap { bits, bitsize } => {
                let mut fb = fixedbitset::FixedBitSet::with_capacity(bitsize as usize);
                for i in bits {
                    fb.insert(i as usize);
                }
                Some(CacheValue::Bitmap {
                    bits: fb,
                    bitsize,
                })
            }
            StoredValue::Null => None,
        }
    }
}

pub struct FileBackend {
    db: sled::Db,
}

impl FileBackend {
    pub fn open(path: &str) -> Result<Self, CacheError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<GetResult<CacheValue>, CacheError> {
        match self.db.get(key)? {
            None => Ok(GetResult::Miss),
            Some(bytes) => {
                let stored: StoredValue = serde_json::from_slice(&bytes)?;
                Ok(match stored.into_cache_value() {
                    Some(v) => GetResult::Hit(v),
                    None => GetResult::Null,
                })
            }
        }
    }

    async fn filter_existing(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        Ok(keys
            .iter()
            .filter(|k| self.db.contains_key(k.as_str()).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn get_intersected(
        &self,
        keys: &[String],
    ) -> Result<(Option<CacheValue>, usize), CacheError> {
        let mut present: Vec<CacheValue> = Vec::new();
        for key in keys {
            if let Some(bytes) = self.db.get(key)? {
                let stored: StoredValue = serde_json::from_slice(&bytes)?;
                if let Some(v) = stored.into_cache_value() {
                    present.push(v);
                }
            }
        }
        if present.is_empty() {
            return Ok((None, 0));
        }
        let mut acc = present[0].clone();
        for v in &present[1..] {
            acc = acc.intersect(v).unwrap_or(acc);
        }
        Ok((Some(acc), present.len()))
    }

    async fn set_set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        let stored = StoredValue::from(&value);
        let bytes = serde_json::to_vec(&stored)?;
        self.db.insert(key, bytes)?;
        Ok(())
    }

    async fn set_null(&self, key: &str) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(&StoredValue::Null)?;
        self.db.insert(key, bytes)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.db.remove(key)?;
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .db
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .map(|k| String::from_utf8_lossy(&k).to_string())
            .collect())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn roundtrip_int_set() {
        let dir = tempfile_dir();
        let backend = FileBackend::open(&dir).unwrap();
        backend
            .set_set("h1", CacheValue::IntSet(BTreeSet::from([1, 2, 3])))
            .await
            .unwrap();
        match backend.get("h1").await.unwrap() {
            GetResult::Hit(CacheValue::IntSet(s)) => assert_eq!(s, BTreeSet::from([1, 2, 3])),
            other => panic!("unexpected: {:?}", other),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn null_marker_roundtrips() {
        let dir = tempfile_dir();
        let backend = FileBackend::open(&dir).unwrap();
        backend.set_null("h1").await.unwrap();
        assert_eq!(backend.get("h1").await.unwrap(), GetResult::Null);
        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempfile_dir() -> String {
        format!(
            "/tmp/partitioncache-sled-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }
}
