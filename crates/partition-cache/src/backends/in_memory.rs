//! Process-local set backend. Useful for tests and single-process
//! deployments; carries no persistence across restarts.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::value::{CacheValue, GetResult};

#[derive(Default)]
pub struct InMemorySetBackend {
    entries: Mutex<HashMap<String, Option<CacheValue>>>,
}

impl InMemorySetBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemorySetBackend {
    async fn get(&self, key: &str) -> Result<GetResult<CacheValue>, CacheError> {
        let entries = self.entries.lock().unwrap();
        Ok(match entries.get(key) {
            None => GetResult::Miss,
            Some(None) => GetResult::Null,
            Some(Some(v)) => GetResult::Hit(v.clone()),
        })
    }

    async fn filter_existing(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.lock().unwrap();
        Ok(keys
            .iter()
            .filter(|k| entries.contains_key(k.as_str()))
            .cloned()
            .collect())
    }

    async fn get_intersected(
        &self,
        keys: &[String],
    ) -> Result<(Option<CacheValue>, usize), CacheError> {
        let entries = self.entries.lock().unwrap();
        let present: Vec<&CacheValue> = keys
            .iter()
            .filter_map(|k| entries.get(k.as_str()).and_then(|v| v.as_ref()))
            .collect();
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
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), Some(value));
        Ok(())
    }

    async fn set_null(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), None);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.keys().cloned().collect())
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn miss_then_hit_then_null() {
        let backend = InMemorySetBackend::new();
        assert_eq!(backend.get("h1").await.unwrap(), GetResult::Miss);

        backend
            .set_set("h1", CacheValue::IntSet(BTreeSet::from([1, 2])))
            .await
            .unwrap();
        assert!(matches!(backend.get("h1").await.unwrap(), GetResult::Hit(_)));

        backend.set_null("h2").await.unwrap();
        assert_eq!(backend.get("h2").await.unwrap(), GetResult::Null);
    }

    #[tokio::test]
    async fn get_intersected_ignores_null_and_absent() {
        let backend = InMemorySetBackend::new();
        backend
            .set_set("a", CacheValue::IntSet(BTreeSet::from([1, 2, 3])))
            .await
            .unwrap();
        backend
            .set_set("b", CacheValue::IntSet(BTreeSet::from([2, 3, 4])))
            .await
            .unwrap();
        backend.set_null("c").await.unwrap();

        let (result, count) = backend
            .get_intersected(&["a".to_string(), "b".to_string(), "c".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(result, Some(CacheValue::IntSet(BTreeSet::from([2, 3]))));
    }

    #[tokio::test]
    async fn get_intersected_empty_when_none_present() {
        let backend = InMemorySetBackend::new();
        let (result, count) = backend.get_intersected(&["missing".to_string()]).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let backend = InMemorySetBackend::new();
        backend
            .set_set("a", CacheValue::IntSet(BTreeSet::from([1])))
            .await
            .unwrap();
        backend.delete("a").await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), GetResult::Miss);
    }
}
