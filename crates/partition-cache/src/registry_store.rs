//! [`RegistryPersistence`] for any [`CacheBackend`], so the registry stays
//! a leaf crate with no dependency back on the cache.
//!
//! The whole partition table is persisted as a single JSON document under
//! [`partition_registry::REGISTRY_NAMESPACE`], stored as a one-member
//! text set — reusing the existing `set_set`/`get` contract rather than
//! adding a side channel for metadata.

use std::collections::BTreeSet;

use async_trait::async_trait;
use partition_registry::{PartitionMeta, RegistryPersistence, REGISTRY_NAMESPACE};
use thiserror::Error;

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::value::{CacheValue, GetResult};

#[derive(Debug, Error)]
pub enum RegistryStoreError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("registry document corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Wraps any [`CacheBackend`] to persist registry entries alongside
/// fragment cache entries, under a namespace key that can never collide
/// with a fragment hash (fragment hashes are fixed-length hex; this key
/// has a literal `__` prefix/suffix).
pub struct CacheRegistryStore<'a, B: CacheBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: CacheBackend + ?Sized> CacheRegistryStore<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<'a, B: CacheBackend + ?Sized + Sync> RegistryPersistence for CacheRegistryStore<'a, B> {
    type Error = RegistryStoreError;

    async fn load_all(&self) -> Result<Vec<(String, PartitionMeta)>, Self::Error> {
        match self.backend.get(REGISTRY_NAMESPACE).await? {
            GetResult::Hit(CacheValue::TextSet(members)) => {
                let doc = members
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| "{}".to_string());
                let entries: Vec<(String, PartitionMeta)> = serde_json::from_str(&doc)?;
                Ok(entries)
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn save(&self, name: &str, meta: &PartitionMeta) -> Result<(), Self::Error> {
        let mut entries = self.load_all().await?;
        entries.retain(|(n, _)| n != name);
        entries.push((name.to_string(), meta.clone()));
        let doc = serde_json::to_string(&entries)?;
        self.backend
            .set_set(
                REGISTRY_NAMESPACE,
                CacheValue::TextSet(BTreeSet::from([doc])),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemorySetBackend;
    use partition_registry::PartitionDatatype;

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let backend = InMemorySetBackend::new();
        let store = CacheRegistryStore::new(&backend);
        store
            .save(
                "region_id",
                &PartitionMeta::new(PartitionDatatype::Integer).with_bitsize(1024),
            )
            .await
            .unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "region_id");
        assert_eq!(loaded[0].1.bitsize, Some(1024));
    }

    #[tokio::test]
    async fn save_overwrites_existing_entry() {
        let backend = InMemorySetBackend::new();
        let store = CacheRegistryStore::new(&backend);
        store
            .save("p", &PartitionMeta::new(PartitionDatatype::Integer))
            .await
            .unwrap();
        store
            .save("p", &PartitionMeta::new(PartitionDatatype::Text))
            .await
            .unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].1.datatype, PartitionDatatype::Text);
    }

    #[tokio::test]
    async fn load_all_empty_before_any_save() {
        let backend = InMemorySetBackend::new();
        let store = CacheRegistryStore::new(&backend);
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
