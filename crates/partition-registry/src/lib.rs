//! Partition-key registry: per-partition metadata (datatype, bitsize,
//! optional geometry column) shared by the cache, apply and queue crates.
//!
//! The registry itself holds no I/O. Persistence is expressed through the
//! [`RegistryPersistence`] trait so that `partition-cache` can implement it
//! against any `CacheBackend` without this crate depending back on it
//! (Registry is a leaf; handlers depend on it).

use std::collections::HashMap;
use thiserror::Error;

/// Reserved key namespace under which registry entries are persisted in a
/// cache backend, kept distinct from fragment hashes.
pub const REGISTRY_NAMESPACE: &str = "__partitioncache_registry__";

/// Datatype a partition key is declared to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PartitionDatatype {
    Integer,
    Float,
    Text,
    Timestamp,
}

impl PartitionDatatype {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionDatatype::Integer => "integer",
            PartitionDatatype::Float => "float",
            PartitionDatatype::Text => "text",
            PartitionDatatype::Timestamp => "timestamp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "integer" | "int" => Some(PartitionDatatype::Integer),
            "float" | "double" => Some(PartitionDatatype::Float),
            "text" | "string" => Some(PartitionDatatype::Text),
            "timestamp" | "datetime" => Some(PartitionDatatype::Timestamp),
            _ => None,
        }
    }
}

/// Per-partition metadata, created on first use or explicit registration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PartitionMeta {
    pub datatype: PartitionDatatype,
    /// Declared bit-string domain `[0, bitsize)` for bitmap-encoded caches.
    pub bitsize: Option<u32>,
    /// Geometry column backing a spatial partition key, if any.
    pub geometry_column: Option<String>,
}

impl PartitionMeta {
    pub fn new(datatype: PartitionDatatype) -> Self {
        Self {
            datatype,
            bitsize: None,
            geometry_column: None,
        }
    }

    pub fn with_bitsize(mut self, bitsize: u32) -> Self {
        self.bitsize = Some(bitsize);
        self
    }

    pub fn with_geometry_column(mut self, column: impl Into<String>) -> Self {
        self.geometry_column = Some(column.into());
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("partition '{0}' is not registered")]
    NotRegistered(String),
    #[error("partition '{partition}' is registered with datatype {expected}, got {actual}")]
    DatatypeMismatch {
        partition: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("partition '{0}' already registered with conflicting metadata")]
    Conflict(String),
}

/// In-memory view of partition-key metadata.
#[derive(Debug, Default, Clone)]
pub struct PartitionRegistry {
    entries: HashMap<String, PartitionMeta>,
}

impl PartitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a partition, or return `Conflict` if it is already
    /// registered with different metadata.
    pub fn register(&mut self, name: &str, meta: PartitionMeta) -> Result<(), RegistryError> {
        match self.entries.get(name) {
            Some(existing) if existing == &meta => Ok(()),
            Some(_) => Err(RegistryError::Conflict(name.to_string())),
            None => {
                tracing::debug!(partition = name, datatype = meta.datatype.as_str(), "registering partition");
                self.entries.insert(name.to_string(), meta);
                Ok(())
            }
        }
    }

    /// Register if absent, overwrite if present (used when loading from a
    /// persisted store at startup).
    pub fn upsert(&mut self, name: &str, meta: PartitionMeta) {
        self.entries.insert(name.to_string(), meta);
    }

    pub fn get(&self, name: &str) -> Option<&PartitionMeta> {
        self.entries.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&PartitionMeta, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> Option<PartitionMeta> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Hard datatype check for a value about to be written into the cache.
    pub fn validate_datatype(
        &self,
        name: &str,
        actual: PartitionDatatype,
    ) -> Result<(), RegistryError> {
        let meta = self.require(name)?;
        if meta.datatype.as_str() != actual.as_str() {
            return Err(RegistryError::DatatypeMismatch {
                partition: name.to_string(),
                expected: meta.datatype.as_str(),
                actual: actual.as_str(),
            });
        }
        Ok(())
    }
}

/// Persistence hook for the registry, implemented by `partition-cache` for
/// any `CacheBackend` under [`REGISTRY_NAMESPACE`]. This crate takes on the
/// one dependency (`async-trait`) needed to express it as an object-safe
/// async trait, same convention the whole workspace uses at async seams.
#[async_trait::async_trait]
pub trait RegistryPersistence {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load_all(&self) -> Result<Vec<(String, PartitionMeta)>, Self::Error>;
    async fn save(&self, name: &str, meta: &PartitionMeta) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let mut reg = PartitionRegistry::new();
        reg.register("region_id", PartitionMeta::new(PartitionDatatype::Integer))
            .unwrap();
        assert_eq!(
            reg.get("region_id").unwrap().datatype,
            PartitionDatatype::Integer
        );
    }

    #[test]
    fn register_conflict() {
        let mut reg = PartitionRegistry::new();
        reg.register("p", PartitionMeta::new(PartitionDatatype::Integer))
            .unwrap();
        let err = reg
            .register("p", PartitionMeta::new(PartitionDatatype::Text))
            .unwrap_err();
        assert_eq!(err, RegistryError::Conflict("p".to_string()));
    }

    #[test]
    fn register_idempotent_same_meta() {
        let mut reg = PartitionRegistry::new();
        let meta = PartitionMeta::new(PartitionDatatype::Integer).with_bitsize(1024);
        reg.register("p", meta.clone()).unwrap();
        reg.register("p", meta).unwrap();
    }

    #[test]
    fn require_missing() {
        let reg = PartitionRegistry::new();
        assert_eq!(
            reg.require("missing").unwrap_err(),
            RegistryError::NotRegistered("missing".to_string())
        );
    }

    #[test]
    fn validate_datatype_mismatch() {
        let mut reg = PartitionRegistry::new();
        reg.register("p", PartitionMeta::new(PartitionDatatype::Integer))
            .unwrap();
        let err = reg
            .validate_datatype("p", PartitionDatatype::Text)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DatatypeMismatch { .. }));
    }

    #[test]
    fn upsert_overwrites() {
        let mut reg = PartitionRegistry::new();
        reg.upsert("p", PartitionMeta::new(PartitionDatatype::Integer));
        reg.upsert("p", PartitionMeta::new(PartitionDatatype::Text));
        assert_eq!(reg.get("p").unwrap().datatype, PartitionDatatype::Text);
    }

    #[test]
    fn datatype_parse_roundtrip() {
        for dt in [
            PartitionDatatype::Integer,
            PartitionDatatype::Float,
            PartitionDatatype::Text,
            PartitionDatatype::Timestamp,
        ] {
            assert_eq!(PartitionDatatype::parse(dt.as_str()), Some(dt));
        }
    }
}
