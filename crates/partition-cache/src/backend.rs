use async_trait::async_trait;

use crate::error::CacheError;
use crate::value::{CacheValue, GetResult};

/// Uniform contract over a keyed store of partition-key sets, within a
/// single partition namespace (one datatype, one optional bitsize).
///
/// Implementations must provide read-your-writes consistency for a single
/// logical connection. Concurrent writers on distinct keys are always
/// safe; concurrent writers on the same key are the caller's
/// responsibility (see the fragment lock in `partition-queue`).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<GetResult<CacheValue>, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_present())
    }

    /// Subset of `keys` that is present (hit or null) in the backend.
    async fn filter_existing(&self, keys: &[String]) -> Result<Vec<String>, CacheError>;

    /// Intersection of all present, non-null entries among `keys`, and how
    /// many such entries were found. `(None, 0)` when none are present.
    async fn get_intersected(
        &self,
        keys: &[String],
    ) -> Result<(Option<CacheValue>, usize), CacheError>;

    /// Store `value` under `key`. Idempotent: repeated calls with an
    /// identical value are safe to race.
    async fn set_set(&self, key: &str, value: CacheValue) -> Result<(), CacheError>;

    /// Record "evaluated, imposes no constraint" — distinguishable from an
    /// absent key.
    async fn set_null(&self, key: &str) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Enumerate stored keys. Bounded; backends are not required to
    /// return them in any particular order.
    async fn get_all_keys(&self) -> Result<Vec<String>, CacheError>;

    async fn close(&self) -> Result<(), CacheError>;
}

/// Optional capability: a backend that can express an intersection as a
/// database-native SQL expression instead of materializing it.
#[async_trait]
pub trait LazyCacheBackend: CacheBackend {
    /// A SQL expression that, embedded in a larger query against the same
    /// database, evaluates to the intersection over present entries for
    /// `keys`.
    async fn get_intersected_sql(&self, keys: &[String]) -> Result<String, CacheError>;
}
