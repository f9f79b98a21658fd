//! Cache contract and storage backends: a uniform key → partition-set
//! store, two value encodings (explicit sets and bitmaps), and an
//! optional lazy-mode capability that lets a backend hand back a SQL
//! expression instead of a materialized set.

mod backend;
pub mod backends;
mod error;
mod registry_store;
mod value;

pub use backend::{CacheBackend, LazyCacheBackend};
pub use error::CacheError;
pub use registry_store::{CacheRegistryStore, RegistryStoreError};
pub use value::{CacheValue, ElementType, GetResult};
