//! Pure query processing: parse a SQL query, derive its canonical
//! fragments with respect to a declared partition key, and hash them.
//!
//! This crate performs no I/O. It is deterministic and reentrant: the same
//! `(sql, partition_key, options)` triple always yields the same ordered
//! fragment list, in the same process or a different one.

mod distance;
mod error;
mod fragment;
mod graph;
mod hash;
mod options;
mod render;

pub use distance::{format_distance, snap_distance};
pub use error::QueryProcessorError;
pub use fragment::{generate_fragments, Fragment};
pub use graph::JoinGraph;
pub use hash::fragment_hash;
pub use options::QueryProcessorOptions;
