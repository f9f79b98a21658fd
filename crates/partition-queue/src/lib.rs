//! Queue and worker coordination for PartitionCache fragment evaluation.
//!
//! Producers push original queries; a [`worker::DecompositionWorker`] turns
//! them into [`model::FragmentTask`]s; a pool of [`worker::Worker`]s
//! consumes those tasks with single-flight locking and writes results into
//! a `partition-cache` backend. Two concrete queue backends are provided —
//! [`pg::PgQueueBackend`] and [`nats::NatsQueueBackend`] — behind the
//! [`backend::Queue`] trait.

mod backend;
mod error;
mod executor;
mod model;
mod nats;
mod pg;
mod worker;

pub use backend::Queue;
pub use error::QueueError;
pub use executor::{ExecutedValue, FragmentExecutor, SqlxFragmentExecutor};
pub use model::{FragmentTask, OriginalEntry, QueueLengths};
pub use nats::NatsQueueBackend;
pub use pg::PgQueueBackend;
pub use worker::{DecompositionWorker, StepOutcome, Worker};
