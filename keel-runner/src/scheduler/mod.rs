//! Scheduler layer
//!
//! Queues submitted builds and runs them on a fixed number of workers.
//! Submitters only need `WorkerPool::enqueue`.

pub mod pool;

pub use pool::{BuildTask, WorkerPool};
