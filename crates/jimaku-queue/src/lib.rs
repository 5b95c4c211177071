//! Worker pools over the durable work queue: leasing, retry backoff,
//! per-unit time limits, and dead-letter handling.

#![deny(unsafe_code)]

pub mod backoff;
pub mod pool;

pub use backoff::retry_delay;
pub use pool::{WorkHandler, WorkerPool, WorkerPoolConfig};
