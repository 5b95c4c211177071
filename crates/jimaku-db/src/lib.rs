//! SQLite implementations of the jimaku persistence ports: the task
//! store (tasks + relation edges), the step cache, and the leased work
//! queue. One database file backs all three, shared by the HTTP tier
//! and every worker process.

#![deny(unsafe_code)]

pub mod setup;
pub mod step_cache;
pub mod task_repository;
pub mod work_queue;

pub use setup::setup_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;
pub use step_cache::SqliteStepCache;
pub use task_repository::SqliteTaskStore;
pub use work_queue::SqliteWorkQueue;
