//! SQLite persistence for jobs, step logs, and checkpoints.

pub mod checkpoint;
pub mod job;
pub mod pool;

pub use checkpoint::SqliteCheckpointRepository;
pub use job::SqliteJobRepository;
pub use pool::DatabasePool;
