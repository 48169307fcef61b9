//! Checkpoint repository trait definition.
//!
//! Storage interface for job checkpoints, keyed by `(job_id, checkpoint_id)`.
//! Writes are durable-before-acknowledge; enumeration is per job so cleanup
//! stays bounded regardless of total system size.

use stagecraft_types::checkpoint::{Checkpoint, CheckpointMeta};
use stagecraft_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for checkpoint persistence.
pub trait CheckpointRepository: Send + Sync {
    /// Persist a checkpoint. Fails with `Conflict` if the ID already exists.
    fn insert(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Fetch a checkpoint with its state payload.
    fn get(
        &self,
        job_id: &Uuid,
        checkpoint_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// List checkpoint metadata for a job, ordered by creation time ascending.
    fn list(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<CheckpointMeta>, RepositoryError>> + Send;

    /// Fetch the most recently created checkpoint for a job.
    fn latest(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Delete one checkpoint. Returns `false` if nothing was deleted.
    fn delete(
        &self,
        job_id: &Uuid,
        checkpoint_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete every checkpoint belonging to a job. Returns the count removed.
    fn purge(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
