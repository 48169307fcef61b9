//! Checkpoint store: durable named snapshots of job state.
//!
//! Wraps a `CheckpointRepository` to provide the save/list/restore/delete/
//! cleanup contract. Writes to the same job are serialized through a per-job
//! async lock; unrelated jobs never contend, and reads take no lock at all.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use stagecraft_types::checkpoint::{Checkpoint, CheckpointMeta};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repository::checkpoint::CheckpointRepository;

// ---------------------------------------------------------------------------
// Retention bounds
// ---------------------------------------------------------------------------

/// Smallest accepted `keep_last_n` for cleanup.
pub const MIN_RETENTION: usize = 1;

/// Largest accepted `keep_last_n` for cleanup.
pub const MAX_RETENTION: usize = 100;

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Durable checkpoint store with per-job write serialization.
///
/// Generic over `R: CheckpointRepository` so it works with any storage
/// backend (SQLite, in-memory mock, etc.). Checkpoint IDs are UUIDv7 --
/// generated fresh on every save, never overwriting an existing snapshot.
pub struct CheckpointStore<R: CheckpointRepository> {
    repo: R,
    /// Per-job write locks, created lazily.
    write_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<R: CheckpointRepository> CheckpointStore<R> {
    /// Create a new store backed by the given repository.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            write_locks: DashMap::new(),
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    fn lock_for(&self, job_id: Uuid) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(job_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write a snapshot durably and return its ID.
    pub async fn save(
        &self,
        job_id: Uuid,
        label: &str,
        state: Value,
    ) -> Result<Uuid, CheckpointError> {
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;

        let checkpoint = Checkpoint::new(job_id, label, state);
        self.repo
            .insert(&checkpoint)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            job_id = %job_id,
            checkpoint_id = %checkpoint.id,
            label,
            "saved checkpoint"
        );

        Ok(checkpoint.id)
    }

    /// List checkpoint metadata for a job, oldest first. No state payloads.
    pub async fn list(&self, job_id: Uuid) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        self.repo
            .list(&job_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Fetch a snapshot's state.
    pub async fn restore(
        &self,
        job_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<Value, CheckpointError> {
        let checkpoint = self
            .repo
            .get(&job_id, &checkpoint_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::CheckpointNotFound {
                job_id,
                checkpoint_id,
            })?;
        Ok(checkpoint.state)
    }

    /// Fetch the most recently created checkpoint for a job, if any.
    pub async fn latest(&self, job_id: Uuid) -> Result<Option<Checkpoint>, CheckpointError> {
        self.repo
            .latest(&job_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Delete one snapshot. Idempotent: returns `false` if nothing existed.
    pub async fn delete(
        &self,
        job_id: Uuid,
        checkpoint_id: Uuid,
    ) -> Result<bool, CheckpointError> {
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;

        self.repo
            .delete(&job_id, &checkpoint_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Delete all but the `keep_last_n` most recently created checkpoints.
    ///
    /// `keep_last_n` must be within 1..=100. Returns the number deleted;
    /// a no-op (0) when the job has no more than `keep_last_n` checkpoints.
    pub async fn cleanup(
        &self,
        job_id: Uuid,
        keep_last_n: usize,
    ) -> Result<u64, CheckpointError> {
        if !(MIN_RETENTION..=MAX_RETENTION).contains(&keep_last_n) {
            return Err(CheckpointError::InvalidRetentionCount(keep_last_n));
        }

        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;

        let metas = self
            .repo
            .list(&job_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        if metas.len() <= keep_last_n {
            return Ok(0);
        }

        let excess = metas.len() - keep_last_n;
        let mut deleted = 0u64;
        for meta in metas.into_iter().take(excess) {
            if self
                .repo
                .delete(&job_id, &meta.id)
                .await
                .map_err(|e| CheckpointError::Repository(e.to_string()))?
            {
                deleted += 1;
            }
        }

        tracing::debug!(job_id = %job_id, deleted, keep_last_n, "pruned checkpoints");
        Ok(deleted)
    }

    /// Remove every checkpoint for a job (job purge/archival).
    pub async fn purge(&self, job_id: Uuid) -> Result<u64, CheckpointError> {
        let lock = self.lock_for(job_id);
        let removed = {
            let _guard = lock.lock().await;
            self.repo
                .purge(&job_id)
                .await
                .map_err(|e| CheckpointError::Repository(e.to_string()))?
        };
        self.write_locks.remove(&job_id);
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// No such checkpoint for this job.
    #[error("checkpoint {checkpoint_id} not found for job {job_id}")]
    CheckpointNotFound { job_id: Uuid, checkpoint_id: Uuid },

    /// Cleanup retention count outside the accepted 1-100 range.
    #[error("retention count {0} out of range (1-100)")]
    InvalidRetentionCount(usize),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
