//! SQLite checkpoint repository implementation.
//!
//! Checkpoints are namespaced per job (`job_id` column plus index) so the
//! store's cleanup and purge stay bounded regardless of total system size.
//! State blobs are stored as JSON text.

use chrono::{DateTime, Utc};
use sqlx::Row;
use stagecraft_core::repository::checkpoint::CheckpointRepository;
use stagecraft_types::checkpoint::{Checkpoint, CheckpointMeta};
use stagecraft_types::error::RepositoryError;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointRepository`.
pub struct SqliteCheckpointRepository {
    pool: DatabasePool,
}

impl SqliteCheckpointRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn checkpoint_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, RepositoryError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let job_id: String = row
        .try_get("job_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let label: String = row
        .try_get("label")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let state: String = row
        .try_get("state")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(Checkpoint {
        id: parse_uuid(&id)?,
        job_id: parse_uuid(&job_id)?,
        label,
        state: serde_json::from_str(&state)
            .map_err(|e| RepositoryError::Query(format!("invalid state JSON: {e}")))?,
        created_at: parse_datetime(&created_at)?,
    })
}

// ---------------------------------------------------------------------------
// CheckpointRepository impl
// ---------------------------------------------------------------------------

impl CheckpointRepository for SqliteCheckpointRepository {
    async fn insert(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let state_json = serde_json::to_string(&checkpoint.state)
            .map_err(|e| RepositoryError::Query(format!("serialize state: {e}")))?;

        sqlx::query(
            "INSERT INTO checkpoints (id, job_id, label, state, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.job_id.to_string())
        .bind(&checkpoint.label)
        .bind(state_json)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("checkpoint {} already exists", checkpoint.id))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn get(
        &self,
        job_id: &Uuid,
        checkpoint_id: &Uuid,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE job_id = ? AND id = ?")
            .bind(job_id.to_string())
            .bind(checkpoint_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.map(|r| checkpoint_from_row(&r)).transpose()
    }

    async fn list(&self, job_id: &Uuid) -> Result<Vec<CheckpointMeta>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, job_id, label, created_at FROM checkpoints WHERE job_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let job_id: String = row
                    .try_get("job_id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let label: String = row
                    .try_get("label")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let created_at: String = row
                    .try_get("created_at")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(CheckpointMeta {
                    id: parse_uuid(&id)?,
                    job_id: parse_uuid(&job_id)?,
                    label,
                    created_at: parse_datetime(&created_at)?,
                })
            })
            .collect()
    }

    async fn latest(&self, job_id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE job_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.map(|r| checkpoint_from_row(&r)).transpose()
    }

    async fn delete(&self, job_id: &Uuid, checkpoint_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE job_id = ? AND id = ?")
            .bind(job_id.to_string())
            .bind(checkpoint_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge(&self, job_id: &Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
