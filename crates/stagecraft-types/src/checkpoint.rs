//! Checkpoint types: durable, restorable snapshots of job state.
//!
//! Checkpoints are keyed by `(job_id, checkpoint_id)` and ordered by creation
//! time. IDs are UUIDv7 so creation order and ID order coincide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A named, restorable snapshot of job state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// UUIDv7 checkpoint ID (time-sortable, never reused).
    pub id: Uuid,
    /// The job this snapshot belongs to.
    pub job_id: Uuid,
    /// Caller-supplied label (e.g. "stage-2").
    pub label: String,
    /// Opaque state blob. The store never interprets it.
    pub state: Value,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Build a new checkpoint with a fresh UUIDv7 id.
    pub fn new(job_id: Uuid, label: &str, state: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            label: label.to_string(),
            state,
            created_at: Utc::now(),
        }
    }

    /// Strip the state payload for cheap enumeration.
    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            id: self.id,
            job_id: self.job_id,
            label: self.label.clone(),
            created_at: self.created_at,
        }
    }
}

/// Checkpoint metadata without the state payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub id: Uuid,
    pub job_id: Uuid,
    pub label: String,
    pub created_at: DateTime<Utc>,
}
