//! Event types for the Stagecraft event bus.
//!
//! `EngineEvent` is the unified event type broadcast during orchestration.
//! Events are wrapped in an `EventEnvelope` carrying the derived event type
//! string, correlation ID, and timestamp. All variants are Clone + Send +
//! Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobStatus;

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// Events emitted during job and mesh execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A job moved to a new lifecycle status.
    JobStatusChanged {
        job_id: Uuid,
        workflow_name: String,
        status: JobStatus,
    },

    /// A step attempt has started executing.
    StepStarted {
        job_id: Uuid,
        step_id: String,
        attempt: u32,
    },

    /// A step completed successfully.
    StepCompleted {
        job_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },

    /// A step attempt failed.
    StepFailed {
        job_id: Uuid,
        step_id: String,
        error: String,
        will_retry: bool,
    },

    /// A checkpoint was written for a job.
    CheckpointSaved {
        job_id: Uuid,
        checkpoint_id: Uuid,
        label: String,
    },

    /// A mesh request was routed to an agent.
    MeshRouted {
        request_id: Uuid,
        capability: String,
        agent_id: String,
        hop_count: u32,
    },

    /// A mesh request was rejected before dispatch.
    MeshRejected {
        request_id: Uuid,
        capability: String,
        reason: String,
    },
}

impl EngineEvent {
    /// Dotted event-type string used for subscriber filtering
    /// (e.g. "job.running", "step.failed", "mesh.routed").
    pub fn event_type(&self) -> String {
        match self {
            EngineEvent::JobStatusChanged { status, .. } => format!("job.{}", status.as_str()),
            EngineEvent::StepStarted { .. } => "step.started".to_string(),
            EngineEvent::StepCompleted { .. } => "step.completed".to_string(),
            EngineEvent::StepFailed { .. } => "step.failed".to_string(),
            EngineEvent::CheckpointSaved { .. } => "checkpoint.saved".to_string(),
            EngineEvent::MeshRouted { .. } => "mesh.routed".to_string(),
            EngineEvent::MeshRejected { .. } => "mesh.rejected".to_string(),
        }
    }

    /// The ID that ties this event to its originating request: the job ID
    /// for engine events, the mesh request ID for routing events.
    pub fn correlation_id(&self) -> Uuid {
        match self {
            EngineEvent::JobStatusChanged { job_id, .. }
            | EngineEvent::StepStarted { job_id, .. }
            | EngineEvent::StepCompleted { job_id, .. }
            | EngineEvent::StepFailed { job_id, .. }
            | EngineEvent::CheckpointSaved { job_id, .. } => *job_id,
            EngineEvent::MeshRouted { request_id, .. }
            | EngineEvent::MeshRejected { request_id, .. } => *request_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// What subscribers actually receive: the event plus routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Dotted event type (see [`EngineEvent::event_type`]).
    pub event_type: String,
    /// Correlation ID propagated from the originating request.
    pub correlation_id: Uuid,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub event: EngineEvent,
}

impl EventEnvelope {
    /// Wrap an event, deriving its type string and correlation ID.
    pub fn wrap(event: EngineEvent) -> Self {
        Self {
            event_type: event.event_type(),
            correlation_id: event.correlation_id(),
            timestamp: Utc::now(),
            event,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
