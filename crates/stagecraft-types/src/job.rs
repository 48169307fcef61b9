//! Job execution types: the job record, its status state machine, and
//! per-step execution logs.
//!
//! A `Job` is one runtime instance of a workflow execution. Its status only
//! moves along the edges encoded in [`JobStatus::can_transition_to`]; the
//! engine persists the record on every transition so a restart can rediscover
//! non-terminal jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Job Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Retrying,
    /// A checkpoint or status write failed after a stage; the job aborts
    /// rather than proceed with unrecorded progress.
    PersistenceFailure,
    /// Storage-only terminal state applied by retention sweeps.
    Archived,
}

impl JobStatus {
    /// Whether this status ends execution (only `Archived` may follow).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Cancelled
                | JobStatus::PersistenceFailure
                | JobStatus::Archived
        )
    }

    /// Whether the given transition is a valid state-machine edge.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, PersistenceFailure)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Failed, Retrying)
                | (Retrying, Running)
                | (Retrying, Cancelled)
                | (Completed, Archived)
                | (Failed, Archived)
                | (Cancelled, Archived)
                | (PersistenceFailure, Archived)
        )
    }

    /// Snake-case name, matching the serde representation and the
    /// `job.<status>` event-type convention.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
            JobStatus::PersistenceFailure => "persistence_failure",
            JobStatus::Archived => "archived",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "retrying" => Ok(JobStatus::Retrying),
            "persistence_failure" => Ok(JobStatus::PersistenceFailure),
            "archived" => Ok(JobStatus::Archived),
            other => Err(format!("unknown job status: '{other}'")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Coarse progress counters for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Steps with a successful terminal status.
    pub completed_steps: u32,
    /// Total steps in the compiled plan.
    pub total_steps: u32,
    /// Index of the stage currently (or last) being executed.
    pub current_stage: u32,
}

/// Structured terminal error attached to a failed job.
///
/// Carries enough detail to diagnose without re-running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// ID of the step whose retries were exhausted.
    pub step_id: String,
    /// Number of attempts made before giving up.
    pub attempts: u32,
    /// The last error observed.
    pub message: String,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "step '{}' failed after {} attempt(s): {}",
            self.step_id, self.attempts, self.message
        )
    }
}

/// One runtime instance of a workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUIDv7 job ID.
    pub id: Uuid,
    /// ID of the workflow definition being executed.
    pub workflow_id: Uuid,
    /// Name of the workflow (denormalized for display).
    pub workflow_name: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Opaque caller-supplied input parameters.
    pub params: Value,
    /// Progress counters, updated as stages complete.
    pub progress: JobProgress,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job record last changed.
    pub updated_at: DateTime<Utc>,
    /// Number of whole-job retries performed so far.
    pub retry_count: u32,
    /// Structured error if the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl Job {
    /// Create a fresh `Pending` job for a workflow.
    pub fn new(workflow_id: Uuid, workflow_name: &str, params: Value, total_steps: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            workflow_name: workflow_name.to_string(),
            status: JobStatus::Pending,
            params,
            progress: JobProgress {
                completed_steps: 0,
                total_steps,
                current_stage: 0,
            },
            created_at: now,
            updated_at: now,
            retry_count: 0,
            failure: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Step Execution
// ---------------------------------------------------------------------------

/// Status of an individual step execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepExecutionStatus::Pending => "pending",
            StepExecutionStatus::Running => "running",
            StepExecutionStatus::Completed => "completed",
            StepExecutionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for StepExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepExecutionStatus::Pending),
            "running" => Ok(StepExecutionStatus::Running),
            "completed" => Ok(StepExecutionStatus::Completed),
            "failed" => Ok(StepExecutionStatus::Failed),
            other => Err(format!("unknown step status: '{other}'")),
        }
    }
}

/// Execution record for a single step attempt within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// UUIDv7 record ID.
    pub id: Uuid,
    /// Parent job ID.
    pub job_id: Uuid,
    /// Step ID matching `StepDefinition.id`.
    pub step_id: String,
    /// Current status of this attempt.
    pub status: StepExecutionStatus,
    /// Attempt number (1-based, increments on retry).
    pub attempt: u32,
    /// Opaque output produced by the step executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message if the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When this attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When this attempt finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    /// Create a `Running` record for a new attempt.
    pub fn started(job_id: Uuid, step_id: &str, attempt: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            step_id: step_id.to_string(),
            status: StepExecutionStatus::Running,
            attempt,
            output: None,
            error: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
