//! Job execution context: accumulated step outputs with size limits.
//!
//! `JobContext` is the mutable state that flows through a job run. It holds
//! the caller's input parameters and every completed step's output, and is
//! what gets snapshotted into a checkpoint after each stage.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stagecraft_types::workflow::StepDefinition;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single step output (1 MB). Larger outputs are replaced
/// with a truncation marker rather than ballooning checkpoints.
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// JobContext
// ---------------------------------------------------------------------------

/// Mutable execution context that tracks state across a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    /// The job this context belongs to.
    pub job_id: Uuid,
    /// Caller-supplied input parameters, forwarded to every step.
    pub params: Value,
    /// Step outputs keyed by step ID.
    pub step_outputs: HashMap<String, Value>,
}

impl JobContext {
    /// Create a fresh context for a job.
    pub fn new(job_id: Uuid, params: Value) -> Self {
        Self {
            job_id,
            params,
            step_outputs: HashMap::new(),
        }
    }

    /// Store the output of a completed step.
    ///
    /// Outputs over `MAX_STEP_OUTPUT_SIZE` are replaced with a marker noting
    /// the original size.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) {
        let size = output.to_string().len();
        if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step_id,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            self.step_outputs.insert(
                step_id.to_string(),
                json!({
                    "_truncated": true,
                    "_original_size": size,
                }),
            );
        } else {
            self.step_outputs.insert(step_id.to_string(), output);
        }
    }

    /// Get the output of a completed step.
    pub fn get_step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// Number of steps with recorded outputs.
    pub fn completed_count(&self) -> usize {
        self.step_outputs.len()
    }

    /// Build the opaque input forwarded to a step: the job parameters plus
    /// the outputs of the step's declared dependencies.
    pub fn step_input(&self, step: &StepDefinition) -> Value {
        let deps: serde_json::Map<String, Value> = step
            .depends_on
            .iter()
            .filter_map(|dep| {
                self.step_outputs
                    .get(dep)
                    .map(|out| (dep.clone(), out.clone()))
            })
            .collect();
        json!({
            "params": self.params,
            "deps": deps,
        })
    }
}

// ---------------------------------------------------------------------------
// StageSnapshot
// ---------------------------------------------------------------------------

/// What the engine checkpoints after each completed stage: the index of the
/// stage that just finished plus the full context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// Index of the last completed stage.
    pub stage: usize,
    /// Context as of the end of that stage.
    pub context: JobContext,
}

impl StageSnapshot {
    /// Serialize into the opaque checkpoint state blob.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Deserialize from a checkpoint state blob.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
