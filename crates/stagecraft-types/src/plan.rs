//! Execution plan types produced by the workflow compiler.
//!
//! An `ExecutionPlan` is the immutable, stage-ordered, cycle-free artifact
//! derived from a `WorkflowDefinition`. Stages execute strictly in order;
//! steps within a stage may run concurrently.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// A compiled execution plan: an ordered sequence of stages.
///
/// Invariant: the stage sequence is a valid topological order of the source
/// definition's dependency graph, and the union of all stages is the full
/// step set, each step exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// ID of the workflow definition this plan was compiled from.
    pub workflow_id: Uuid,
    /// Name of the workflow (denormalized for display and logging).
    pub workflow_name: String,
    /// Ordered stages. Index 0 executes first.
    pub stages: Vec<Stage>,
}

/// A set of step IDs eligible to run concurrently.
///
/// Step IDs are sorted lexicographically for deterministic plan output;
/// execution completion order within a stage is not defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub steps: Vec<String>,
}

impl ExecutionPlan {
    /// Total number of steps across all stages.
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }

    /// Summarize the plan for introspection.
    pub fn metadata(&self) -> PlanMetadata {
        PlanMetadata {
            step_count: self.step_count(),
            stage_count: self.stages.len(),
            max_parallelism: self
                .stages
                .iter()
                .map(|s| s.steps.len())
                .max()
                .unwrap_or(0),
        }
    }
}

// ---------------------------------------------------------------------------
// PlanMetadata
// ---------------------------------------------------------------------------

/// Shape summary of a compiled plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Total number of steps in the plan.
    pub step_count: usize,
    /// Number of stages.
    pub stage_count: usize,
    /// Size of the widest stage.
    pub max_parallelism: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
