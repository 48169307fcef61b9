//! Workflow domain types for Stagecraft.
//!
//! Defines the canonical representation for workflows: a named, versioned
//! definition holding an ordered set of step declarations that form a
//! dependency DAG. YAML files and programmatic construction both converge
//! on `WorkflowDefinition`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
///
/// It is the single source of truth for a workflow's shape; the compiler
/// turns it into an [`crate::plan::ExecutionPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on first registration.
    pub id: Uuid,
    /// Human-readable workflow name. Unique within the engine catalog.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic version string (e.g. "1.0.0").
    pub version: String,
    /// Per-workflow timeout in seconds (overrides global default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Ordered list of step definitions forming the workflow DAG.
    pub steps: Vec<StepDefinition>,
    /// Extensible metadata (for custom integrations).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowDefinition {
    /// Look up a step by its ID.
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// User-defined step ID (e.g. "gather-sources"). Unique within a workflow.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Reference into the step-executor registry. The engine resolves this
    /// string once per job and never interprets it further.
    pub executor: String,
    /// Step IDs this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Whether this step may share a stage with siblings at the same
    /// dependency level. `false` forces a singleton stage.
    #[serde(default = "default_parallel_ok")]
    pub parallel_ok: bool,
    /// Step-level timeout in seconds (default 300).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry configuration for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

fn default_parallel_ok() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry configuration for a workflow step.
///
/// Backoff between attempts is exponential (`base * 2^n`, capped), with the
/// base and cap owned by the engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (default 3). The first execution counts
    /// as attempt 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
