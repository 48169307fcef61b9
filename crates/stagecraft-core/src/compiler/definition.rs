//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and the canonical `WorkflowDefinition`,
//! validates structural constraints (unique IDs, valid dependencies, name
//! format), and provides load/save for workflow files on disk.

use std::collections::HashSet;
use std::path::Path;

use stagecraft_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while turning a definition into a plan.
#[derive(Debug, Error)]
pub enum CompileError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// A step references a dependency that does not exist in the definition.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// The dependency graph contains a cycle. `steps` names the unresolved
    /// step IDs, sorted.
    #[error("cyclic dependency among steps: {steps:?}")]
    CyclicDependency { steps: Vec<String> },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` and the DAG acyclicity check after
/// deserialization, so the returned value is guaranteed to compile.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, CompileError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| CompileError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    super::plan::validate_dag(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, CompileError> {
    serde_yaml_ng::to_string(def).map_err(|e| CompileError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters and hyphens
/// - At least one step exists
/// - All step IDs are unique
/// - No step depends on itself
/// - All `depends_on` references point to existing step IDs
/// - Timeout > 0 if set
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), CompileError> {
    if def.name.is_empty() {
        return Err(CompileError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !def.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(CompileError::Validation(format!(
            "workflow name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            def.name
        )));
    }

    if def.steps.is_empty() {
        return Err(CompileError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }

    // Unique step IDs
    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if step.id.is_empty() {
            return Err(CompileError::Validation(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(CompileError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    // depends_on references must be valid, and never self-referential
    for step in &def.steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                return Err(CompileError::CyclicDependency {
                    steps: vec![step.id.clone()],
                });
            }
            if !seen_ids.contains(dep.as_str()) {
                return Err(CompileError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Timeout > 0 if set
    if let Some(t) = def.timeout_secs {
        if t == 0 {
            return Err(CompileError::Validation(
                "timeout must be > 0".to_string(),
            ));
        }
    }
    for step in &def.steps {
        if step.timeout_secs == Some(0) {
            return Err(CompileError::Validation(format!(
                "step '{}' timeout must be > 0",
                step.id
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, CompileError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow definition as a YAML file.
pub fn save_workflow_file(def: &WorkflowDefinition, path: &Path) -> Result<(), CompileError> {
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
