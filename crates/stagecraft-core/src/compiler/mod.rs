//! Workflow compiler: definition parsing/validation and plan staging.
//!
//! - `definition` -- YAML parsing, structural validation, filesystem load/save
//! - `plan` -- staged plan compilation (Kahn layering) and DAG validation

pub mod definition;
pub mod plan;

pub use definition::{
    CompileError, load_workflow_file, parse_workflow_yaml, save_workflow_file,
    serialize_workflow_yaml, validate_definition,
};
pub use plan::{compile, metadata, validate_dag};
