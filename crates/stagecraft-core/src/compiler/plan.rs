//! Plan staging: Kahn layering with cycle detection, plus a lighter-weight
//! DAG validation built on `petgraph`.
//!
//! `compile` repeatedly extracts the set of steps whose dependencies are all
//! satisfied and emits them as stages. Steps that opt out of parallelism get
//! singleton stages even when siblings share their dependency level. The
//! function is pure: the same definition always yields the same plan.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use stagecraft_types::plan::{ExecutionPlan, PlanMetadata, Stage};
use stagecraft_types::workflow::{StepDefinition, WorkflowDefinition};

use super::definition::{CompileError, validate_definition};

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile a workflow definition into a staged execution plan.
///
/// The algorithm:
///
/// 1. Validate structure (unique IDs, known dependencies, no self-deps).
/// 2. Repeatedly collect the ready set: steps whose dependencies are all
///    satisfied by prior rounds. An empty ready set with steps remaining
///    means a cycle; the error names the unresolved step IDs.
/// 3. Within a round, `parallel_ok` steps share one stage; each serial step
///    becomes its own singleton stage (after the shared stage, in ID order).
///
/// Step IDs within a stage are sorted lexicographically, so compiling the
/// same definition twice yields identical plans.
pub fn compile(def: &WorkflowDefinition) -> Result<ExecutionPlan, CompileError> {
    validate_definition(def)?;

    let mut remaining: BTreeMap<&str, &StepDefinition> =
        def.steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut satisfied: HashSet<&str> = HashSet::new();
    let mut stages: Vec<Stage> = Vec::new();

    while !remaining.is_empty() {
        // BTreeMap iteration keeps the ready set in lexicographic order.
        let ready: Vec<&StepDefinition> = remaining
            .values()
            .filter(|s| s.depends_on.iter().all(|d| satisfied.contains(d.as_str())))
            .copied()
            .collect();

        if ready.is_empty() {
            let steps: Vec<String> = remaining.keys().map(|s| s.to_string()).collect();
            return Err(CompileError::CyclicDependency { steps });
        }

        let parallel: Vec<String> = ready
            .iter()
            .filter(|s| s.parallel_ok)
            .map(|s| s.id.clone())
            .collect();
        if !parallel.is_empty() {
            stages.push(Stage { steps: parallel });
        }
        for step in ready.iter().filter(|s| !s.parallel_ok) {
            stages.push(Stage {
                steps: vec![step.id.clone()],
            });
        }

        for step in &ready {
            satisfied.insert(step.id.as_str());
            remaining.remove(step.id.as_str());
        }
    }

    Ok(ExecutionPlan {
        workflow_id: def.id,
        workflow_name: def.name.clone(),
        stages,
    })
}

/// Summarize a definition's plan shape without exposing the plan itself.
pub fn metadata(def: &WorkflowDefinition) -> Result<PlanMetadata, CompileError> {
    Ok(compile(def)?.metadata())
}

// ---------------------------------------------------------------------------
// DAG validation (lighter weight, no staging)
// ---------------------------------------------------------------------------

/// Validate that the definition's steps form a DAG (no cycles, all
/// references exist), without computing stages.
pub fn validate_dag(def: &WorkflowDefinition) -> Result<(), CompileError> {
    let steps = &def.steps;
    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for step in steps {
        let to_idx = id_to_idx[step.id.as_str()];
        for dep in &step.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                CompileError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                }
            })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        CompileError::CyclicDependency {
            steps: vec![node_id.to_string()],
        }
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_types::workflow::StepDefinition;
    use uuid::Uuid;

    fn step(id: &str, depends_on: Vec<&str>) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            name: id.to_string(),
            executor: "echo".to_string(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            parallel_ok: true,
            timeout_secs: None,
            retry: None,
        }
    }

    fn serial_step(id: &str, depends_on: Vec<&str>) -> StepDefinition {
        StepDefinition {
            parallel_ok: false,
            ..step(id, depends_on)
        }
    }

    fn workflow(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "test-workflow".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            timeout_secs: None,
            steps,
            metadata: Default::default(),
        }
    }

    fn stage_ids(plan: &ExecutionPlan) -> Vec<Vec<&str>> {
        plan.stages
            .iter()
            .map(|s| s.steps.iter().map(|id| id.as_str()).collect())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    #[test]
    fn test_no_dependencies_single_stage() {
        let plan = compile(&workflow(vec![
            step("a", vec![]),
            step("b", vec![]),
            step("c", vec![]),
        ]))
        .unwrap();
        assert_eq!(stage_ids(&plan), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_linear_chain() {
        // a -> b -> c
        let plan = compile(&workflow(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["b"]),
        ]))
        .unwrap();
        assert_eq!(stage_ids(&plan), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_diamond() {
        // a -> {b, c} -> d
        let plan = compile(&workflow(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a"]),
            step("d", vec!["b", "c"]),
        ]))
        .unwrap();
        assert_eq!(
            stage_ids(&plan),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn test_serial_step_gets_singleton_stage() {
        // b and c share a dependency level, but c refuses parallelism
        let plan = compile(&workflow(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            serial_step("c", vec!["a"]),
            step("d", vec!["b", "c"]),
        ]))
        .unwrap();
        assert_eq!(
            stage_ids(&plan),
            vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]
        );
    }

    #[test]
    fn test_multiple_serial_steps_ordered_by_id() {
        let plan = compile(&workflow(vec![
            serial_step("zeta", vec![]),
            serial_step("alpha", vec![]),
        ]))
        .unwrap();
        assert_eq!(stage_ids(&plan), vec![vec!["alpha"], vec!["zeta"]]);
    }

    #[test]
    fn test_intra_stage_lexicographic_order() {
        let plan = compile(&workflow(vec![
            step("zebra", vec![]),
            step("apple", vec![]),
            step("mango", vec![]),
        ]))
        .unwrap();
        assert_eq!(stage_ids(&plan), vec![vec!["apple", "mango", "zebra"]]);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let def = workflow(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a"]),
            serial_step("d", vec!["b", "c"]),
        ]);
        let first = compile(&def).unwrap();
        let second = compile(&def).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_every_step_appears_exactly_once() {
        let def = workflow(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a"]),
            step("d", vec!["b", "c"]),
            serial_step("e", vec!["a"]),
        ]);
        let plan = compile(&def).unwrap();
        let mut seen: Vec<&str> = plan
            .stages
            .iter()
            .flat_map(|s| s.steps.iter().map(|id| id.as_str()))
            .collect();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_dependencies_always_in_earlier_stages() {
        let def = workflow(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a", "b"]),
            step("d", vec!["c"]),
            serial_step("e", vec!["b"]),
            step("f", vec!["d", "e"]),
        ]);
        let plan = compile(&def).unwrap();

        let mut stage_of: std::collections::HashMap<&str, usize> = Default::default();
        for (idx, s) in plan.stages.iter().enumerate() {
            for id in &s.steps {
                stage_of.insert(id.as_str(), idx);
            }
        }
        for s in &def.steps {
            for dep in &s.depends_on {
                assert!(
                    stage_of[dep.as_str()] < stage_of[s.id.as_str()],
                    "dependency '{dep}' of '{}' must be in a strictly earlier stage",
                    s.id
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cycles
    // -----------------------------------------------------------------------

    #[test]
    fn test_two_node_cycle_names_both_steps() {
        let err = compile(&workflow(vec![
            step("a", vec!["b"]),
            step("b", vec!["a"]),
        ]))
        .unwrap_err();
        match err {
            CompileError::CyclicDependency { steps } => {
                assert_eq!(steps, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_after_valid_prefix() {
        // a compiles; b/c/d form a cycle downstream of it
        let err = compile(&workflow(vec![
            step("a", vec![]),
            step("b", vec!["a", "d"]),
            step("c", vec!["b"]),
            step("d", vec!["c"]),
        ]))
        .unwrap_err();
        match err {
            CompileError::CyclicDependency { steps } => {
                assert_eq!(steps, vec!["b".to_string(), "c".to_string(), "d".to_string()]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = compile(&workflow(vec![step("a", vec!["ghost"])])).unwrap_err();
        assert!(matches!(err, CompileError::UnknownDependency { .. }));
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    #[test]
    fn test_metadata_matches_plan() {
        let def = workflow(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a"]),
            step("d", vec!["b", "c"]),
        ]);
        let meta = metadata(&def).unwrap();
        assert_eq!(meta.step_count, 4);
        assert_eq!(meta.stage_count, 3);
        assert_eq!(meta.max_parallelism, 2);
    }

    // -----------------------------------------------------------------------
    // DAG validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_validate_dag_valid() {
        let def = workflow(vec![step("a", vec![]), step("b", vec!["a"])]);
        assert!(validate_dag(&def).is_ok());
    }

    #[test]
    fn test_validate_dag_cycle() {
        let def = workflow(vec![
            step("a", vec!["c"]),
            step("b", vec!["a"]),
            step("c", vec!["b"]),
        ]);
        let err = validate_dag(&def).unwrap_err();
        assert!(matches!(err, CompileError::CyclicDependency { .. }));
    }

    #[test]
    fn test_validate_dag_unknown_dep() {
        let def = workflow(vec![step("a", vec!["missing"])]);
        let err = validate_dag(&def).unwrap_err();
        assert!(matches!(err, CompileError::UnknownDependency { .. }));
    }

    // -----------------------------------------------------------------------
    // Complex DAG: fork-join with multiple paths
    // -----------------------------------------------------------------------

    #[test]
    fn test_complex_fork_join() {
        //     a
        //    / \
        //   b   c
        //   |   |
        //   d   e
        //    \ /
        //     f
        let plan = compile(&workflow(vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a"]),
            step("d", vec!["b"]),
            step("e", vec!["c"]),
            step("f", vec!["d", "e"]),
        ]))
        .unwrap();
        assert_eq!(
            stage_ids(&plan),
            vec![vec!["a"], vec!["b", "c"], vec!["d", "e"], vec!["f"]]
        );
    }
}
