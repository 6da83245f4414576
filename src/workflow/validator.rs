//! Definition Validation
//!
//! Checks a workflow definition before it is registered:
//! - Identity fields are present
//! - Step IDs are non-empty and unique
//! - Dependencies reference existing steps
//! - The dependency graph has no cycles (Kahn's algorithm)

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info};

use super::model::WorkflowDefinition;
use crate::error::{EngineError, Result};

/// Validation failures with user-facing messages.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionIssue {
    MissingIdentity(&'static str),
    EmptyWorkflow,
    EmptyStepId,
    DuplicateStepId(String),
    InvalidReference { step: String, reference: String },
    SelfDependency(String),
    CyclicDependency,
    ZeroParallelism,
}

impl std::fmt::Display for DefinitionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentity(field) => write!(f, "Definition has an empty {}", field),
            Self::EmptyWorkflow => write!(f, "Workflow has no steps"),
            Self::EmptyStepId => write!(f, "Step has empty or whitespace-only ID"),
            Self::DuplicateStepId(id) => write!(f, "Duplicate step ID: '{}'", id),
            Self::InvalidReference { step, reference } => {
                write!(f, "Step '{}' depends on unknown step '{}'", step, reference)
            }
            Self::SelfDependency(step) => write!(f, "Step '{}' depends on itself", step),
            Self::CyclicDependency => {
                write!(f, "Workflow contains cyclic dependencies (steps depend on each other in a loop)")
            }
            Self::ZeroParallelism => write!(f, "configuration.parallelism must be at least 1"),
        }
    }
}

/// Collects every issue in a definition without stopping at the first.
pub fn collect_issues(definition: &WorkflowDefinition) -> Vec<DefinitionIssue> {
    let mut issues = Vec::new();

    for (field, value) in [
        ("namespace", &definition.namespace),
        ("name", &definition.name),
        ("version", &definition.version),
    ] {
        if value.trim().is_empty() {
            issues.push(DefinitionIssue::MissingIdentity(field));
        }
    }

    if definition.configuration.parallelism == 0 {
        issues.push(DefinitionIssue::ZeroParallelism);
    }

    if definition.steps.is_empty() {
        issues.push(DefinitionIssue::EmptyWorkflow);
        return issues;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &definition.steps {
        if step.id.trim().is_empty() {
            issues.push(DefinitionIssue::EmptyStepId);
        } else if !seen.insert(step.id.as_str()) {
            issues.push(DefinitionIssue::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &definition.steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                issues.push(DefinitionIssue::SelfDependency(step.id.clone()));
            } else if !seen.contains(dep.as_str()) {
                issues.push(DefinitionIssue::InvalidReference {
                    step: step.id.clone(),
                    reference: dep.clone(),
                });
            }
        }
    }

    if issues.is_empty() && topological_order(definition).is_none() {
        issues.push(DefinitionIssue::CyclicDependency);
    }

    issues
}

/// Validates a definition, joining all issues into one error.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<()> {
    let issues = collect_issues(definition);

    if !issues.is_empty() {
        let messages: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
        return Err(EngineError::Validation(format!(
            "{}: {}",
            definition.reference(),
            messages.join("; ")
        )));
    }

    info!(
        "Definition {} validated: {} steps",
        definition.reference(),
        definition.steps.len()
    );
    Ok(())
}

/// Orders step IDs so that dependencies come before dependents.
///
/// Returns `None` if the graph contains a cycle. Unknown dependency IDs are
/// ignored here; [`collect_issues`] reports them separately.
pub fn topological_order(definition: &WorkflowDefinition) -> Option<Vec<String>> {
    let known: HashSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in &definition.steps {
        let deps = step
            .depends_on
            .iter()
            .filter(|d| known.contains(d.as_str()))
            .count();
        in_degree.insert(step.id.as_str(), deps);

        for dep in &step.depends_on {
            successors
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    // Seed in declaration order so the result is stable
    let mut queue: VecDeque<&str> = definition
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut order = Vec::with_capacity(definition.steps.len());

    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        for next in successors.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() != definition.steps.len() {
        return None;
    }

    debug!("Topological order for {}: {:?}", definition.reference(), order);
    Some(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepDefinition;

    fn definition(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("core", "Sample", "1.0.0");
        def.steps = steps;
        def
    }

    #[test]
    fn test_valid_definition() {
        let def = definition(vec![
            StepDefinition::new("a"),
            StepDefinition::new("b").depends_on("a"),
        ]);
        assert!(validate_definition(&def).is_ok());
    }

    #[test]
    fn test_empty_workflow() {
        let def = definition(vec![]);
        assert_eq!(collect_issues(&def), vec![DefinitionIssue::EmptyWorkflow]);
    }

    #[test]
    fn test_duplicate_step_ids() {
        let def = definition(vec![StepDefinition::new("a"), StepDefinition::new("a")]);
        let issues = collect_issues(&def);
        assert!(issues.contains(&DefinitionIssue::DuplicateStepId("a".to_string())));
    }

    #[test]
    fn test_unknown_reference() {
        let def = definition(vec![StepDefinition::new("a").depends_on("ghost")]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn test_self_dependency() {
        let def = definition(vec![StepDefinition::new("a").depends_on("a")]);
        assert!(collect_issues(&def).contains(&DefinitionIssue::SelfDependency("a".to_string())));
    }

    #[test]
    fn test_cycle_detected() {
        let def = definition(vec![
            StepDefinition::new("a").depends_on("c"),
            StepDefinition::new("b").depends_on("a"),
            StepDefinition::new("c").depends_on("b"),
        ]);
        assert_eq!(collect_issues(&def), vec![DefinitionIssue::CyclicDependency]);
        assert!(topological_order(&def).is_none());
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let def = definition(vec![
            StepDefinition::new("report").depends_on("align"),
            StepDefinition::new("align").depends_on("fetch"),
            StepDefinition::new("fetch"),
        ]);
        let order = topological_order(&def).unwrap();
        assert_eq!(order, vec!["fetch", "align", "report"]);
    }

    #[test]
    fn test_missing_identity_and_parallelism() {
        let mut def = definition(vec![StepDefinition::new("a")]);
        def.namespace = " ".to_string();
        def.configuration.parallelism = 0;
        let issues = collect_issues(&def);
        assert!(issues.contains(&DefinitionIssue::MissingIdentity("namespace")));
        assert!(issues.contains(&DefinitionIssue::ZeroParallelism));
    }
}
