//! Workflow Definition Files
//!
//! Loads and saves single workflow definitions as YAML. Loaded definitions
//! are validated before they are returned.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::WorkflowDefinition;
use super::validator::validate_definition;
use crate::error::{EngineError, Result};

/// Parses and validates a definition from YAML text.
pub fn parse_definition(yaml: &str) -> Result<WorkflowDefinition> {
    let definition: WorkflowDefinition = serde_yaml::from_str(yaml).map_err(|e| {
        EngineError::validation(format!(
            "Failed to parse workflow YAML: {}. Check the file format.",
            e
        ))
    })?;

    validate_definition(&definition)?;
    Ok(definition)
}

/// Loads a definition from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::workflow::parser::load_definition;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_definition("sample.yaml")?;
///     println!("Loaded {} with {} steps", definition.reference(), definition.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_definition(path: impl AsRef<Path>) -> Result<WorkflowDefinition> {
    let path = path.as_ref();
    info!("Loading workflow definition from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        EngineError::validation(format!(
            "Failed to read workflow file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let definition = parse_definition(&yaml_content)?;
    info!(
        "Parsed {} with {} steps",
        definition.reference(),
        definition.steps.len()
    );
    Ok(definition)
}

pub fn save_definition(definition: &WorkflowDefinition, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let yaml_content = serde_yaml::to_string(definition)
        .map_err(|e| EngineError::validation(format!("Failed to serialize workflow: {}", e)))?;
    fs::write(path, yaml_content)?;
    info!("Workflow definition saved to: {}", path.display());
    Ok(())
}
