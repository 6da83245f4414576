//! Workflow Definition Model
//!
//! Versioned workflow templates that instances are created from.
//!
//! # Example YAML Format
//!
//! ```yaml
//! namespace: core
//! name: Sample
//! version: 1.0.0
//! isActive: true
//! configuration:
//!   timeout: 3600
//!   maxRetries: 3
//!   parallelism: 2
//! steps:
//!   - id: fetch
//!     command: curl -sf https://example.org/data.json > data.json
//!   - id: report
//!     dependsOn: [fetch]
//!     optional: true
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Identity of a workflow definition: `(namespace, name, version)`.
///
/// The textual form is `namespace.name@version`. The namespace may contain
/// dots; the last dot before `@` separates it from the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefinitionRef {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl DefinitionRef {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Returns true if `namespace` and `name` match, ignoring version.
    pub fn same_workflow(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}

impl fmt::Display for DefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.namespace, self.name, self.version)
    }
}

impl FromStr for DefinitionRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            EngineError::validation(format!(
                "Invalid workflow reference '{}', expected namespace.name@version",
                s
            ))
        };

        let (qualified, version) = s.trim().split_once('@').ok_or_else(invalid)?;
        let (namespace, name) = qualified.rsplit_once('.').ok_or_else(invalid)?;

        if namespace.is_empty() || name.is_empty() || version.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(namespace, name, version))
    }
}

/// Execution settings shared by every instance of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Total wall-clock budget for one instance, in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Retries allowed per step after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default priority for new instances (higher runs first)
    #[serde(default)]
    pub priority: i32,

    /// Maximum number of sibling steps running at once
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Base delay for exponential retry backoff, in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_parallelism() -> usize {
    1
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            timeout: None,
            max_retries: default_max_retries(),
            priority: 0,
            parallelism: default_parallelism(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl Configuration {
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// A single step of the definition graph.
///
/// The engine treats steps as opaque: it only reads the id, the dependency
/// edges and the optional flag. `command` and `params` are handed to the
/// step executor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,

    /// IDs of steps that must settle before this step can run
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// A failed optional step does not fail the instance
    #[serde(default)]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl StepDefinition {
    /// Creates a step with no dependencies.
    ///
    /// # Example
    ///
    /// ```
    /// use flowrunner::workflow::StepDefinition;
    ///
    /// let step = StepDefinition::new("align")
    ///     .depends_on("fetch")
    ///     .with_command("echo aligned")
    ///     .optional();
    /// assert!(step.optional);
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            depends_on: Vec::new(),
            optional: false,
            command: None,
            params: Value::Null,
        }
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// A versioned workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub namespace: String,
    pub name: String,
    pub version: String,

    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Other workflows this one relies on (informational)
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub configuration: Configuration,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

fn default_active() -> bool {
    true
}

impl WorkflowDefinition {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            is_active: true,
            description: None,
            dependencies: Vec::new(),
            configuration: Configuration::default(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn reference(&self) -> DefinitionRef {
        DefinitionRef::new(&self.namespace, &self.name, &self.version)
    }

    pub fn get_step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps that have no dependencies.
    pub fn root_steps(&self) -> Vec<&StepDefinition> {
        self.steps.iter().filter(|s| s.depends_on.is_empty()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_definition_ref() {
        let r: DefinitionRef = "core.Sample@1.0.0".parse().unwrap();
        assert_eq!(r.namespace, "core");
        assert_eq!(r.name, "Sample");
        assert_eq!(r.version, "1.0.0");
        assert_eq!(r.to_string(), "core.Sample@1.0.0");
    }

    #[test]
    fn test_parse_definition_ref_dotted_namespace() {
        let r: DefinitionRef = "acme.billing.Invoice@2".parse().unwrap();
        assert_eq!(r.namespace, "acme.billing");
        assert_eq!(r.name, "Invoice");
    }

    #[test]
    fn test_parse_definition_ref_invalid() {
        assert!("Sample@1.0.0".parse::<DefinitionRef>().is_err());
        assert!("core.Sample".parse::<DefinitionRef>().is_err());
        assert!("core.@1".parse::<DefinitionRef>().is_err());
        assert!("core.Sample@".parse::<DefinitionRef>().is_err());
    }

    #[test]
    fn test_configuration_defaults() {
        let config = Configuration::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(1));
        assert!(config.timeout_duration().is_none());
    }

    #[test]
    fn test_definition_deserializes_with_defaults() {
        let yaml = r#"
namespace: core
name: Sample
version: 1.0.0
steps:
  - id: a
  - id: b
    dependsOn: [a]
    optional: true
"#;
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(def.is_active);
        assert_eq!(def.steps.len(), 2);
        assert!(def.get_step("b").unwrap().optional);
        assert_eq!(def.root_steps().len(), 1);
        assert_eq!(def.configuration.max_retries, 3);
    }

    #[test]
    fn test_step_builder() {
        let step = StepDefinition::new("  load  ")
            .depends_on("fetch")
            .with_command("echo hi");
        assert_eq!(step.id, "load");
        assert_eq!(step.depends_on, vec!["fetch".to_string()]);
        assert_eq!(step.command.as_deref(), Some("echo hi"));
        assert!(!step.optional);
    }
}
