//! Engine Configuration
//!
//! Settings are read from the `engine:` section of a YAML document, then
//! overridden by `FLOWRUNNER_*` environment variables. The same document
//! carries the definitions and schedules the CLI registers at startup.
//!
//! # Example YAML Format
//!
//! ```yaml
//! engine:
//!   tickSecs: 30
//!   historyDir: ./history
//!   maxParallelism: 4
//! definitionFiles:
//!   - sample.yaml
//! definitions:
//!   - namespace: core
//!     name: Inline
//!     version: 1.0.0
//!     steps:
//!       - id: only
//!         command: echo hi
//! schedules:
//!   - name: nightly
//!     cron: "0 2 * * *"
//!     workflowRef: core.Sample@1.0.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::execution::RetryPolicy;
use crate::scheduler::ScheduleConfig;
use crate::workflow::{load_definition, WorkflowDefinition};

pub const CONFIG_FILE_NAME: &str = "flowrunner.yaml";

pub const ENV_TICK_SECS: &str = "FLOWRUNNER_TICK_SECS";
pub const ENV_HISTORY_DIR: &str = "FLOWRUNNER_HISTORY_DIR";
pub const ENV_PERSISTENCE_RETRIES: &str = "FLOWRUNNER_PERSISTENCE_RETRIES";
pub const ENV_MAX_PARALLELISM: &str = "FLOWRUNNER_MAX_PARALLELISM";
pub const ENV_EVENT_CAPACITY: &str = "FLOWRUNNER_EVENT_CAPACITY";

/// Lazily-resolved default configuration file.
///
/// Looks next to the executable first, then in the working directory.
pub static DEFAULT_CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let candidate = exe_dir.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                info!("Using configuration next to executable: {}", candidate.display());
                return candidate;
            }
        }
    }

    let cwd_path = PathBuf::from(CONFIG_FILE_NAME);
    debug!("Using working directory configuration: {}", cwd_path.display());
    cwd_path
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Scheduler evaluation interval in seconds
    pub tick_secs: u64,
    /// Directory for JSON history records; in-memory history if absent
    pub history_dir: Option<PathBuf>,
    /// History write retries before an instance is flagged
    pub persistence_retries: u32,
    pub persistence_base_delay_ms: u64,
    /// Backoff shape for step retries
    pub retry: RetryPolicy,
    /// Host cap on concurrent attempts per instance
    pub max_parallelism: usize,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            history_dir: None,
            persistence_retries: 3,
            persistence_base_delay_ms: 200,
            retry: RetryPolicy::default(),
            max_parallelism: num_cpus::get(),
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn persistence_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.persistence_retries,
            base_delay: Duration::from_millis(self.persistence_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_secs == 0 {
            return Err(EngineError::validation("tickSecs must be at least 1"));
        }
        if self.max_parallelism == 0 {
            return Err(EngineError::validation("maxParallelism must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::validation("eventCapacity must be at least 1"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(EngineError::validation("retry.multiplier must be at least 1.0"));
        }
        Ok(())
    }

    /// Applies `FLOWRUNNER_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TICK_SECS) {
            self.tick_secs = parse_env(ENV_TICK_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_HISTORY_DIR) {
            self.history_dir = (!value.trim().is_empty()).then(|| PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_PERSISTENCE_RETRIES) {
            self.persistence_retries = parse_env(ENV_PERSISTENCE_RETRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_PARALLELISM) {
            self.max_parallelism = parse_env(ENV_MAX_PARALLELISM, &value)?;
        }
        if let Some(value) = lookup(ENV_EVENT_CAPACITY) {
            self.event_capacity = parse_env(ENV_EVENT_CAPACITY, &value)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::validation(format!("{} has an invalid value '{}'", key, value)))
}

/// Everything the CLI reads from its configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineDocument {
    pub engine: EngineConfig,
    /// Definition files, relative to the document
    pub definition_files: Vec<PathBuf>,
    pub definitions: Vec<WorkflowDefinition>,
    pub schedules: Vec<ScheduleConfig>,
}

impl EngineDocument {
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            EngineError::validation(format!("Failed to parse configuration YAML: {}", e))
        })
    }

    /// Loads a document, resolves its definition files and applies
    /// environment overrides to the engine section.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::validation(format!(
                "Failed to read configuration '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut document = Self::parse(&content)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for file in &document.definition_files {
            let definition = load_definition(base.join(file))?;
            document.definitions.push(definition);
        }

        document.engine.apply_env_overrides()?;
        document.engine.validate()?;

        info!(
            "Configuration loaded: {} definitions, {} schedules",
            document.definitions.len(),
            document.schedules.len()
        );
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick(), Duration::from_secs(60));
        assert!(config.history_dir.is_none());
        assert!(config.max_parallelism >= 1);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let document = EngineDocument::parse("engine:\n  tickSecs: 5\n").unwrap();
        assert_eq!(document.engine.tick_secs, 5);
        assert_eq!(document.engine.persistence_retries, 3);
        assert!(document.definitions.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_TICK_SECS, "15"),
            (ENV_HISTORY_DIR, "/var/lib/flowrunner"),
            (ENV_MAX_PARALLELISM, "2"),
        ]);
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.tick_secs, 15);
        assert_eq!(config.history_dir, Some(PathBuf::from("/var/lib/flowrunner")));
        assert_eq!(config.max_parallelism, 2);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_TICK_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_TICK_SECS));
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let config = EngineConfig {
            tick_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_document_with_definition_files() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("sample.yaml"),
            "namespace: core\nname: Sample\nversion: 1.0.0\nsteps:\n  - id: fetch\n",
        )
        .unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &config_path,
            r#"
definitionFiles: [sample.yaml]
schedules:
  - name: nightly
    cron: "0 2 * * *"
    workflowRef: core.Sample@1.0.0
"#,
        )
        .unwrap();

        let document = EngineDocument::load(&config_path).unwrap();
        assert_eq!(document.definitions.len(), 1);
        assert_eq!(document.definitions[0].name, "Sample");
        assert_eq!(document.schedules[0].name, "nightly");
    }
}
