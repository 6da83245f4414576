//! Shell Command Executor
//!
//! Runs a step's `command` with bash. Handles:
//! - Placeholder substitution (`{instance}`, `{step}`, `{attempt}`)
//! - Passing the instance input and prior outputs as JSON env vars
//! - Capturing stdout as the step output
//!
//! Steps without a command complete immediately with a `null` output.

use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, error};
use serde_json::Value;
use tokio::process::Command;

use super::executor::{StepContext, StepError, StepExecutor};

/// Environment variables visible to every step command.
pub const ENV_INPUT: &str = "FLOWRUNNER_INPUT";
pub const ENV_OUTPUTS: &str = "FLOWRUNNER_OUTPUTS";
pub const ENV_PARAMS: &str = "FLOWRUNNER_PARAMS";
pub const ENV_INSTANCE_ID: &str = "FLOWRUNNER_INSTANCE_ID";
pub const ENV_STEP_ID: &str = "FLOWRUNNER_STEP_ID";
pub const ENV_ATTEMPT: &str = "FLOWRUNNER_ATTEMPT";

/// Maximum number of stderr characters copied into a step error.
const STDERR_TAIL: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    working_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl StepExecutor for CommandExecutor {
    async fn execute(&self, ctx: StepContext) -> Result<Value, StepError> {
        let Some(template) = ctx.step.command.as_deref() else {
            return Ok(Value::Null);
        };

        let command_text = resolve_placeholders(template, &ctx);
        debug!("Step '{}' command: {}", ctx.step.id, command_text);

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&command_text)
            .env(ENV_INPUT, ctx.input.to_string())
            .env(ENV_OUTPUTS, ctx.outputs.to_string())
            .env(ENV_PARAMS, ctx.step.params.to_string())
            .env(ENV_INSTANCE_ID, ctx.instance_id.to_string())
            .env(ENV_STEP_ID, &ctx.step.id)
            .env(ENV_ATTEMPT, ctx.attempt.to_string())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
            debug!("Executing in directory: {}", dir.display());
        }

        // A missing shell will not fix itself on retry
        let output = cmd
            .output()
            .await
            .map_err(|e| StepError::permanent(format!("failed to launch bash: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            debug!("Step '{}' completed successfully", ctx.step.id);
            return Ok(parse_output(&stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            "Step '{}' failed with exit code: {:?}",
            ctx.step.id,
            output.status.code()
        );
        if !stderr.trim().is_empty() {
            error!("stderr:\n{}", stderr);
        }
        if !stdout.trim().is_empty() {
            debug!("stdout:\n{}", stdout);
        }

        Err(StepError::retryable(format!(
            "exit code {}: {}",
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
            tail(stderr.trim(), STDERR_TAIL)
        )))
    }
}

fn resolve_placeholders(template: &str, ctx: &StepContext) -> String {
    template
        .replace("{instance}", &ctx.instance_id.to_string())
        .replace("{step}", &ctx.step.id)
        .replace("{attempt}", &ctx.attempt.to_string())
}

/// Stdout that parses as JSON is kept structured; anything else is kept
/// as a trimmed string. Empty output becomes `null`.
fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}
