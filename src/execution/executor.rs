//! Step Executor Contract
//!
//! What a step actually does is outside the engine. Hosts plug their own
//! logic in by implementing [`StepExecutor`]; the engine only sees the
//! returned output value or a [`StepError`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::instance::InstanceId;
use crate::workflow::{DefinitionRef, StepDefinition};

/// Everything an executor gets to know about one attempt.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub instance_id: InstanceId,
    pub definition: DefinitionRef,
    pub step: StepDefinition,
    /// 1-based attempt number
    pub attempt: u32,
    /// Input payload the instance was started with
    pub input: Value,
    /// Outputs of steps that already completed, keyed by step id
    pub outputs: Value,
}

/// Failure reported by a step executor.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
    /// Permanent failures skip the remaining retries
    pub retryable: bool,
}

impl StepError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, ctx: StepContext) -> Result<Value, StepError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;

    /// Executor with scripted failures and an optional gate that holds
    /// every attempt until a permit is released.
    #[derive(Default)]
    pub struct ScriptedExecutor {
        gate: Option<Arc<Semaphore>>,
        fail_attempts: HashMap<String, u32>,
        permanent: bool,
        pub calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        pub fn instant() -> Self {
            Self::default()
        }

        pub fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        /// Fails the first `attempts` attempts of `step_id`.
        pub fn failing(mut self, step_id: &str, attempts: u32) -> Self {
            self.fail_attempts.insert(step_id.to_string(), attempts);
            self
        }

        pub fn permanently(mut self) -> Self {
            self.permanent = true;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(&self, ctx: StepContext) -> Result<Value, StepError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                match gate.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => return Err(StepError::permanent("gate closed")),
                }
            }

            match self.fail_attempts.get(&ctx.step.id) {
                Some(&limit) if ctx.attempt <= limit => {
                    let message = format!("attempt {} of {} failed", ctx.attempt, ctx.step.id);
                    if self.permanent {
                        Err(StepError::permanent(message))
                    } else {
                        Err(StepError::retryable(message))
                    }
                }
                _ => Ok(json!({ "step": ctx.step.id, "attempt": ctx.attempt })),
            }
        }
    }
}
