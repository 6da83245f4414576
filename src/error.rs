//! Engine Error Types
//!
//! A single error enum shared by every component. The Control API turns
//! these into `{success: false, message}` envelopes, so the `Display`
//! text of each variant is what callers ultimately read.

use thiserror::Error;

/// Errors produced by the workflow engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Malformed input or an illegal state transition attempt.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown instance, schedule, definition or history record.
    #[error("Not found: {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },

    /// A step attempt failed.
    #[error("Step '{step_id}' failed: {message}")]
    StepExecution { step_id: String, message: String },

    /// A schedule could not be evaluated or launched.
    #[error("Schedule '{schedule}' error: {message}")]
    Scheduler { schedule: String, message: String },

    /// A history write or read failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An instance was observed in an undefined state.
    #[error("Instance {instance_id} halted for inspection: {reason}")]
    Fatal { instance_id: String, reason: String },

    /// The actor driving an instance is no longer reachable.
    #[error("Instance {0} is not accepting commands")]
    ActorUnavailable(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns true for errors that represent a business-rule rejection
    /// rather than a system failure.
    pub fn is_business_failure(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound { .. })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
