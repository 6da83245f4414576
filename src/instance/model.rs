//! Instance Data Model
//!
//! Runtime records for workflow instances and their execution pointers.
//! These types are written only by the actor that owns the instance; every
//! other component sees cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::status::{InstanceStatus, PointerStatus};
use crate::workflow::{DefinitionRef, WorkflowDefinition};

pub type InstanceId = Uuid;

/// Error surfaced on an instance that ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceError {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl InstanceError {
    pub const STEP_FAILED: &'static str = "STEP_FAILED";
    pub const TIMEOUT: &'static str = "TIMEOUT";

    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.to_string(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Reason an instance needs an operator to look at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Attention {
    /// The terminal snapshot could not be written to history
    PersistenceFailed { message: String },
    /// The instance was observed in an undefined state and was halted
    Inspection { reason: String },
}

/// Tracking record for one attempt of a step.
///
/// A failed attempt keeps its own timings and error; the retry is a new
/// pointer for the same step whose `retry_count` is the number of attempts
/// made before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPointer {
    pub id: Uuid,
    pub step_id: String,
    pub status: PointerStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between start and end of this attempt
    pub duration: Option<i64>,
    pub retry_count: u32,
    pub active: bool,
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Earliest time the next attempt may be dispatched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl ExecutionPointer {
    pub fn new(step_id: impl Into<String>, optional: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_id: step_id.into(),
            status: PointerStatus::Pending,
            start_time: None,
            end_time: None,
            duration: None,
            retry_count: 0,
            active: false,
            optional,
            error: None,
            next_attempt_at: None,
        }
    }

    /// A pointer counts toward progress once it can no longer block the
    /// instance: completed, or failed on an optional step.
    pub fn is_settled(&self) -> bool {
        match self.status {
            PointerStatus::Completed => true,
            PointerStatus::Failed => self.optional,
            _ => false,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = PointerStatus::Running;
        self.active = true;
        self.start_time = Some(now);
        self.end_time = None;
        self.duration = None;
        self.next_attempt_at = None;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.finish(PointerStatus::Completed, now);
        self.error = None;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.finish(PointerStatus::Failed, now);
        self.error = Some(error.into());
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.finish(PointerStatus::Cancelled, now);
    }

    /// Creates the pointer for the attempt after this one.
    pub fn next_attempt(&self, next_attempt_at: DateTime<Utc>) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            next_attempt_at: Some(next_attempt_at),
            ..Self::new(self.step_id.clone(), self.optional)
        }
    }

    /// Returns an in-flight attempt to `PENDING` without counting it as a retry.
    pub fn interrupt(&mut self) {
        if self.status == PointerStatus::Running {
            self.status = PointerStatus::Pending;
            self.active = false;
            self.start_time = None;
        }
    }

    fn finish(&mut self, status: PointerStatus, now: DateTime<Utc>) {
        self.status = status;
        self.active = false;
        self.end_time = Some(now);
        self.duration = self.start_time.map(|s| (now - s).num_milliseconds());
        self.next_attempt_at = None;
    }
}

/// One execution run of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub workflow_name: String,
    pub namespace: String,
    pub version: String,
    pub status: InstanceStatus,
    /// Percentage of settled pointers, 0..=100
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between `start_time` and `end_time`
    pub duration: Option<i64>,
    pub created_by: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: i32,
    /// Wall-clock budget in seconds
    pub timeout: Option<u64>,
    #[serde(default)]
    pub input: Value,
    /// Step outputs keyed by step id
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InstanceError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention: Option<Attention>,
    pub pointers: Vec<ExecutionPointer>,
}

/// Parameters accepted by `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Overrides the definition's timeout, in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Uuid>,
}

impl StartRequest {
    pub fn with_data(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

impl WorkflowInstance {
    /// Creates a `PENDING` instance with one pointer per definition step.
    pub fn new(definition: &WorkflowDefinition, request: StartRequest) -> Self {
        let pointers = definition
            .steps
            .iter()
            .map(|step| ExecutionPointer::new(&step.id, step.optional))
            .collect();

        Self {
            id: Uuid::new_v4(),
            workflow_name: definition.name.clone(),
            namespace: definition.namespace.clone(),
            version: definition.version.clone(),
            status: InstanceStatus::Pending,
            progress: 0,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            created_by: request.created_by.unwrap_or_else(|| "system".to_string()),
            tags: request.tags,
            priority: request.priority.unwrap_or(definition.configuration.priority),
            timeout: request.timeout.or(definition.configuration.timeout),
            input: request.data,
            output: Value::Object(Default::default()),
            schedule_id: request.schedule_id,
            error: None,
            attention: None,
            pointers,
        }
    }

    pub fn definition_ref(&self) -> DefinitionRef {
        DefinitionRef::new(&self.namespace, &self.workflow_name, &self.version)
    }

    /// Latest attempt of a step.
    pub fn pointer(&self, step_id: &str) -> Option<&ExecutionPointer> {
        self.pointers.iter().rev().find(|p| p.step_id == step_id)
    }

    pub fn pointer_mut(&mut self, step_id: &str) -> Option<&mut ExecutionPointer> {
        self.pointers.iter_mut().rev().find(|p| p.step_id == step_id)
    }

    /// Every attempt of a step, oldest first.
    pub fn attempts<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a ExecutionPointer> + 'a {
        self.pointers.iter().filter(move |p| p.step_id == step_id)
    }

    /// The latest attempt of each step, in step order.
    pub fn current_pointers(&self) -> impl Iterator<Item = &ExecutionPointer> + '_ {
        self.pointers.iter().enumerate().filter_map(move |(i, p)| {
            let superseded = self.pointers[i + 1..].iter().any(|q| q.step_id == p.step_id);
            (!superseded).then_some(p)
        })
    }

    pub fn settled_count(&self) -> usize {
        self.current_pointers().filter(|p| p.is_settled()).count()
    }

    /// Recomputes `progress` from the latest attempt of each step.
    pub fn recompute_progress(&mut self) {
        let total = self.current_pointers().count();
        self.progress = if total == 0 {
            0
        } else {
            (self.settled_count() * 100 / total) as u8
        };
    }

    /// Stamps `end_time` and `duration`.
    pub fn close(&mut self, now: DateTime<Utc>) {
        self.end_time = Some(now);
        self.duration = Some((now - self.start_time).num_milliseconds());
    }

    /// Records a step's output under its id.
    pub fn record_output(&mut self, step_id: &str, value: Value) {
        if !self.output.is_object() {
            self.output = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.output {
            map.insert(step_id.to_string(), value);
        }
    }
}
