//! Schedule Records
//!
//! A schedule launches one workflow definition on a cron timetable and
//! keeps counters about how that went.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::instance::InstanceId;
use crate::workflow::DefinitionRef;

pub type ScheduleId = Uuid;

/// What to do when a schedule is due while its previous run is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    #[default]
    Skip,
    Allow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSchedule {
    pub id: ScheduleId,
    pub name: String,
    pub cron: String,
    pub timezone: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub missed_count: u64,
    pub is_running: bool,
    pub overlap: OverlapPolicy,
    #[serde(with = "reference_text")]
    pub workflow_ref: DefinitionRef,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkflowSchedule {
    pub fn from_config(config: ScheduleConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: config.name,
            cron: config.cron,
            timezone: config.timezone,
            enabled: config.enabled,
            next_run: None,
            last_run: None,
            run_count: 0,
            error_count: 0,
            missed_count: 0,
            is_running: false,
            overlap: config.overlap,
            workflow_ref: config.workflow_ref,
            input: config.input,
            last_instance_id: None,
            last_error: None,
        }
    }
}

/// Parameters for creating a schedule.
///
/// ```yaml
/// name: nightly-sample
/// cron: "0 2 * * *"
/// timezone: "+01:00"
/// workflowRef: core.Sample@1.0.0
/// input: { foo: 1 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub name: String,
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub overlap: OverlapPolicy,
    #[serde(with = "reference_text")]
    pub workflow_ref: DefinitionRef,
    #[serde(default)]
    pub input: Value,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

impl ScheduleConfig {
    pub fn new(name: impl Into<String>, cron: impl Into<String>, workflow_ref: DefinitionRef) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            timezone: default_timezone(),
            enabled: true,
            overlap: OverlapPolicy::default(),
            workflow_ref,
            input: Value::Null,
        }
    }
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub overlap: Option<OverlapPolicy>,
    #[serde(default)]
    pub input: Option<Value>,
}

impl SchedulePatch {
    pub fn apply(&self, schedule: &mut WorkflowSchedule) {
        if let Some(name) = &self.name {
            schedule.name = name.clone();
        }
        if let Some(cron) = &self.cron {
            schedule.cron = cron.clone();
        }
        if let Some(timezone) = &self.timezone {
            schedule.timezone = timezone.clone();
        }
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(overlap) = self.overlap {
            schedule.overlap = overlap;
        }
        if let Some(input) = &self.input {
            schedule.input = input.clone();
        }
    }
}

/// Serializes a [`DefinitionRef`] as `namespace.name@version`.
mod reference_text {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::workflow::DefinitionRef;

    pub fn serialize<S: Serializer>(reference: &DefinitionRef, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(reference)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DefinitionRef, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(D::Error::custom)
    }
}
