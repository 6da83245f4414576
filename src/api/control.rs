//! Control API
//!
//! Query/command façade consumed by administration surfaces. Every
//! method is total: it answers with an [`ApiResponse`] envelope and
//! never returns `Err`. Mutating lifecycle transitions always go through
//! the [`LifecycleController`].

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use super::boundary::InstanceQuery;
use super::envelope::ApiResponse;
use crate::error::EngineError;
use crate::execution::{BatchItem, BatchOutcome, Control, LifecycleController};
use crate::history::{HistoryRecord, HistoryStore};
use crate::instance::{InstanceId, StartRequest, WorkflowInstance};
use crate::monitoring::InstanceTimeline;
use crate::pagination::{PageInfo, Pagination};
use crate::scheduler::{ScheduleConfig, ScheduleId, SchedulePatch, Scheduler, WorkflowSchedule};
use crate::workflow::{DefinitionRef, WorkflowDefinition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceList {
    pub instances: Vec<WorkflowInstance>,
    pub pagination: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryList {
    pub instances: Vec<HistoryRecord>,
    pub pagination: PageInfo,
}

/// One `namespace.name` pair in an activation selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSelection {
    pub namespace: String,
    pub name: String,
}

impl WorkflowSelection {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub namespace: String,
    pub name: String,
    pub success: bool,
    pub message: String,
}

pub struct ControlApi {
    lifecycle: Arc<LifecycleController>,
    scheduler: Arc<Scheduler>,
}

impl ControlApi {
    pub fn new(lifecycle: Arc<LifecycleController>, scheduler: Arc<Scheduler>) -> Self {
        Self { lifecycle, scheduler }
    }

    fn history(&self) -> &dyn HistoryStore {
        self.lifecycle.history().as_ref()
    }

    // ---- Queries ----

    pub fn list_instances(&self, query: InstanceQuery, pagination: Pagination) -> ApiResponse<InstanceList> {
        let result = query.into_filter().map(|filter| {
            let page = self.lifecycle.store().list(&filter, &pagination);
            InstanceList {
                instances: page.items,
                pagination: page.pagination,
            }
        });
        ApiResponse::from_result(result, |list| {
            format!("{} of {} instances", list.instances.len(), list.pagination.total)
        })
    }

    /// Looks in the active store first, then in history.
    pub async fn get_instance(&self, id: &InstanceId) -> ApiResponse<WorkflowInstance> {
        if let Some(instance) = self.lifecycle.store().get(id) {
            return ApiResponse::ok(format!("Instance {} is {}", id, instance.status), instance);
        }
        let result = match self.history().get(id).await {
            Ok(Some(record)) => Ok(record.instance),
            Ok(None) => Err(EngineError::not_found("instance", id)),
            Err(e) => Err(e),
        };
        ApiResponse::from_result(result, |i| format!("Instance {} is {}", i.id, i.status))
    }

    pub async fn list_history(&self, workflow: &str, pagination: Pagination) -> ApiResponse<HistoryList> {
        let result = async {
            let reference: DefinitionRef = workflow.parse()?;
            let page = self.history().query(&reference, &pagination).await?;
            Ok::<_, EngineError>(HistoryList {
                instances: page.items,
                pagination: page.pagination,
            })
        }
        .await;
        ApiResponse::from_result(result, |list| {
            format!("{} of {} history records", list.instances.len(), list.pagination.total)
        })
    }

    pub async fn get_history(&self, id: &InstanceId) -> ApiResponse<HistoryRecord> {
        let result = match self.history().get(id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(EngineError::not_found("history record", id)),
            Err(e) => Err(e),
        };
        ApiResponse::from_result(result, |r| format!("History record {}", r.id()))
    }

    pub fn list_schedules(&self, workflow: &str) -> ApiResponse<Vec<WorkflowSchedule>> {
        let result = workflow
            .parse::<DefinitionRef>()
            .map(|reference| self.scheduler.list(Some(&reference)));
        ApiResponse::from_result(result, |s| format!("{} schedules", s.len()))
    }

    pub fn list_definitions(&self) -> ApiResponse<Vec<WorkflowDefinition>> {
        let definitions = self.lifecycle.registry().list();
        ApiResponse::ok(format!("{} definitions", definitions.len()), definitions)
    }

    /// ASCII Gantt chart of an instance's pointers.
    pub async fn instance_timeline(&self, id: &InstanceId) -> ApiResponse<String> {
        let response = self.get_instance(id).await;
        match response.data {
            Some(instance) => {
                let chart = InstanceTimeline::from_instance(&instance, chrono::Utc::now()).gantt_chart();
                ApiResponse::ok(response.message, chart)
            }
            None => ApiResponse::failure(response.message),
        }
    }

    // ---- Lifecycle mutations ----

    pub fn start(&self, workflow: &str, request: StartRequest) -> ApiResponse<WorkflowInstance> {
        let result = workflow
            .parse::<DefinitionRef>()
            .and_then(|reference| self.lifecycle.start(&reference, request));
        ApiResponse::from_result(result, |i| format!("Started instance {}", i.id))
    }

    pub async fn pause(&self, id: &InstanceId) -> ApiResponse<WorkflowInstance> {
        self.control(id, Control::Pause).await
    }

    pub async fn resume(&self, id: &InstanceId) -> ApiResponse<WorkflowInstance> {
        self.control(id, Control::Resume).await
    }

    pub async fn cancel(&self, id: &InstanceId) -> ApiResponse<WorkflowInstance> {
        self.control(id, Control::Cancel).await
    }

    async fn control(&self, id: &InstanceId, control: Control) -> ApiResponse<WorkflowInstance> {
        let result = self.lifecycle.control(id, control).await;
        ApiResponse::from_result(result, |i| format!("Instance {} {}", i.id, control.past_tense()))
    }

    pub async fn pause_batch(&self, ids: &[InstanceId]) -> ApiResponse<Vec<BatchItem>> {
        batch_response(Control::Pause.past_tense(), self.lifecycle.pause_batch(ids).await)
    }

    pub async fn resume_batch(&self, ids: &[InstanceId]) -> ApiResponse<Vec<BatchItem>> {
        batch_response(Control::Resume.past_tense(), self.lifecycle.resume_batch(ids).await)
    }

    pub async fn cancel_batch(&self, ids: &[InstanceId]) -> ApiResponse<Vec<BatchItem>> {
        batch_response(Control::Cancel.past_tense(), self.lifecycle.cancel_batch(ids).await)
    }

    pub async fn retry_archive(&self, id: &InstanceId) -> ApiResponse<InstanceId> {
        let result = self.lifecycle.retry_archive(id).await.map(|()| *id);
        ApiResponse::from_result(result, |id| format!("Instance {} archived", id))
    }

    // ---- Definition activation ----

    pub fn activate_workflow(&self, namespace: &str, name: &str) -> ApiResponse<usize> {
        self.set_active(namespace, name, true)
    }

    pub fn deactivate_workflow(&self, namespace: &str, name: &str) -> ApiResponse<usize> {
        self.set_active(namespace, name, false)
    }

    fn set_active(&self, namespace: &str, name: &str, active: bool) -> ApiResponse<usize> {
        let result = self.lifecycle.registry().set_active(namespace, name, active);
        let verb = if active { "Activated" } else { "Deactivated" };
        ApiResponse::from_result(result, |n| {
            format!("{} {} version(s) of {}.{}", verb, n, namespace, name)
        })
    }

    pub fn activate_batch(&self, selection: &[WorkflowSelection]) -> ApiResponse<Vec<SelectionResult>> {
        self.set_active_batch(selection, true)
    }

    pub fn deactivate_batch(&self, selection: &[WorkflowSelection]) -> ApiResponse<Vec<SelectionResult>> {
        self.set_active_batch(selection, false)
    }

    fn set_active_batch(&self, selection: &[WorkflowSelection], active: bool) -> ApiResponse<Vec<SelectionResult>> {
        let results: Vec<SelectionResult> = selection
            .iter()
            .map(|item| {
                let response = self.set_active(&item.namespace, &item.name, active);
                SelectionResult {
                    namespace: item.namespace.clone(),
                    name: item.name.clone(),
                    success: response.success,
                    message: response.message,
                }
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        let verb = if active { "Activated" } else { "Deactivated" };
        ApiResponse::with_outcome(
            succeeded == results.len(),
            format!("{} {} of {} workflows", verb, succeeded, results.len()),
            results,
        )
    }

    // ---- Schedules ----

    pub fn create_schedule(&self, config: ScheduleConfig) -> ApiResponse<WorkflowSchedule> {
        ApiResponse::from_result(self.scheduler.create(config), |s| {
            format!("Created schedule '{}'", s.name)
        })
    }

    pub fn update_schedule(&self, id: &ScheduleId, patch: SchedulePatch) -> ApiResponse<WorkflowSchedule> {
        ApiResponse::from_result(self.scheduler.update(id, patch), |s| {
            format!("Updated schedule '{}'", s.name)
        })
    }

    pub fn delete_schedule(&self, id: &ScheduleId) -> ApiResponse<WorkflowSchedule> {
        ApiResponse::from_result(self.scheduler.delete(id), |s| {
            format!("Deleted schedule '{}'", s.name)
        })
    }

    // ---- History ----

    pub async fn delete_history(&self, id: &InstanceId) -> ApiResponse<InstanceId> {
        let result = self.history().delete(id).await.map(|()| *id);
        ApiResponse::from_result(result, |id| format!("Deleted history record {}", id))
    }

    pub async fn delete_history_batch(&self, ids: &[InstanceId]) -> ApiResponse<Vec<BatchItem>> {
        let results = self
            .history()
            .delete_batch(ids)
            .await
            .into_iter()
            .map(|(id, result)| match result {
                Ok(()) => BatchItem {
                    id,
                    success: true,
                    message: format!("Deleted history record {}", id),
                },
                Err(e) => BatchItem {
                    id,
                    success: false,
                    message: e.to_string(),
                },
            })
            .collect();
        batch_response("deleted", BatchOutcome::from_results(results))
    }

    pub async fn clear_history(&self, workflow: &str) -> ApiResponse<usize> {
        let result = async {
            let reference: DefinitionRef = workflow.parse()?;
            let removed = self.history().clear(&reference).await?;
            info!("Cleared history of {}", reference);
            Ok::<_, EngineError>(removed)
        }
        .await;
        ApiResponse::from_result(result, |n| format!("Cleared {} history records", n))
    }
}

fn batch_response(verb: &str, outcome: BatchOutcome) -> ApiResponse<Vec<BatchItem>> {
    let message = format!(
        "{} of {} {}",
        outcome.succeeded(),
        outcome.results.len(),
        verb
    );
    ApiResponse::with_outcome(outcome.success, message, outcome.results)
}
