//! Instance Lifecycle Controller
//!
//! Entry point for every lifecycle mutation. `start` registers a new
//! instance and spawns its actor; `pause`, `resume` and `cancel` are
//! delivered to the actor's mailbox and answered with the resulting
//! snapshot. Batch variants fan out concurrently and never let one id's
//! failure abort the others.

use std::sync::Arc;

use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::actor::{archive_instance, spawn_instance, ActorContext, InstanceCommand, Reply};
use crate::error::{EngineError, Result};
use crate::history::HistoryStore;
use crate::instance::{Attention, InstanceId, InstanceStatus, InstanceStore, StartRequest, WorkflowInstance};
use crate::monitoring::{EngineEvent, EventBus};
use crate::workflow::{DefinitionRef, DefinitionRegistry};

/// Lifecycle command sent to a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Pause,
    Resume,
    Cancel,
}

impl Control {
    fn command(self, reply: Reply) -> InstanceCommand {
        match self {
            Self::Pause => InstanceCommand::Pause(reply),
            Self::Resume => InstanceCommand::Resume(reply),
            Self::Cancel => InstanceCommand::Cancel(reply),
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Pause => "paused",
            Self::Resume => "resumed",
            Self::Cancel => "cancelled",
        }
    }
}

/// Result of one id within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub id: InstanceId,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// True only if every id succeeded
    pub success: bool,
    pub results: Vec<BatchItem>,
}

impl BatchOutcome {
    pub fn from_results(results: Vec<BatchItem>) -> Self {
        Self {
            success: results.iter().all(|r| r.success),
            results,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

pub struct LifecycleController {
    registry: Arc<DefinitionRegistry>,
    ctx: ActorContext,
}

impl LifecycleController {
    pub fn new(registry: Arc<DefinitionRegistry>, ctx: ActorContext) -> Self {
        Self { registry, ctx }
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.ctx.store
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.ctx.history
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    /// Creates a `PENDING` instance of an active definition.
    ///
    /// The returned snapshot is taken before the actor first runs.
    pub fn start(&self, reference: &DefinitionRef, request: StartRequest) -> Result<WorkflowInstance> {
        let definition = self.registry.resolve_active(reference)?;
        let instance = WorkflowInstance::new(&definition, request);
        info!("Starting {} as instance {}", reference, instance.id);
        Ok(spawn_instance(self.ctx.clone(), definition, instance))
    }

    pub async fn pause(&self, id: &InstanceId) -> Result<WorkflowInstance> {
        self.control(id, Control::Pause).await
    }

    pub async fn resume(&self, id: &InstanceId) -> Result<WorkflowInstance> {
        self.control(id, Control::Resume).await
    }

    pub async fn cancel(&self, id: &InstanceId) -> Result<WorkflowInstance> {
        self.control(id, Control::Cancel).await
    }

    /// Delivers a command to the instance's actor and waits for its answer.
    pub async fn control(&self, id: &InstanceId, control: Control) -> Result<WorkflowInstance> {
        let Some(mailbox) = self.ctx.store.mailbox(id) else {
            return Err(self.unavailable(id).await);
        };

        if let Some(instance) = self.ctx.store.get(id) {
            if instance.status.is_terminal() {
                return Err(already_terminal(id, instance.status));
            }
        }

        let (reply, answer) = oneshot::channel();
        if mailbox.send(control.command(reply)).is_err() {
            return Err(self.unavailable(id).await);
        }

        match answer.await {
            Ok(result) => result,
            Err(_) => Err(self.unavailable(id).await),
        }
    }

    pub async fn pause_batch(&self, ids: &[InstanceId]) -> BatchOutcome {
        self.control_batch(ids, Control::Pause).await
    }

    pub async fn resume_batch(&self, ids: &[InstanceId]) -> BatchOutcome {
        self.control_batch(ids, Control::Resume).await
    }

    pub async fn cancel_batch(&self, ids: &[InstanceId]) -> BatchOutcome {
        self.control_batch(ids, Control::Cancel).await
    }

    pub async fn control_batch(&self, ids: &[InstanceId], control: Control) -> BatchOutcome {
        let results = join_all(ids.iter().map(|id| async move {
            match self.control(id, control).await {
                Ok(_) => BatchItem {
                    id: *id,
                    success: true,
                    message: format!("Instance {} {}", id, control.past_tense()),
                },
                Err(e) => BatchItem {
                    id: *id,
                    success: false,
                    message: e.to_string(),
                },
            }
        }))
        .await;

        let outcome = BatchOutcome::from_results(results);
        if !outcome.success {
            warn!(
                "Batch {:?}: {} of {} instances failed",
                control,
                outcome.failed(),
                outcome.results.len()
            );
        }
        outcome
    }

    /// Retries archiving a terminal instance whose history write failed.
    pub async fn retry_archive(&self, id: &InstanceId) -> Result<()> {
        let mut instance = self
            .ctx
            .store
            .get(id)
            .ok_or_else(|| EngineError::not_found("instance", id))?;

        if !matches!(instance.attention, Some(Attention::PersistenceFailed { .. })) {
            return Err(EngineError::validation(format!(
                "Instance {} is not awaiting archival",
                id
            )));
        }

        instance.attention = None;
        archive_instance(self.ctx.history.as_ref(), &self.ctx.persistence_policy, instance).await?;

        self.ctx.store.remove(id);
        self.ctx.events.publish(EngineEvent::Archived { instance_id: *id });
        Ok(())
    }

    /// Explains why an instance cannot take commands.
    async fn unavailable(&self, id: &InstanceId) -> EngineError {
        if let Some(instance) = self.ctx.store.get(id) {
            if instance.status.is_terminal() {
                return already_terminal(id, instance.status);
            }
            return EngineError::ActorUnavailable(id.to_string());
        }

        match self.ctx.history.get(id).await {
            Ok(Some(record)) => already_terminal(id, record.instance.status),
            Ok(None) => EngineError::not_found("instance", id),
            Err(e) => e,
        }
    }
}

fn already_terminal(id: &InstanceId, status: InstanceStatus) -> EngineError {
    EngineError::validation(format!("Instance {} is already {}", id, status))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::execution::actor::test_support::{wait_archived, wait_until, FlakyHistory};
    use crate::execution::executor::test_support::ScriptedExecutor;
    use crate::history::InMemoryHistoryStore;
    use crate::instance::PointerStatus;
    use serde_json::json;
    use tokio::sync::Semaphore;
    use uuid::Uuid;

    fn fetch_running(instance: &WorkflowInstance) -> bool {
        instance
            .pointer("fetch")
            .map_or(false, |p| p.status == PointerStatus::Running)
    }

    #[tokio::test]
    async fn test_start_unknown_definition() {
        let lifecycle = controller(
            Arc::new(ScriptedExecutor::instant()),
            Arc::new(InMemoryHistoryStore::new()),
        );
        let err = lifecycle
            .start(&DefinitionRef::new("core", "Missing", "1"), StartRequest::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_start_inactive_definition() {
        let lifecycle = controller(
            Arc::new(ScriptedExecutor::instant()),
            Arc::new(InMemoryHistoryStore::new()),
        );
        lifecycle.registry().set_active("core", "Sample", false).unwrap();

        let err = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_start_returns_pending_snapshot() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let lifecycle = controller(Arc::new(ScriptedExecutor::instant()), history.clone());

        let request = StartRequest {
            data: json!({"foo": 1}),
            tags: vec!["nightly".to_string()],
            ..StartRequest::default()
        };
        let instance = lifecycle.start(&sample_ref(), request).unwrap();

        assert_eq!(instance.status, InstanceStatus::Pending);
        assert_eq!(instance.progress, 0);
        assert_eq!(instance.tags, vec!["nightly"]);
        assert!(lifecycle.store().contains(&instance.id));

        let record = wait_archived(history.as_ref(), instance.id).await;
        assert_eq!(record.instance.status, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn test_pause_resume_preserves_progress() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(ScriptedExecutor::gated(gate.clone()));
        let lifecycle = controller(executor.clone(), history.clone());

        let started = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        let running = wait_until(lifecycle.store(), started.id, fetch_running).await;
        let before = running.progress;

        let paused = lifecycle.pause(&started.id).await.unwrap();
        assert_eq!(paused.status, InstanceStatus::Paused);
        assert_eq!(paused.progress, before);
        assert!(paused.pointers.iter().all(|p| !p.active));

        // Pausing twice is rejected and changes nothing
        let err = lifecycle.pause(&started.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(lifecycle.store().get(&started.id).unwrap().progress, before);

        let resumed = lifecycle.resume(&started.id).await.unwrap();
        assert_eq!(resumed.status, InstanceStatus::Running);
        assert_eq!(resumed.progress, before);

        gate.add_permits(10);
        let record = wait_archived(history.as_ref(), started.id).await;
        assert_eq!(record.instance.status, InstanceStatus::Completed);
        // The interrupted attempt is not counted as a retry
        assert_eq!(record.instance.pointer("fetch").unwrap().retry_count, 0);
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        let gate = Arc::new(Semaphore::new(0));
        let lifecycle = controller(
            Arc::new(ScriptedExecutor::gated(gate)),
            Arc::new(InMemoryHistoryStore::new()),
        );

        let started = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        wait_until(lifecycle.store(), started.id, fetch_running).await;

        let err = lifecycle.resume(&started.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_from_pending() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let executor = Arc::new(ScriptedExecutor::instant());
        let lifecycle = controller(executor.clone(), history.clone());

        let started = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        let cancelled = lifecycle.cancel(&started.id).await.unwrap();

        assert_eq!(cancelled.status, InstanceStatus::Cancelled);
        assert!(cancelled
            .pointers
            .iter()
            .all(|p| p.status == PointerStatus::Cancelled));
        assert_eq!(executor.call_count(), 0);
        assert!(history.get(&started.id).await.unwrap().is_some());
        assert!(!lifecycle.store().contains(&started.id));
    }

    #[tokio::test]
    async fn test_cancel_from_running_and_paused() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let gate = Arc::new(Semaphore::new(0));
        let lifecycle = controller(Arc::new(ScriptedExecutor::gated(gate)), history.clone());

        let running = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        let paused = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        wait_until(lifecycle.store(), running.id, fetch_running).await;
        wait_until(lifecycle.store(), paused.id, fetch_running).await;
        lifecycle.pause(&paused.id).await.unwrap();

        for id in [running.id, paused.id] {
            let cancelled = lifecycle.cancel(&id).await.unwrap();
            assert_eq!(cancelled.status, InstanceStatus::Cancelled);
            assert!(cancelled.end_time.is_some());
            assert!(cancelled.pointers.iter().all(|p| !p.active));
            let record = history.get(&id).await.unwrap().unwrap();
            assert_eq!(record.instance.status, InstanceStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_out_of_range_timeout_runs_without_deadline() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let gate = Arc::new(Semaphore::new(0));
        let lifecycle = controller(Arc::new(ScriptedExecutor::gated(gate)), history.clone());

        let request = StartRequest {
            timeout: Some(u64::MAX),
            ..StartRequest::default()
        };
        let started = lifecycle.start(&sample_ref(), request).unwrap();
        let running = wait_until(lifecycle.store(), started.id, fetch_running).await;
        assert_eq!(running.status, InstanceStatus::Running);
        assert!(running.attention.is_none());

        let cancelled = lifecycle.cancel(&started.id).await.unwrap();
        assert_eq!(cancelled.status, InstanceStatus::Cancelled);
        let record = wait_archived(history.as_ref(), started.id).await;
        assert_eq!(record.instance.status, InstanceStatus::Cancelled);
        assert!(record.instance.attention.is_none());
    }

    #[tokio::test]
    async fn test_commands_on_archived_instance_are_rejected() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let lifecycle = controller(Arc::new(ScriptedExecutor::instant()), history.clone());

        let started = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        wait_archived(history.as_ref(), started.id).await;

        for control in [Control::Pause, Control::Resume, Control::Cancel] {
            let err = lifecycle.control(&started.id, control).await.unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
            assert!(err.to_string().contains("COMPLETED"));
        }
    }

    #[tokio::test]
    async fn test_unknown_instance_not_found() {
        let lifecycle = controller(
            Arc::new(ScriptedExecutor::instant()),
            Arc::new(InMemoryHistoryStore::new()),
        );
        let err = lifecycle.cancel(&Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_batch_partial_failure() {
        let gate = Arc::new(Semaphore::new(0));
        let lifecycle = controller(
            Arc::new(ScriptedExecutor::gated(gate)),
            Arc::new(InMemoryHistoryStore::new()),
        );

        let first = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        let second = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        wait_until(lifecycle.store(), first.id, fetch_running).await;
        wait_until(lifecycle.store(), second.id, fetch_running).await;
        let missing = Uuid::new_v4();

        let outcome = lifecycle.pause_batch(&[first.id, missing, second.id]).await;

        assert!(!outcome.success);
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.failed(), 1);
        assert!(!outcome.results[1].success);
        assert_eq!(
            lifecycle.store().get(&second.id).unwrap().status,
            InstanceStatus::Paused
        );

        let outcome = lifecycle.cancel_batch(&[first.id, second.id]).await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_retry_archive_after_persistence_failure() {
        let history = Arc::new(FlakyHistory::new(3));
        let lifecycle = controller(Arc::new(ScriptedExecutor::instant()), history.clone());

        let started = lifecycle.start(&sample_ref(), StartRequest::default()).unwrap();
        wait_until(lifecycle.store(), started.id, |i| i.attention.is_some()).await;

        lifecycle.retry_archive(&started.id).await.unwrap();

        assert!(!lifecycle.store().contains(&started.id));
        let record = history.get(&started.id).await.unwrap().unwrap();
        assert_eq!(record.instance.status, InstanceStatus::Completed);
        assert!(record.instance.attention.is_none());

        let err = lifecycle.retry_archive(&started.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_sample_round_trip() {
        let history = Arc::new(InMemoryHistoryStore::new());
        let lifecycle = controller(Arc::new(ScriptedExecutor::instant()), history.clone());

        let started = lifecycle
            .start(&sample_ref(), StartRequest::with_data(json!({"foo": 1})))
            .unwrap();
        let record = wait_archived(history.as_ref(), started.id).await;

        assert_eq!(record.instance.input, json!({"foo": 1}));
        assert_eq!(record.instance.progress, 100);
        assert_eq!(record.definition_ref(), sample_ref());
    }
}
