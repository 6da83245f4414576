//! Instance Actor
//!
//! Every active instance is driven by one task that owns its pointer
//! tracker and is the only writer of its snapshot. Control commands reach
//! it through the mailbox kept in the instance store, so pause, resume,
//! cancel, step results and timeouts are applied strictly one at a time.
//!
//! Step attempts run on a `JoinSet` owned by the actor. Aborting the set
//! is how pause and terminal transitions stop work in flight.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

use super::executor::{StepContext, StepError, StepExecutor};
use super::retry::RetryPolicy;
use super::tracker::{Dispatch, Evaluation, FailureEffect, PointerTracker};
use crate::error::{EngineError, Result};
use crate::history::{HistoryRecord, HistoryStore};
use crate::instance::{
    Attention, InstanceError, InstanceId, InstanceStatus, InstanceStore, SharedInstance,
    WorkflowInstance,
};
use crate::monitoring::{EngineEvent, EventBus};
use crate::workflow::WorkflowDefinition;

/// Reply channel carrying the instance snapshot after a command.
pub type Reply = oneshot::Sender<Result<WorkflowInstance>>;

#[derive(Debug)]
pub enum InstanceCommand {
    Pause(Reply),
    Resume(Reply),
    Cancel(Reply),
}

/// Shared services every actor needs.
#[derive(Clone)]
pub struct ActorContext {
    pub store: Arc<InstanceStore>,
    pub history: Arc<dyn HistoryStore>,
    pub executor: Arc<dyn StepExecutor>,
    pub events: EventBus,
    /// Backoff shape for step retries
    pub retry_policy: RetryPolicy,
    /// Attempts and backoff for history writes
    pub persistence_policy: RetryPolicy,
    /// Host-wide cap on concurrent attempts per instance
    pub max_parallelism: usize,
}

struct AttemptResult {
    step_id: String,
    pointer_id: Uuid,
    generation: u64,
    outcome: std::result::Result<Value, StepError>,
}

enum Wake {
    Command(Option<InstanceCommand>),
    Attempt(std::result::Result<AttemptResult, JoinError>),
    Retry,
    Deadline,
    Idle,
}

/// Registers a new `PENDING` instance and spawns the actor that drives it.
///
/// Returns the snapshot as it was registered.
pub fn spawn_instance(
    ctx: ActorContext,
    definition: Arc<WorkflowDefinition>,
    instance: WorkflowInstance,
) -> WorkflowInstance {
    let (mailbox, inbox) = mpsc::unbounded_channel();
    let registered = instance.clone();
    let id = instance.id;
    let snapshot: SharedInstance = Arc::new(RwLock::new(instance));

    ctx.store.insert(Arc::clone(&snapshot), mailbox);

    info!("Instance {} registered for {}", id, definition.reference());
    let actor = InstanceActor::new(ctx, definition, snapshot, inbox);
    tokio::spawn(actor.run());
    registered
}

struct InstanceActor {
    id: InstanceId,
    ctx: ActorContext,
    snapshot: SharedInstance,
    tracker: PointerTracker,
    inbox: mpsc::UnboundedReceiver<InstanceCommand>,
    inbox_closed: bool,
    in_flight: JoinSet<AttemptResult>,
    deadline: Option<Instant>,
    finished: bool,
}

impl InstanceActor {
    fn new(
        ctx: ActorContext,
        definition: Arc<WorkflowDefinition>,
        snapshot: SharedInstance,
        inbox: mpsc::UnboundedReceiver<InstanceCommand>,
    ) -> Self {
        let id = snapshot.read().id;
        let tracker = PointerTracker::new(definition, &ctx.retry_policy, ctx.max_parallelism);
        Self {
            id,
            ctx,
            snapshot,
            tracker,
            inbox,
            inbox_closed: false,
            in_flight: JoinSet::new(),
            deadline: None,
            finished: false,
        }
    }

    async fn run(mut self) {
        // Commands queued before the first poll apply to the PENDING instance
        while let Ok(command) = self.inbox.try_recv() {
            self.handle(command).await;
            if self.finished {
                return;
            }
        }

        if self.status() == InstanceStatus::Pending {
            if let Err(e) = self.begin() {
                self.halt(self.fatal(e));
                return;
            }
        }
        self.advance().await;

        while !self.finished {
            let running = self.status() == InstanceStatus::Running;
            let retry_at = if running {
                self.tracker.next_wakeup(&self.snapshot.read())
            } else {
                None
            };
            let retry_instant = retry_at.map(instant_at).unwrap_or_else(far_future);
            let deadline = self.deadline.filter(|_| running);
            let deadline_instant = deadline.unwrap_or_else(far_future);

            let wake = tokio::select! {
                command = self.inbox.recv(), if !self.inbox_closed => Wake::Command(command),
                Some(joined) = self.in_flight.join_next() => Wake::Attempt(joined),
                _ = sleep_until(retry_instant), if retry_at.is_some() => Wake::Retry,
                _ = sleep_until(deadline_instant), if deadline.is_some() => Wake::Deadline,
                else => Wake::Idle,
            };

            match wake {
                Wake::Command(Some(command)) => self.handle(command).await,
                Wake::Command(None) => {
                    debug!("Instance {}: mailbox closed", self.id);
                    self.inbox_closed = true;
                }
                Wake::Attempt(joined) => self.on_attempt(joined).await,
                Wake::Retry => self.advance().await,
                Wake::Deadline => self.on_timeout().await,
                Wake::Idle => {
                    let error = self.fatal("no command, attempt or timer can wake the instance");
                    self.halt(error);
                }
            }
        }

        debug!("Instance {}: actor stopped", self.id);
    }

    fn status(&self) -> InstanceStatus {
        self.snapshot.read().status
    }

    fn current(&self) -> WorkflowInstance {
        self.snapshot.read().clone()
    }

    async fn handle(&mut self, command: InstanceCommand) {
        let (result, reply) = match command {
            InstanceCommand::Pause(reply) => (self.pause().await, reply),
            InstanceCommand::Resume(reply) => (self.resume().await, reply),
            InstanceCommand::Cancel(reply) => (self.cancel().await, reply),
        };
        if reply.send(result).is_err() {
            debug!("Instance {}: command caller went away", self.id);
        }
    }

    /// Applies a status change under one write lock together with the
    /// pointer updates that must be visible at the same time.
    fn transition<F>(&mut self, to: InstanceStatus, apply: F) -> Result<InstanceStatus>
    where
        F: FnOnce(&mut WorkflowInstance, &mut PointerTracker, DateTime<Utc>),
    {
        let now = Utc::now();
        let from = {
            let mut instance = self.snapshot.write();
            let from = instance.status;
            if !from.can_transition_to(to) {
                return Err(EngineError::validation(format!(
                    "Instance {} cannot move from {} to {}",
                    self.id, from, to
                )));
            }
            apply(&mut instance, &mut self.tracker, now);
            instance.status = to;
            if to.is_terminal() {
                instance.close(now);
            }
            from
        };

        info!("Instance {}: {} -> {}", self.id, from, to);
        self.ctx.events.publish(EngineEvent::StatusChanged {
            instance_id: self.id,
            from,
            to,
            at: now,
        });
        Ok(from)
    }

    fn begin(&mut self) -> Result<()> {
        self.transition(InstanceStatus::Running, |_, _, _| {})?;
        let timeout = self.snapshot.read().timeout;
        self.deadline = timeout.and_then(|secs| {
            let deadline = Instant::now().checked_add(Duration::from_secs(secs));
            if deadline.is_none() {
                warn!("Instance {}: timeout of {}s is out of range, running without one", self.id, secs);
            }
            deadline
        });
        Ok(())
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.map_or(false, |d| d <= Instant::now())
    }

    /// Dispatches every ready step, then checks whether the instance is done.
    async fn advance(&mut self) {
        if self.status() != InstanceStatus::Running {
            return;
        }

        let now = Utc::now();
        let (dispatches, input, outputs) = {
            let mut instance = self.snapshot.write();
            let ready = self.tracker.ready_steps(&instance, now);
            let mut dispatches = Vec::with_capacity(ready.len());
            for step_id in &ready {
                if let Some(dispatch) = self.tracker.dispatch(&mut instance, step_id, now) {
                    dispatches.push(dispatch);
                }
            }
            (dispatches, instance.input.clone(), instance.output.clone())
        };

        for dispatch in dispatches {
            self.spawn_attempt(dispatch, input.clone(), outputs.clone());
        }

        let evaluation = self.tracker.evaluate(&self.snapshot.read(), now);
        match evaluation {
            Evaluation::InProgress => {}
            Evaluation::Completed => {
                if let Err(e) = self.terminate(InstanceStatus::Completed, |_, _, _| {}).await {
                    self.halt(self.fatal(e));
                }
            }
            Evaluation::Stalled(blocked) => {
                let error = self.fatal(format!("no runnable steps, blocked: {}", blocked.join(", ")));
                self.halt(error);
            }
        }
    }

    fn spawn_attempt(&mut self, dispatch: Dispatch, input: Value, outputs: Value) {
        let executor = Arc::clone(&self.ctx.executor);
        let step_id = dispatch.step.id.clone();
        let pointer_id = dispatch.pointer_id;
        let generation = dispatch.generation;
        let ctx = StepContext {
            instance_id: self.id,
            definition: self.snapshot.read().definition_ref(),
            step: dispatch.step,
            attempt: dispatch.attempt,
            input,
            outputs,
        };

        self.in_flight.spawn(async move {
            let outcome = AssertUnwindSafe(executor.execute(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(StepError::retryable(panic_message(panic))));
            AttemptResult {
                step_id,
                pointer_id,
                generation,
                outcome,
            }
        });
    }

    async fn on_attempt(&mut self, joined: std::result::Result<AttemptResult, JoinError>) {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                debug!("Instance {}: attempt task ended early: {}", self.id, e);
                return;
            }
        };

        if self.status() != InstanceStatus::Running
            || !self.tracker.is_current(&result.step_id, result.generation)
        {
            debug!(
                "Instance {}: ignoring stale result of step '{}'",
                self.id, result.step_id
            );
            return;
        }

        let now = Utc::now();
        let effect = {
            let mut instance = self.snapshot.write();
            match result.outcome {
                Ok(output) => {
                    self.tracker
                        .record_success(&mut instance, &result.step_id, output, now);
                    None
                }
                Err(err) => Some(
                    self.tracker
                        .record_failure(&mut instance, &result.step_id, &err, now),
                ),
            }
        };

        self.publish_step(result.pointer_id);

        if let Some(FailureEffect::InstanceFailed(error)) = effect {
            self.fail(error).await;
            return;
        }
        self.advance().await;
    }

    /// Reports the attempt behind `pointer_id` once it has an outcome.
    fn publish_step(&self, pointer_id: Uuid) {
        let pointer = self
            .snapshot
            .read()
            .pointers
            .iter()
            .find(|p| p.id == pointer_id)
            .cloned();
        if let Some(pointer) = pointer {
            self.ctx.events.publish(EngineEvent::StepFinished {
                instance_id: self.id,
                step_id: pointer.step_id,
                status: pointer.status,
                retry_count: pointer.retry_count,
            });
        }
    }

    async fn fail(&mut self, error: InstanceError) {
        error!("Instance {} failed: {}", self.id, error.message);
        let result = self
            .terminate(InstanceStatus::Failed, move |instance, tracker, now| {
                tracker.cancel_remaining(instance, now);
                instance.error = Some(error);
            })
            .await;
        if let Err(e) = result {
            self.halt(self.fatal(e));
        }
    }

    async fn on_timeout(&mut self) {
        let secs = self.snapshot.read().timeout.unwrap_or_default();
        warn!("Instance {} exceeded its timeout of {}s", self.id, secs);
        self.fail(InstanceError::new(
            InstanceError::TIMEOUT,
            format!("Instance exceeded timeout of {}s", secs),
        ))
        .await;
    }

    async fn pause(&mut self) -> Result<WorkflowInstance> {
        let mut interrupted = 0;
        self.transition(InstanceStatus::Paused, |instance, tracker, _| {
            interrupted = tracker.interrupt_running(instance);
        })?;
        self.in_flight.shutdown().await;

        info!(
            "Instance {} paused, {} attempts interrupted",
            self.id, interrupted
        );
        Ok(self.current())
    }

    async fn resume(&mut self) -> Result<WorkflowInstance> {
        self.transition(InstanceStatus::Running, |_, _, _| {})?;

        if self.deadline_passed() {
            self.on_timeout().await;
        } else {
            self.advance().await;
        }
        Ok(self.current())
    }

    async fn cancel(&mut self) -> Result<WorkflowInstance> {
        self.terminate(InstanceStatus::Cancelled, |instance, tracker, now| {
            tracker.cancel_remaining(instance, now);
        })
        .await?;
        Ok(self.current())
    }

    /// Moves to a terminal status, stops work in flight and archives.
    async fn terminate<F>(&mut self, to: InstanceStatus, apply: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowInstance, &mut PointerTracker, DateTime<Utc>),
    {
        self.transition(to, apply)?;
        self.in_flight.shutdown().await;
        self.finished = true;

        let terminal = self.current();
        match archive_instance(self.ctx.history.as_ref(), &self.ctx.persistence_policy, terminal).await {
            Ok(()) => {
                self.ctx.store.remove(&self.id);
                self.ctx.events.publish(EngineEvent::Archived { instance_id: self.id });
            }
            Err(e) => {
                error!("Instance {}: archiving failed, keeping it in the store: {}", self.id, e);
                self.flag(Attention::PersistenceFailed {
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    fn fatal(&self, reason: impl ToString) -> EngineError {
        EngineError::Fatal {
            instance_id: self.id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Stops driving the instance and leaves it in the store for inspection.
    fn halt(&mut self, error: EngineError) {
        error!("{}", error);
        self.in_flight.abort_all();
        self.finished = true;
        self.flag(Attention::Inspection {
            reason: error.to_string(),
        });
    }

    fn flag(&self, attention: Attention) {
        self.snapshot.write().attention = Some(attention.clone());
        self.ctx.events.publish(EngineEvent::AttentionRequired {
            instance_id: self.id,
            attention,
        });
    }
}

/// Writes a terminal instance to history, retrying with backoff.
///
/// Validation errors (such as a record that already exists) are not retried.
pub(crate) async fn archive_instance(
    history: &dyn HistoryStore,
    policy: &RetryPolicy,
    instance: WorkflowInstance,
) -> Result<()> {
    let id = instance.id;
    let record = HistoryRecord::from_instance(instance)?;
    let mut retries = 0;

    loop {
        match history.append(record.clone()).await {
            Ok(()) => {
                info!("Instance {} archived", id);
                return Ok(());
            }
            Err(e) if e.is_business_failure() => return Err(e),
            Err(e) if policy.should_retry(retries) => {
                retries += 1;
                let delay = policy.delay_for(retries);
                warn!(
                    "Archiving instance {} failed (retry {}/{} in {:?}): {}",
                    id, retries, policy.max_retries, delay, e
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn instant_at(at: DateTime<Utc>) -> Instant {
    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Instant::now().checked_add(delay).unwrap_or_else(far_future)
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("step executor panicked: {}", detail)
}
