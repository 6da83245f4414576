//! Execution Pointer Tracker
//!
//! Decides which steps of an instance may run next and applies attempt
//! results to the instance's pointers:
//! - Dependency tracking over the definition graph
//! - Parallelism limits
//! - Retry scheduling with backoff
//! - Progress recomputation after every pointer transition
//!
//! The tracker is plain synchronous state; the instance actor owns it and
//! is the only caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;

use super::executor::StepError;
use super::retry::RetryPolicy;
use crate::error::EngineError;
use crate::instance::{InstanceError, PointerStatus, WorkflowInstance};
use crate::workflow::{validator, StepDefinition, WorkflowDefinition};
use uuid::Uuid;

/// A step handed out for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub step: StepDefinition,
    /// Pointer recording this attempt
    pub pointer_id: Uuid,
    /// Guards against results from interrupted attempts
    pub generation: u64,
    /// 1-based attempt number
    pub attempt: u32,
}

/// What a failed attempt led to.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureEffect {
    /// A new attempt was queued for the given time
    Retrying { at: DateTime<Utc> },
    /// An optional step gave up; progression continues
    OptionalStepFailed,
    /// A required step gave up; the instance must fail
    InstanceFailed(InstanceError),
}

/// Overall state of an instance's pointers.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    InProgress,
    Completed,
    /// Nothing is running, nothing is waiting, yet pointers remain unsettled
    Stalled(Vec<String>),
}

pub struct PointerTracker {
    definition: Arc<WorkflowDefinition>,
    policy: RetryPolicy,
    parallelism: usize,
    /// Step ids in dependency order
    order: Vec<String>,
    generations: HashMap<String, u64>,
}

impl PointerTracker {
    /// Creates a tracker for one instance.
    ///
    /// `policy` supplies the backoff shape; retry count and base delay come
    /// from the definition's configuration. Parallelism is the definition's
    /// setting capped at `max_parallelism`.
    pub fn new(definition: Arc<WorkflowDefinition>, policy: &RetryPolicy, max_parallelism: usize) -> Self {
        let order = validator::topological_order(&definition)
            .unwrap_or_else(|| definition.steps.iter().map(|s| s.id.clone()).collect());

        let parallelism = definition
            .configuration
            .parallelism
            .clamp(1, max_parallelism.max(1));

        debug!(
            "Tracker for {}: {} steps, parallelism {}",
            definition.reference(),
            order.len(),
            parallelism
        );

        Self {
            policy: policy.for_configuration(&definition.configuration),
            definition,
            parallelism,
            order,
            generations: HashMap::new(),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.definition.get_step(step_id)
    }

    fn dependencies_settled(&self, instance: &WorkflowInstance, step: &StepDefinition) -> bool {
        step.depends_on
            .iter()
            .all(|dep| instance.pointer(dep).map_or(false, |p| p.is_settled()))
    }

    pub fn running_count(&self, instance: &WorkflowInstance) -> usize {
        instance
            .pointers
            .iter()
            .filter(|p| p.status == PointerStatus::Running)
            .count()
    }

    /// Returns step ids that may start now.
    ///
    /// A step is ready if:
    /// - Its pointer is pending and any retry delay has elapsed
    /// - Every dependency is settled
    /// - Starting it stays within the parallelism limit
    pub fn ready_steps(&self, instance: &WorkflowInstance, now: DateTime<Utc>) -> Vec<String> {
        let slots = self.parallelism.saturating_sub(self.running_count(instance));
        if slots == 0 {
            return Vec::new();
        }

        self.order
            .iter()
            .filter_map(|id| {
                let pointer = instance.pointer(id)?;
                let step = self.step(id)?;
                let due = pointer.next_attempt_at.map_or(true, |at| at <= now);
                (pointer.status == PointerStatus::Pending
                    && due
                    && self.dependencies_settled(instance, step))
                .then(|| id.clone())
            })
            .take(slots)
            .collect()
    }

    /// Earliest pending retry, if any.
    pub fn next_wakeup(&self, instance: &WorkflowInstance) -> Option<DateTime<Utc>> {
        instance
            .pointers
            .iter()
            .filter(|p| p.status == PointerStatus::Pending)
            .filter_map(|p| p.next_attempt_at)
            .min()
    }

    /// Marks a step's pointer running and hands out a dispatch ticket.
    pub fn dispatch(&mut self, instance: &mut WorkflowInstance, step_id: &str, now: DateTime<Utc>) -> Option<Dispatch> {
        let step = self.step(step_id)?.clone();
        let pointer = instance.pointer_mut(step_id)?;
        if pointer.status != PointerStatus::Pending {
            return None;
        }

        pointer.mark_running(now);
        let attempt = pointer.retry_count + 1;
        let pointer_id = pointer.id;

        let generation = self.generations.entry(step_id.to_string()).or_insert(0);
        *generation += 1;

        debug!(
            "Instance {}: dispatching step '{}' (attempt {})",
            instance.id, step_id, attempt
        );

        Some(Dispatch {
            step,
            pointer_id,
            generation: *generation,
            attempt,
        })
    }

    /// Returns true if `generation` is the latest dispatch of `step_id`.
    pub fn is_current(&self, step_id: &str, generation: u64) -> bool {
        self.generations.get(step_id) == Some(&generation)
    }

    pub fn record_success(&mut self, instance: &mut WorkflowInstance, step_id: &str, output: Value, now: DateTime<Utc>) {
        if let Some(pointer) = instance.pointer_mut(step_id) {
            pointer.mark_completed(now);
        }
        instance.record_output(step_id, output);
        instance.recompute_progress();

        info!(
            "Instance {}: step '{}' completed ({}%)",
            instance.id, step_id, instance.progress
        );
    }

    /// Closes the failed attempt and either queues the next one or gives up.
    pub fn record_failure(
        &mut self,
        instance: &mut WorkflowInstance,
        step_id: &str,
        error: &StepError,
        now: DateTime<Utc>,
    ) -> FailureEffect {
        let instance_id = instance.id;
        let policy = &self.policy;
        let Some(pointer) = instance.pointer_mut(step_id) else {
            return FailureEffect::InstanceFailed(InstanceError::new(
                InstanceError::STEP_FAILED,
                format!("Unknown step '{}'", step_id),
            ));
        };

        pointer.mark_failed(now, &error.message);
        let retries = pointer.retry_count;
        let optional = pointer.optional;

        if error.retryable && policy.should_retry(retries) {
            let delay = policy.delay_for(retries + 1);
            let at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            let next = pointer.next_attempt(at);
            instance.pointers.push(next);

            warn!(
                "Instance {}: step '{}' failed (retry {}/{} at {}): {}",
                instance_id,
                step_id,
                retries + 1,
                policy.max_retries,
                at,
                error.message
            );
            return FailureEffect::Retrying { at };
        }

        instance.recompute_progress();

        if optional {
            warn!(
                "Instance {}: optional step '{}' failed after {} retries, continuing: {}",
                instance_id, step_id, retries, error.message
            );
            return FailureEffect::OptionalStepFailed;
        }

        let failure = EngineError::StepExecution {
            step_id: step_id.to_string(),
            message: error.message.clone(),
        };
        warn!("Instance {}: {} after {} retries", instance_id, failure, retries);
        FailureEffect::InstanceFailed(
            InstanceError::new(InstanceError::STEP_FAILED, failure.to_string())
                .with_stack(format!("step={} attempts={}", step_id, retries + 1)),
        )
    }

    /// Returns every in-flight attempt to pending. Used by pause.
    pub fn interrupt_running(&mut self, instance: &mut WorkflowInstance) -> usize {
        let mut interrupted = 0;
        for pointer in instance.pointers.iter_mut() {
            if pointer.status == PointerStatus::Running {
                pointer.interrupt();
                interrupted += 1;
            }
        }
        // Any result still on its way belongs to an outdated generation
        for generation in self.generations.values_mut() {
            *generation += 1;
        }
        interrupted
    }

    /// Marks every non-terminal pointer cancelled.
    pub fn cancel_remaining(&mut self, instance: &mut WorkflowInstance, now: DateTime<Utc>) -> usize {
        let mut cancelled = 0;
        for pointer in instance.pointers.iter_mut() {
            if !pointer.status.is_terminal() {
                pointer.mark_cancelled(now);
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn evaluate(&self, instance: &WorkflowInstance, now: DateTime<Utc>) -> Evaluation {
        if instance.current_pointers().all(|p| p.is_settled()) {
            return Evaluation::Completed;
        }

        let running = self.running_count(instance) > 0;
        let waiting = self.next_wakeup(instance).is_some();
        if running || waiting || !self.ready_steps(instance, now).is_empty() {
            return Evaluation::InProgress;
        }

        let blocked = instance
            .current_pointers()
            .filter(|p| !p.is_settled())
            .map(|p| p.step_id.clone())
            .collect();
        Evaluation::Stalled(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::StartRequest;
    use crate::workflow::Configuration;
    use serde_json::json;

    fn definition(parallelism: usize) -> Arc<WorkflowDefinition> {
        let config = Configuration {
            parallelism,
            max_retries: 2,
            retry_base_delay_ms: 100,
            ..Configuration::default()
        };
        Arc::new(
            WorkflowDefinition::new("core", "Sample", "1.0.0")
                .with_configuration(config)
                .with_step(StepDefinition::new("a"))
                .with_step(StepDefinition::new("b").depends_on("a"))
                .with_step(StepDefinition::new("c").depends_on("a").optional())
                .with_step(StepDefinition::new("d").depends_on("b").depends_on("c")),
        )
    }

    fn setup(parallelism: usize) -> (PointerTracker, WorkflowInstance) {
        let def = definition(parallelism);
        let instance = WorkflowInstance::new(&def, StartRequest::default());
        let policy = RetryPolicy::default().with_jitter(0.0);
        (PointerTracker::new(def, &policy, 8), instance)
    }

    #[test]
    fn test_only_roots_ready_initially() {
        let (tracker, instance) = setup(4);
        assert_eq!(tracker.ready_steps(&instance, Utc::now()), vec!["a"]);
    }

    #[test]
    fn test_siblings_run_up_to_parallelism() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();
        tracker.dispatch(&mut instance, "a", now).unwrap();
        tracker.record_success(&mut instance, "a", json!(1), now);

        assert_eq!(tracker.ready_steps(&instance, now), vec!["b", "c"]);

        let (mut narrow, mut serial) = setup(1);
        narrow.dispatch(&mut serial, "a", now).unwrap();
        narrow.record_success(&mut serial, "a", json!(1), now);
        assert_eq!(narrow.ready_steps(&serial, now), vec!["b"]);
        narrow.dispatch(&mut serial, "b", now).unwrap();
        assert!(narrow.ready_steps(&serial, now).is_empty());
    }

    #[test]
    fn test_parallelism_capped_by_host_limit() {
        let def = definition(16);
        let tracker = PointerTracker::new(def, &RetryPolicy::default(), 2);
        assert_eq!(tracker.parallelism(), 2);
    }

    #[test]
    fn test_progress_after_each_step() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();

        for step in ["a", "b", "c", "d"] {
            tracker.dispatch(&mut instance, step, now).unwrap();
            tracker.record_success(&mut instance, step, json!(step), now);
        }

        assert_eq!(instance.progress, 100);
        assert_eq!(tracker.evaluate(&instance, now), Evaluation::Completed);
        assert_eq!(instance.output["d"], json!("d"));
    }

    #[test]
    fn test_retry_then_fail_required_step() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();
        let err = StepError::retryable("boom");

        tracker.dispatch(&mut instance, "a", now).unwrap();
        let effect = tracker.record_failure(&mut instance, "a", &err, now);
        let FailureEffect::Retrying { at } = effect else {
            panic!("expected retry, got {:?}", effect);
        };
        assert_eq!(at, now + chrono::Duration::milliseconds(100));

        // Not ready until the backoff elapses
        assert!(tracker.ready_steps(&instance, now).is_empty());
        assert_eq!(tracker.next_wakeup(&instance), Some(at));
        assert_eq!(tracker.ready_steps(&instance, at), vec!["a"]);

        let second = tracker.dispatch(&mut instance, "a", at).unwrap();
        assert_eq!(second.attempt, 2);
        assert!(matches!(
            tracker.record_failure(&mut instance, "a", &err, at),
            FailureEffect::Retrying { .. }
        ));

        let later = at + chrono::Duration::seconds(1);
        tracker.dispatch(&mut instance, "a", later).unwrap();
        let effect = tracker.record_failure(&mut instance, "a", &err, later);
        match effect {
            FailureEffect::InstanceFailed(error) => {
                assert_eq!(error.code, InstanceError::STEP_FAILED);
                assert!(error.message.contains("boom"));
            }
            other => panic!("expected instance failure, got {:?}", other),
        }
        assert_eq!(instance.pointer("a").unwrap().retry_count, 2);
        assert_eq!(instance.pointer("a").unwrap().status, PointerStatus::Failed);

        // Each attempt keeps its own record
        let attempts: Vec<_> = instance.attempts("a").collect();
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            attempts.iter().map(|p| p.retry_count).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(attempts
            .iter()
            .all(|p| p.status == PointerStatus::Failed && p.end_time.is_some()));
        assert_eq!(attempts[0].error.as_deref(), Some("boom"));
        assert_eq!(attempts[1].start_time, Some(at));
    }

    #[test]
    fn test_permanent_error_skips_retries() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();
        tracker.dispatch(&mut instance, "a", now).unwrap();

        let effect = tracker.record_failure(&mut instance, "a", &StepError::permanent("bad input"), now);
        match effect {
            FailureEffect::InstanceFailed(error) => {
                assert_eq!(error.message, "Step 'a' failed: bad input");
            }
            other => panic!("expected instance failure, got {:?}", other),
        }
        assert_eq!(instance.pointer("a").unwrap().retry_count, 0);
        assert_eq!(instance.pointers.len(), 4);
    }

    #[test]
    fn test_optional_failure_unblocks_dependents() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();

        tracker.dispatch(&mut instance, "a", now).unwrap();
        tracker.record_success(&mut instance, "a", json!(null), now);
        tracker.dispatch(&mut instance, "b", now).unwrap();
        tracker.record_success(&mut instance, "b", json!(null), now);
        tracker.dispatch(&mut instance, "c", now).unwrap();

        let effect = tracker.record_failure(&mut instance, "c", &StepError::permanent("nope"), now);
        assert_eq!(effect, FailureEffect::OptionalStepFailed);
        assert_eq!(tracker.ready_steps(&instance, now), vec!["d"]);
        assert_eq!(instance.progress, 75);
    }

    #[test]
    fn test_interrupt_invalidates_generation() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();
        let ticket = tracker.dispatch(&mut instance, "a", now).unwrap();
        assert!(tracker.is_current("a", ticket.generation));
        assert_eq!(ticket.pointer_id, instance.pointer("a").unwrap().id);

        assert_eq!(tracker.interrupt_running(&mut instance), 1);
        assert!(!tracker.is_current("a", ticket.generation));
        assert_eq!(instance.pointer("a").unwrap().status, PointerStatus::Pending);
        assert!(instance.pointers.iter().all(|p| !p.active));

        let again = tracker.dispatch(&mut instance, "a", now).unwrap();
        assert_eq!(again.attempt, 1);
    }

    #[test]
    fn test_cancel_remaining() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();
        tracker.dispatch(&mut instance, "a", now).unwrap();
        tracker.record_success(&mut instance, "a", json!(null), now);
        tracker.dispatch(&mut instance, "b", now).unwrap();

        assert_eq!(tracker.cancel_remaining(&mut instance, now), 3);
        assert_eq!(instance.pointer("a").unwrap().status, PointerStatus::Completed);
        assert!(instance.pointers.iter().all(|p| p.status.is_terminal() && !p.active));
    }

    #[test]
    fn test_stalled_when_required_dependency_failed() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();
        tracker.dispatch(&mut instance, "a", now).unwrap();
        tracker.record_failure(&mut instance, "a", &StepError::permanent("x"), now);

        match tracker.evaluate(&instance, now) {
            Evaluation::Stalled(blocked) => assert!(blocked.contains(&"b".to_string())),
            other => panic!("expected stall, got {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_rejects_non_pending() {
        let (mut tracker, mut instance) = setup(4);
        let now = Utc::now();
        tracker.dispatch(&mut instance, "a", now).unwrap();
        assert!(tracker.dispatch(&mut instance, "a", now).is_none());
        assert!(tracker.dispatch(&mut instance, "ghost", now).is_none());
    }
}
