//! Schedule Evaluation
//!
//! Holds the schedule definitions and launches due ones on every tick.
//! A tick never stops early: a failing schedule is recorded and the
//! remaining schedules are still evaluated.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::cron::CronSpec;
use super::model::{OverlapPolicy, ScheduleConfig, ScheduleId, SchedulePatch, WorkflowSchedule};
use crate::error::{EngineError, Result};
use crate::execution::LifecycleController;
use crate::instance::{InstanceId, StartRequest};
use crate::workflow::DefinitionRef;

struct ScheduleEntry {
    schedule: WorkflowSchedule,
    spec: CronSpec,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub launched: Vec<(ScheduleId, InstanceId)>,
    /// Due while the previous run was active under the skip policy
    pub skipped: Vec<ScheduleId>,
    /// Found more than one tick late
    pub missed: Vec<ScheduleId>,
    pub failed: Vec<(ScheduleId, String)>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.launched.is_empty()
            && self.skipped.is_empty()
            && self.missed.is_empty()
            && self.failed.is_empty()
    }
}

pub struct Scheduler {
    lifecycle: Arc<LifecycleController>,
    tick: Duration,
    schedules: RwLock<BTreeMap<ScheduleId, ScheduleEntry>>,
}

impl Scheduler {
    pub fn new(lifecycle: Arc<LifecycleController>, tick: Duration) -> Self {
        Self {
            lifecycle,
            tick: tick.max(Duration::from_millis(10)),
            schedules: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Validates and registers a schedule. The target definition must
    /// exist but need not be active.
    pub fn create(&self, config: ScheduleConfig) -> Result<WorkflowSchedule> {
        if config.name.trim().is_empty() {
            return Err(EngineError::validation("Schedule name must not be empty"));
        }
        let spec = CronSpec::parse(&config.cron, &config.timezone)?;
        if self.lifecycle.registry().get(&config.workflow_ref).is_none() {
            return Err(EngineError::not_found(
                "workflow definition",
                &config.workflow_ref,
            ));
        }

        let mut schedule = WorkflowSchedule::from_config(config);
        schedule.next_run = spec.next_after(Utc::now());

        info!(
            "Created schedule '{}' ({}) for {}, next run {:?}",
            schedule.name, schedule.cron, schedule.workflow_ref, schedule.next_run
        );

        self.schedules.write().insert(
            schedule.id,
            ScheduleEntry {
                schedule: schedule.clone(),
                spec,
            },
        );
        Ok(schedule)
    }

    /// Applies a partial update and recomputes `next_run`.
    ///
    /// An invalid cron or timezone leaves the schedule untouched.
    pub fn update(&self, id: &ScheduleId, patch: SchedulePatch) -> Result<WorkflowSchedule> {
        let mut schedules = self.schedules.write();
        let entry = schedules
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("schedule", id))?;

        let mut updated = entry.schedule.clone();
        patch.apply(&mut updated);
        if updated.name.trim().is_empty() {
            return Err(EngineError::validation("Schedule name must not be empty"));
        }
        let spec = CronSpec::parse(&updated.cron, &updated.timezone)?;
        updated.next_run = spec.next_after(Utc::now());

        info!("Updated schedule '{}', next run {:?}", updated.name, updated.next_run);
        entry.schedule = updated.clone();
        entry.spec = spec;
        Ok(updated)
    }

    pub fn delete(&self, id: &ScheduleId) -> Result<WorkflowSchedule> {
        let entry = self
            .schedules
            .write()
            .remove(id)
            .ok_or_else(|| EngineError::not_found("schedule", id))?;
        info!("Deleted schedule '{}'", entry.schedule.name);
        Ok(entry.schedule)
    }

    pub fn get(&self, id: &ScheduleId) -> Option<WorkflowSchedule> {
        self.schedules.read().get(id).map(|e| e.schedule.clone())
    }

    /// Schedules targeting `definition` (all schedules if `None`), by name.
    pub fn list(&self, definition: Option<&DefinitionRef>) -> Vec<WorkflowSchedule> {
        let mut schedules: Vec<WorkflowSchedule> = self
            .schedules
            .read()
            .values()
            .filter(|e| definition.map_or(true, |d| &e.schedule.workflow_ref == d))
            .map(|e| e.schedule.clone())
            .collect();
        schedules.sort_by(|a, b| a.name.cmp(&b.name));
        schedules
    }

    /// Evaluates every schedule against `now`.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let late_after = chrono::Duration::from_std(self.tick).unwrap_or_else(|_| chrono::Duration::zero());
        let store = self.lifecycle.store();

        let mut schedules = self.schedules.write();
        for entry in schedules.values_mut() {
            let schedule = &mut entry.schedule;

            if schedule.is_running {
                let active = schedule
                    .last_instance_id
                    .map_or(false, |id| store.is_running(&id));
                if !active {
                    debug!("Schedule '{}': previous run finished", schedule.name);
                    schedule.is_running = false;
                }
            }

            if !schedule.enabled {
                continue;
            }
            let Some(due) = schedule.next_run else {
                continue;
            };
            if due > now {
                continue;
            }

            if now - due > late_after {
                schedule.missed_count += 1;
                report.missed.push(schedule.id);
                warn!(
                    "Schedule '{}' missed its run at {} ({} missed so far), launching now",
                    schedule.name, due, schedule.missed_count
                );
            }

            schedule.next_run = entry.spec.next_after(now);

            if schedule.is_running && schedule.overlap == OverlapPolicy::Skip {
                info!(
                    "Schedule '{}': previous run still active, skipping until {:?}",
                    schedule.name, schedule.next_run
                );
                report.skipped.push(schedule.id);
                continue;
            }

            let request = StartRequest {
                data: schedule.input.clone(),
                created_by: Some(format!("schedule:{}", schedule.name)),
                schedule_id: Some(schedule.id),
                ..StartRequest::default()
            };

            match self.lifecycle.start(&schedule.workflow_ref, request) {
                Ok(instance) => {
                    schedule.last_run = Some(now);
                    schedule.run_count += 1;
                    schedule.is_running = true;
                    schedule.last_instance_id = Some(instance.id);
                    schedule.last_error = None;
                    info!(
                        "Schedule '{}' launched instance {} (run {})",
                        schedule.name, instance.id, schedule.run_count
                    );
                    report.launched.push((schedule.id, instance.id));
                }
                Err(e) => {
                    let err = EngineError::Scheduler {
                        schedule: schedule.name.clone(),
                        message: e.to_string(),
                    };
                    schedule.error_count += 1;
                    schedule.last_error = Some(e.to_string());
                    error!("{}", err);
                    report.failed.push((schedule.id, e.to_string()));
                }
            }
        }

        report
    }

    /// Ticks until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Scheduler started (tick {:?})", self.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick(Utc::now());
                    if !report.is_empty() {
                        debug!("Tick report: {:?}", report);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}
