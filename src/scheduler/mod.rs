//! Recurring Workflow Launches
//!
//! - [`cron`]: Cron parsing and next-run computation
//! - [`model`]: Schedule records, creation config and patches
//! - [`service`]: The tick loop that launches due schedules

pub mod cron;
pub mod model;
pub mod service;

pub use model::{OverlapPolicy, ScheduleConfig, ScheduleId, SchedulePatch, WorkflowSchedule};
pub use service::{Scheduler, TickReport};
