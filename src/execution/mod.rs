//! Workflow Execution Module
//!
//! Drives instances from `PENDING` to a terminal status.
//!
//! # Architecture
//!
//! - [`lifecycle`]: Start and control commands, single and batch
//! - [`actor`]: Per-instance task owning the pointer tracker
//! - [`tracker`]: Step readiness, retries and progress
//! - [`retry`]: Backoff policy
//! - [`executor`]: Contract for pluggable step logic
//! - [`command`]: Bash-backed executor

pub mod actor;
pub mod command;
pub mod executor;
pub mod lifecycle;
pub mod retry;
pub mod tracker;

pub use actor::{ActorContext, InstanceCommand};
pub use command::CommandExecutor;
pub use executor::{StepContext, StepError, StepExecutor};
pub use lifecycle::{BatchItem, BatchOutcome, Control, LifecycleController};
pub use retry::RetryPolicy;
pub use tracker::PointerTracker;
