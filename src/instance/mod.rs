//! Workflow Instance Module
//!
//! Runtime state of workflow instances.
//!
//! # Structure
//!
//! - [`status`]: Lifecycle state machine for instances and pointers
//! - [`model`]: Instance and execution pointer records
//! - [`store`]: Concurrent registry of active instances

pub mod model;
pub mod status;
pub mod store;

pub use model::{
    Attention, ExecutionPointer, InstanceError, InstanceId, StartRequest, WorkflowInstance,
};
pub use status::{InstanceStatus, PointerStatus};
pub use store::{InstanceFilter, InstanceStore, Mailbox, SharedInstance};
