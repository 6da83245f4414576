//! Engine Monitoring Module
//!
//! Observability for running and finished instances.
//!
//! # Components
//!
//! - [`EventBus`]: Broadcast stream of status transitions and step results
//! - [`InstanceTimeline`]: Step start/end timing for Gantt charts

pub mod events;
pub mod timeline;

pub use events::{EngineEvent, EventBus};
pub use timeline::{InstanceTimeline, TimelineEntry};
