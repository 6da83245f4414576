//! FlowRunner - Workflow Execution Engine
//!
//! Runs multi-step workflow instances through a controlled lifecycle,
//! launches them on cron schedules and archives every terminated run.
//!
//! # Architecture
//!
//! - [`workflow`]: Definitions, validation, YAML loading and the registry
//! - [`instance`]: Instance and pointer model plus the active store
//! - [`execution`]: Lifecycle controller, per-instance actors and retries
//! - [`scheduler`]: Cron schedules evaluated on a tick
//! - [`history`]: Archive of terminated instances
//! - [`api`]: `{success, message, data}` façade for administration tools
//! - [`monitoring`]: Engine events and execution timelines
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowrunner::{CommandExecutor, Engine, EngineConfig, StartRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::build(&EngineConfig::default(), Arc::new(CommandExecutor::new())).await?;
//!     engine.registry().register(flowrunner::load_definition("pipeline.yaml")?)?;
//!
//!     let response = engine.api().start("core.Pipeline@1.0.0", StartRequest::default());
//!     println!("{}", response.message);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod history;
pub mod instance;
pub mod monitoring;
pub mod pagination;
pub mod scheduler;
pub mod workflow;

// Re-export commonly used types
pub use api::{ApiResponse, ControlApi};
pub use config::{EngineConfig, EngineDocument};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use execution::{CommandExecutor, LifecycleController, StepExecutor};
pub use instance::{InstanceId, InstanceStatus, StartRequest, WorkflowInstance};
pub use scheduler::{ScheduleConfig, Scheduler};
pub use workflow::{load_definition, DefinitionRef, WorkflowDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
