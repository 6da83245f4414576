//! Workflow Definition Module
//!
//! Versioned step graphs that instances are started from.
//!
//! # Structure
//!
//! - [`model`]: Definitions, steps, configuration and references
//! - [`validator`]: Graph well-formedness and dependency ordering
//! - [`registry`]: Keyed store with activate/deactivate
//! - [`parser`]: YAML loading and saving

pub mod model;
pub mod parser;
pub mod registry;
pub mod validator;

pub use model::{Configuration, DefinitionRef, StepDefinition, WorkflowDefinition};
pub use parser::{load_definition, parse_definition};
pub use registry::DefinitionRegistry;
