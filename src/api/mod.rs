//! Control API Surface
//!
//! - [`control`]: Queries and mutations over the engine
//! - [`envelope`]: `{success, message, data?}` responses
//! - [`boundary`]: Status translation for external callers

pub mod boundary;
pub mod control;
pub mod envelope;

pub use boundary::{InstanceQuery, WireStatus};
pub use control::{ControlApi, HistoryList, InstanceList, SelectionResult, WorkflowSelection};
pub use envelope::ApiResponse;
