//! Execution History
//!
//! Immutable archive of terminated instances.
//!
//! - [`store`]: Record type and the async [`HistoryStore`] contract
//! - [`memory`]: In-process implementation
//! - [`file`]: One JSON file per record on disk

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileHistoryStore;
pub use memory::InMemoryHistoryStore;
pub use store::{DeleteOutcome, HistoryRecord, HistoryStore};
