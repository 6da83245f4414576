//! History Store Contract
//!
//! Terminated instances are archived as immutable [`HistoryRecord`]s. A
//! record is written once and only ever removed as a whole.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::instance::{InstanceId, WorkflowInstance};
use crate::pagination::{paginate, sort_instances, Page, Pagination};
use crate::workflow::DefinitionRef;

/// Snapshot of a terminated instance with its final pointers and raw
/// input/output payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub instance: WorkflowInstance,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Wraps a terminal instance. Non-terminal instances are rejected.
    pub fn from_instance(instance: WorkflowInstance) -> Result<Self> {
        if !instance.status.is_terminal() {
            return Err(EngineError::validation(format!(
                "Instance {} is {} and cannot be archived",
                instance.id, instance.status
            )));
        }
        Ok(Self {
            instance,
            recorded_at: Utc::now(),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.instance.id
    }

    pub fn definition_ref(&self) -> DefinitionRef {
        self.instance.definition_ref()
    }
}

/// Per-id result of a batch deletion.
pub type DeleteOutcome = (InstanceId, Result<()>);

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Stores a new record. Writing an id twice is a validation error.
    async fn append(&self, record: HistoryRecord) -> Result<()>;

    async fn get(&self, id: &InstanceId) -> Result<Option<HistoryRecord>>;

    /// Every record of one definition, unordered.
    async fn records_for(&self, definition: &DefinitionRef) -> Result<Vec<HistoryRecord>>;

    /// Removes a record. Missing ids are `NotFound`.
    async fn delete(&self, id: &InstanceId) -> Result<()>;

    /// Removes every record of one definition, returning how many.
    async fn clear(&self, definition: &DefinitionRef) -> Result<usize>;

    /// Sorted, paginated records of one definition.
    async fn query(&self, definition: &DefinitionRef, pagination: &Pagination) -> Result<Page<HistoryRecord>> {
        let mut records = self.records_for(definition).await?;
        sort_instances(
            &mut records,
            pagination.sort_field,
            pagination.sort_order,
            |r| &r.instance,
        );
        Ok(paginate(records, pagination))
    }

    /// Deletes each id independently; one failure does not stop the rest.
    async fn delete_batch(&self, ids: &[InstanceId]) -> Vec<DeleteOutcome> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            outcomes.push((*id, self.delete(id).await));
        }
        outcomes
    }
}
