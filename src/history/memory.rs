//! In-memory History Store
//!
//! Used by tests and by engines configured without a history directory.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::{HistoryRecord, HistoryStore};
use crate::error::{EngineError, Result};
use crate::instance::InstanceId;
use crate::workflow::DefinitionRef;

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<HashMap<InstanceId, HistoryRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<()> {
        let mut records = self.records.write();
        let id = record.id();
        if records.contains_key(&id) {
            return Err(EngineError::validation(format!(
                "History record {} already exists",
                id
            )));
        }
        records.insert(id, record);
        Ok(())
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<HistoryRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn records_for(&self, definition: &DefinitionRef) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| &r.definition_ref() == definition)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &InstanceId) -> Result<()> {
        self.records
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found("history record", id))
    }

    async fn clear(&self, definition: &DefinitionRef) -> Result<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| &r.definition_ref() != definition);
        Ok(before - records.len())
    }
}
