//! Instance Store
//!
//! Keyed registry of active instances. Each entry pairs a snapshot that
//! only the owning actor writes with the actor's mailbox. Readers clone
//! snapshots under a short read lock and never wait on step execution.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::model::{InstanceId, WorkflowInstance};
use super::status::InstanceStatus;
use crate::execution::actor::InstanceCommand;
use crate::pagination::{paginate, sort_instances, Page, Pagination};

pub type Mailbox = mpsc::UnboundedSender<InstanceCommand>;
pub type SharedInstance = Arc<RwLock<WorkflowInstance>>;

struct InstanceEntry {
    snapshot: SharedInstance,
    mailbox: Mailbox,
}

/// Filter for instance listing. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceFilter {
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub status: Vec<InstanceStatus>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.workflow_name
            .as_ref()
            .map_or(true, |n| &instance.workflow_name == n)
            && self
                .namespace
                .as_ref()
                .map_or(true, |ns| &instance.namespace == ns)
            && (self.status.is_empty() || self.status.contains(&instance.status))
    }
}

#[derive(Default)]
pub struct InstanceStore {
    entries: DashMap<InstanceId, InstanceEntry>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, snapshot: SharedInstance, mailbox: Mailbox) {
        let id = snapshot.read().id;
        self.entries.insert(id, InstanceEntry { snapshot, mailbox });
    }

    pub fn remove(&self, id: &InstanceId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns a copy of the instance's current state.
    pub fn get(&self, id: &InstanceId) -> Option<WorkflowInstance> {
        self.entries.get(id).map(|e| e.snapshot.read().clone())
    }

    pub fn mailbox(&self, id: &InstanceId) -> Option<Mailbox> {
        self.entries.get(id).map(|e| e.mailbox.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the instance is still held and not terminal.
    pub fn is_running(&self, id: &InstanceId) -> bool {
        self.entries
            .get(id)
            .map_or(false, |e| !e.snapshot.read().status.is_terminal())
    }

    pub fn snapshot_all(&self) -> Vec<WorkflowInstance> {
        self.entries
            .iter()
            .map(|e| e.snapshot.read().clone())
            .collect()
    }

    pub fn list(&self, filter: &InstanceFilter, pagination: &Pagination) -> Page<WorkflowInstance> {
        let mut matching: Vec<WorkflowInstance> = self
            .snapshot_all()
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();

        sort_instances(
            &mut matching,
            pagination.sort_field,
            pagination.sort_order,
            |i| i,
        );
        paginate(matching, pagination)
    }
}
