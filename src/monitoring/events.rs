//! Engine Events
//!
//! Broadcast stream of what happens to instances. Subscribers that fall
//! behind lose the oldest events; the engine never waits on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::instance::{Attention, InstanceId, InstanceStatus, PointerStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    StatusChanged {
        instance_id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
        at: DateTime<Utc>,
    },
    StepFinished {
        instance_id: InstanceId,
        step_id: String,
        status: PointerStatus,
        retry_count: u32,
    },
    Archived {
        instance_id: InstanceId,
    },
    AttentionRequired {
        instance_id: InstanceId,
        attention: Attention,
    },
}

impl EngineEvent {
    pub fn instance_id(&self) -> InstanceId {
        match self {
            Self::StatusChanged { instance_id, .. }
            | Self::StepFinished { instance_id, .. }
            | Self::Archived { instance_id }
            | Self::AttentionRequired { instance_id, .. } => *instance_id,
        }
    }
}

/// Cloneable handle for publishing and subscribing.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
