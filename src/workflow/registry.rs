//! Definition Registry
//!
//! Keyed store of workflow definitions. Instances hold an `Arc` to the
//! definition they were started from, so activating, deactivating or
//! re-registering a definition never affects instances already running.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;
use parking_lot::RwLock;

use super::model::{DefinitionRef, WorkflowDefinition};
use super::validator::validate_definition;
use crate::error::{EngineError, Result};

#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: RwLock<BTreeMap<DefinitionRef, Arc<WorkflowDefinition>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a definition, replacing any previous version
    /// registered under the same reference.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<DefinitionRef> {
        validate_definition(&definition)?;

        let reference = definition.reference();
        let replaced = self
            .definitions
            .write()
            .insert(reference.clone(), Arc::new(definition))
            .is_some();

        info!(
            "{} workflow definition {}",
            if replaced { "Updated" } else { "Registered" },
            reference
        );
        Ok(reference)
    }

    pub fn get(&self, reference: &DefinitionRef) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.read().get(reference).cloned()
    }

    /// Looks up a definition that may be started.
    ///
    /// Unknown and inactive definitions are both reported as `NotFound`.
    pub fn resolve_active(&self, reference: &DefinitionRef) -> Result<Arc<WorkflowDefinition>> {
        match self.get(reference) {
            Some(def) if def.is_active => Ok(def),
            _ => Err(EngineError::not_found("active workflow definition", reference)),
        }
    }

    /// Sets `is_active` on every version of `namespace.name`.
    ///
    /// Returns the number of versions touched.
    pub fn set_active(&self, namespace: &str, name: &str, active: bool) -> Result<usize> {
        let mut definitions = self.definitions.write();
        let mut touched = 0;

        for (reference, def) in definitions.iter_mut() {
            if reference.same_workflow(namespace, name) {
                Arc::make_mut(def).is_active = active;
                touched += 1;
            }
        }

        if touched == 0 {
            return Err(EngineError::not_found(
                "workflow",
                format!("{}.{}", namespace, name),
            ));
        }

        info!(
            "{} {} version(s) of {}.{}",
            if active { "Activated" } else { "Deactivated" },
            touched,
            namespace,
            name
        );
        Ok(touched)
    }

    pub fn list(&self) -> Vec<WorkflowDefinition> {
        self.definitions
            .read()
            .values()
            .map(|def| def.as_ref().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }
}
