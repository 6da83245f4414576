//! Engine Assembly
//!
//! Wires the registry, instance store, history store, lifecycle
//! controller, scheduler and Control API together from an
//! [`EngineConfig`].

use std::sync::Arc;

use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::ControlApi;
use crate::config::{EngineConfig, EngineDocument};
use crate::error::Result;
use crate::execution::{ActorContext, LifecycleController, StepExecutor};
use crate::history::{FileHistoryStore, HistoryStore, InMemoryHistoryStore};
use crate::instance::InstanceStore;
use crate::monitoring::EventBus;
use crate::scheduler::Scheduler;
use crate::workflow::DefinitionRegistry;

pub struct Engine {
    registry: Arc<DefinitionRegistry>,
    lifecycle: Arc<LifecycleController>,
    scheduler: Arc<Scheduler>,
    api: Arc<ControlApi>,
}

impl Engine {
    /// Builds an engine whose steps are run by `executor`.
    ///
    /// History goes to `history_dir` when configured, otherwise it is kept
    /// in memory.
    pub async fn build(config: &EngineConfig, executor: Arc<dyn StepExecutor>) -> Result<Self> {
        config.validate()?;

        let history: Arc<dyn HistoryStore> = match &config.history_dir {
            Some(dir) => {
                info!("History directory: {}", dir.display());
                Arc::new(FileHistoryStore::open(dir.clone()).await?)
            }
            None => {
                info!("History kept in memory");
                Arc::new(InMemoryHistoryStore::new())
            }
        };

        let ctx = ActorContext {
            store: Arc::new(InstanceStore::new()),
            history,
            executor,
            events: EventBus::new(config.event_capacity),
            retry_policy: config.retry.clone(),
            persistence_policy: config.persistence_policy(),
            max_parallelism: config.max_parallelism,
        };

        let registry = Arc::new(DefinitionRegistry::new());
        let lifecycle = Arc::new(LifecycleController::new(Arc::clone(&registry), ctx));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&lifecycle), config.tick()));
        let api = Arc::new(ControlApi::new(Arc::clone(&lifecycle), Arc::clone(&scheduler)));

        Ok(Self {
            registry,
            lifecycle,
            scheduler,
            api,
        })
    }

    /// Registers every definition and then every schedule of a document.
    pub fn load_document(&self, document: &EngineDocument) -> Result<()> {
        for definition in &document.definitions {
            self.registry.register(definition.clone())?;
        }
        for schedule in &document.schedules {
            self.scheduler.create(schedule.clone())?;
        }
        info!(
            "Registered {} definitions and {} schedules",
            document.definitions.len(),
            document.schedules.len()
        );
        Ok(())
    }

    /// Runs the scheduler loop on the runtime until `shutdown` flips to true.
    pub fn spawn_scheduler(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.scheduler).run(shutdown))
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn api(&self) -> &Arc<ControlApi> {
        &self.api
    }
}
