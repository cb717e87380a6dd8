// ============================================================================
// Entity Manager
// ============================================================================
//
// Lifecycle operations over managed entities:
//
//   Transient --persist/merge--> Managed --remove--> Removed
//
// Every operation walks join references according to their cascade
// policy, with one GraphContext per call so cyclic graphs terminate.
// Removal is the exception: it deletes the entity's own row and never
// cascades, whatever the join declares.
//
// Futures returned here hold managed entities and are therefore not Send.
// Drive them on a current-thread runtime or a LocalSet.
//
// ============================================================================

pub mod batch;
pub mod context;
pub mod lifecycle;
pub mod load;
pub mod merge;
pub mod persist;

pub use batch::{BatchReport, FlushedMutator};

use crate::config::MapperConfig;
use crate::core::{MapError, Result};
use crate::entity::{EntityInstance, ManagedEntity};
use crate::metadata::EntityRegistry;
use context::GraphContext;
use std::sync::Arc;

/// Facade over persistence and batch operations.
///
/// Holds only shared, immutable state, so one manager can serve any number
/// of tasks. The entities it hands out are single-task.
#[derive(Debug, Clone)]
pub struct EntityManager {
    registry: Arc<EntityRegistry>,
    config: MapperConfig,
}

impl EntityManager {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self {
            registry,
            config: MapperConfig::default(),
        }
    }

    pub fn with_config(registry: Arc<EntityRegistry>, config: MapperConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { registry, config })
    }

    /// Manager over the process-wide registry
    pub fn from_global() -> Result<Self> {
        EntityRegistry::global()
            .map(Self::new)
            .ok_or_else(|| MapError::Config("no global entity registry is installed".to_string()))
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub(crate) fn context(&self) -> GraphContext {
        GraphContext::new(self.config.max_cascade_depth)
    }
}

/// Managed handle of an instance, in any lifecycle state
pub(crate) fn handle(instance: EntityInstance) -> Result<ManagedEntity> {
    match instance {
        EntityInstance::Managed(managed) => Ok(managed),
        EntityInstance::Transient(entity) => Err(MapError::NotManaged(entity.entity_type().to_string())),
    }
}

/// Managed handle of an instance that has not been removed
pub(crate) fn live_handle(instance: EntityInstance) -> Result<ManagedEntity> {
    let managed = handle(instance)?;
    if managed.is_removed() {
        return Err(MapError::NotManaged(managed.entity_type()));
    }
    Ok(managed)
}
