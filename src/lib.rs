// ============================================================================
// RowMapper Library
// ============================================================================
//
// Object mapping over a wide-column row store. Entities are read and
// written by primary key; containers and fields of managed entities track
// their own mutations so that only changed columns go back to the store.
//
// ============================================================================

//! # Examples
//!
//! ```
//! use rowmapper::{CascadeType, Entity, EntityDefinition, EntityManager, MemoryStore, RegistryBuilder};
//!
//! # fn main() -> rowmapper::Result<()> {
//! let store = MemoryStore::new();
//! let registry = RegistryBuilder::new()
//!     .register(EntityDefinition::new("Address", store.row_access("addresses")).id("id").property("city"))
//!     .register(
//!         EntityDefinition::new("User", store.row_access("users"))
//!             .id("id")
//!             .property("name")
//!             .list("tags")
//!             .join("home", "Address", CascadeType::Persist),
//!     )
//!     .build()?;
//! let manager = EntityManager::new(registry);
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! runtime.block_on(async {
//!     let user = Entity::new("User")
//!         .with("id", 1)
//!         .with("name", "alice")
//!         .with_join("home", Entity::new("Address").with("id", 10).with("city", "Lyon"));
//!     let user = manager.persist(user).await?;
//!
//!     user.list("tags")?.push("admin");
//!     assert_eq!(user.dirty_properties(), vec!["tags".to_string()]);
//!     manager.merge(&user).await?;
//!     assert!(user.dirty_properties().is_empty());
//!
//!     let loaded = manager.find("User", 1).await?.expect("user row exists");
//!     assert_eq!(loaded.list("tags")?.len(), 1);
//!     Ok::<(), rowmapper::MapError>(())
//! })
//! # }
//! ```

pub mod config;
pub mod core;
pub mod entity;
pub mod manager;
pub mod metadata;
pub mod storage;
pub mod tracking;

// Re-export main types for convenience
pub use config::MapperConfig;
pub use core::{Columns, FlushFailure, MapError, Result, StoreError, StoreResult, Value};
pub use entity::{Entity, EntityInstance, FieldValue, LifecycleState, ManagedEntity, Property};
pub use manager::{BatchReport, EntityManager, FlushedMutator};
pub use metadata::{
    Cascade, CascadeType, EntityDefinition, EntityMeta, EntityRegistry, PropertyKind, RegistryBuilder,
};
pub use storage::{MemoryStore, Mutator, RowAccess, RowWrite, StoreEvent};
pub use tracking::{DirtyFlag, TrackedList, TrackedMap, TrackedSet};
