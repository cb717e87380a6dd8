pub mod cascade;
pub mod entity_meta;
pub mod property;
pub mod registry;

pub use cascade::{Cascade, CascadeType};
pub use entity_meta::EntityMeta;
pub use property::{JoinMeta, PropertyKind, PropertyMeta};
pub use registry::{EntityDefinition, EntityRegistry, RegistryBuilder};
