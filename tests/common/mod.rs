#![allow(dead_code)]

use rowmapper::{
    Cascade, CascadeType, Columns, Entity, EntityDefinition, EntityManager, ManagedEntity,
    MapperConfig, MemoryStore, RegistryBuilder, Value,
};

pub struct Fixture {
    pub store: MemoryStore,
    pub manager: EntityManager,
}

pub fn fixture() -> Fixture {
    fixture_with(MapperConfig::default())
}

/// Country <- Address <- User, plus a self-referencing Node
pub fn fixture_with(config: MapperConfig) -> Fixture {
    let store = MemoryStore::new();
    let registry = RegistryBuilder::new()
        .register(
            EntityDefinition::new("Country", store.row_access("countries"))
                .id("code")
                .property("name"),
        )
        .register(
            EntityDefinition::new("Address", store.row_access("addresses"))
                .id("id")
                .property("city")
                .join("country", "Country", Cascade::NONE),
        )
        .register(
            EntityDefinition::new("User", store.row_access("users"))
                .id("id")
                .column("name", "full_name")
                .property("age")
                .list("tags")
                .set("roles")
                .map("prefs")
                .join("home", "Address", CascadeType::Persist)
                .join("billing", "Address", Cascade::NONE)
                .join("work", "Address", Cascade::ALL)
                .join("mentor", "User", CascadeType::Refresh),
        )
        .register(
            EntityDefinition::new("Node", store.row_access("nodes"))
                .id("id")
                .property("label")
                .join("next", "Node", Cascade::ALL),
        )
        .build()
        .unwrap();

    let manager = EntityManager::with_config(registry, config).unwrap();
    Fixture { store, manager }
}

pub fn user(id: i64, name: &str) -> Entity {
    Entity::new("User").with("id", id).with("name", name)
}

pub fn address(id: i64, city: &str) -> Entity {
    Entity::new("Address").with("id", id).with("city", city)
}

pub fn node(id: i64, label: &str) -> Entity {
    Entity::new("Node").with("id", id).with("label", label)
}

pub fn columns(pairs: &[(&str, Value)]) -> Columns {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Managed target of a join, panicking when the join is empty or transient
pub fn managed_join(entity: &ManagedEntity, name: &str) -> ManagedEntity {
    entity
        .join(name)
        .unwrap()
        .and_then(|target| target.as_managed().cloned())
        .unwrap_or_else(|| panic!("join '{}' has no managed target", name))
}
