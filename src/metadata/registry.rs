// ============================================================================
// Entity Metadata Registry
// ============================================================================
//
// Built once from entity definitions, then read concurrently without locks.
// All join targets and cascade policies are resolved at build time.
//
// ============================================================================

use super::cascade::{Cascade, CascadeType};
use super::entity_meta::EntityMeta;
use super::property::{JoinMeta, PropertyKind, PropertyMeta};
use crate::core::{MapError, Result};
use crate::storage::RowAccess;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

static GLOBAL_REGISTRY: OnceLock<Arc<EntityRegistry>> = OnceLock::new();

#[derive(Debug, Clone)]
enum DefinedKind {
    Plain(PropertyKind),
    Join { target_type: String, cascade: Cascade },
}

#[derive(Debug, Clone)]
struct PropertyDefinition {
    name: String,
    column: String,
    kind: DefinedKind,
}

/// Declaration of one entity type, consumed by [`RegistryBuilder`].
///
/// # Examples
///
/// ```
/// use rowmapper::{CascadeType, EntityDefinition, MemoryStore};
///
/// let store = MemoryStore::new();
/// let user = EntityDefinition::new("User", store.row_access("users"))
///     .id("id")
///     .property("name")
///     .column("email", "email_address")
///     .set("roles")
///     .join("address", "Address", CascadeType::Persist);
/// assert_eq!(user.entity_type(), "User");
/// ```
#[derive(Clone)]
pub struct EntityDefinition {
    entity_type: String,
    id_property: Option<String>,
    properties: Vec<PropertyDefinition>,
    row_access: Arc<dyn RowAccess>,
}

impl EntityDefinition {
    pub fn new(entity_type: impl Into<String>, row_access: Arc<dyn RowAccess>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id_property: None,
            properties: Vec::new(),
            row_access,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Declare the primary-key property
    pub fn id(mut self, name: &str) -> Self {
        self.id_property = Some(name.to_string());
        self.push(name, name, DefinedKind::Plain(PropertyKind::Simple))
    }

    /// Scalar property stored in a column of the same name
    pub fn property(self, name: &str) -> Self {
        self.push(name, name, DefinedKind::Plain(PropertyKind::Simple))
    }

    /// Scalar property stored in a differently named column
    pub fn column(self, name: &str, column: &str) -> Self {
        self.push(name, column, DefinedKind::Plain(PropertyKind::Simple))
    }

    pub fn list(self, name: &str) -> Self {
        self.push(name, name, DefinedKind::Plain(PropertyKind::List))
    }

    pub fn set(self, name: &str) -> Self {
        self.push(name, name, DefinedKind::Plain(PropertyKind::Set))
    }

    pub fn map(self, name: &str) -> Self {
        self.push(name, name, DefinedKind::Plain(PropertyKind::Map))
    }

    /// Join reference to `target_type`. The column stores the target's key.
    pub fn join(self, name: &str, target_type: &str, cascade: impl Into<Cascade>) -> Self {
        self.push(
            name,
            name,
            DefinedKind::Join {
                target_type: target_type.to_string(),
                cascade: cascade.into(),
            },
        )
    }

    fn push(mut self, name: &str, column: &str, kind: DefinedKind) -> Self {
        self.properties.push(PropertyDefinition {
            name: name.to_string(),
            column: column.to_string(),
            kind,
        });
        self
    }
}

/// Collects entity definitions and builds an immutable [`EntityRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    definitions: Vec<EntityDefinition>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, definition: EntityDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Validate every definition and resolve join targets.
    pub fn build(self) -> Result<Arc<EntityRegistry>> {
        let mut targets: HashMap<String, JoinTarget> = HashMap::new();
        for definition in &self.definitions {
            let target = JoinTarget {
                id_property: definition.id_property.clone(),
                row_access: definition.row_access.clone(),
            };
            if targets
                .insert(definition.entity_type.clone(), target)
                .is_some()
            {
                return Err(MapError::InvalidMapping(format!(
                    "Entity type '{}' is registered twice",
                    definition.entity_type
                )));
            }
        }

        let mut metas = HashMap::with_capacity(self.definitions.len());
        for definition in self.definitions {
            let meta = resolve_definition(definition, &targets)?;
            debug!(
                entity_type = meta.entity_type(),
                row_group = meta.row_group(),
                "registered entity metadata"
            );
            metas.insert(meta.entity_type().to_string(), Arc::new(meta));
        }

        Ok(Arc::new(EntityRegistry { metas }))
    }
}

struct JoinTarget {
    id_property: Option<String>,
    row_access: Arc<dyn RowAccess>,
}

fn resolve_definition(
    definition: EntityDefinition,
    targets: &HashMap<String, JoinTarget>,
) -> Result<EntityMeta> {
    let entity_type = definition.entity_type;
    let Some(id_property) = definition.id_property else {
        return Err(MapError::InvalidMapping(format!(
            "Entity type '{}' declares no primary key property",
            entity_type
        )));
    };

    let mut names = HashSet::new();
    let mut columns = HashSet::new();
    let mut properties = Vec::with_capacity(definition.properties.len());

    for property in definition.properties {
        if !names.insert(property.name.clone()) {
            return Err(MapError::InvalidMapping(format!(
                "Property '{}' is declared twice on '{}'",
                property.name, entity_type
            )));
        }
        if property.name != id_property && !columns.insert(property.column.clone()) {
            return Err(MapError::InvalidMapping(format!(
                "Column '{}' is mapped twice on '{}'",
                property.column, entity_type
            )));
        }

        let meta = match property.kind {
            DefinedKind::Plain(kind) => PropertyMeta::new(property.name, property.column, kind, None),
            DefinedKind::Join {
                target_type,
                cascade,
            } => {
                if property.name == id_property {
                    return Err(MapError::InvalidMapping(format!(
                        "Primary key '{}' of '{}' cannot be a join",
                        property.name, entity_type
                    )));
                }
                let target = targets
                    .get(&target_type)
                    .ok_or_else(|| MapError::NotMapped(target_type.clone()))?;
                let Some(target_id_property) = target.id_property.clone() else {
                    return Err(MapError::InvalidMapping(format!(
                        "Join target '{}' declares no primary key property",
                        target_type
                    )));
                };
                if cascade.applies_to(CascadeType::Remove) && cascade != Cascade::ALL {
                    warn!(
                        entity_type = entity_type.as_str(),
                        property = property.name.as_str(),
                        "REMOVE cascade is declared but remove never cascades to join targets"
                    );
                }
                PropertyMeta::new(
                    property.name,
                    property.column,
                    PropertyKind::Join,
                    Some(JoinMeta {
                        target_type,
                        target_id_property,
                        cascade,
                        row_access: target.row_access.clone(),
                    }),
                )
            }
        };
        properties.push(Arc::new(meta));
    }

    Ok(EntityMeta::new(
        entity_type,
        id_property,
        properties,
        definition.row_access,
    ))
}

/// Read-only map of entity type to [`EntityMeta`].
#[derive(Debug)]
pub struct EntityRegistry {
    metas: HashMap<String, Arc<EntityMeta>>,
}

impl EntityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn metadata_for(&self, entity_type: &str) -> Result<&Arc<EntityMeta>> {
        self.metas
            .get(entity_type)
            .ok_or_else(|| MapError::NotMapped(entity_type.to_string()))
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.metas.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.metas.keys().map(String::as_str)
    }

    /// Install the process-wide registry. Succeeds once per process.
    pub fn install_global(registry: Arc<EntityRegistry>) -> Result<()> {
        GLOBAL_REGISTRY
            .set(registry)
            .map_err(|_| MapError::GlobalRegistryInstalled)
    }

    /// The registry installed with [`EntityRegistry::install_global`]
    pub fn global() -> Option<Arc<EntityRegistry>> {
        GLOBAL_REGISTRY.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn address(store: &MemoryStore) -> EntityDefinition {
        EntityDefinition::new("Address", store.row_access("addresses"))
            .id("id")
            .property("city")
    }

    #[test]
    fn test_build_resolves_join_targets() {
        let store = MemoryStore::new();
        let registry = RegistryBuilder::new()
            .register(address(&store))
            .register(
                EntityDefinition::new("User", store.row_access("users"))
                    .id("id")
                    .column("name", "full_name")
                    .list("tags")
                    .join("home", "Address", CascadeType::Persist),
            )
            .build()
            .unwrap();

        let user = registry.metadata_for("User").unwrap();
        assert_eq!(user.row_group(), "users");
        assert_eq!(user.id_property(), "id");
        assert_eq!(user.property("name").unwrap().column(), "full_name");
        assert_eq!(user.column_properties().count(), 3);

        let home = user.property("home").unwrap();
        let join = home.join().unwrap();
        assert_eq!(join.target_type, "Address");
        assert_eq!(join.row_access.row_group(), "addresses");
        assert!(home.cascade().applies_to(CascadeType::Persist));
        assert!(!home.cascade().applies_to(CascadeType::Merge));
    }

    #[test]
    fn test_unknown_type_is_not_mapped() {
        let store = MemoryStore::new();
        let registry = RegistryBuilder::new().register(address(&store)).build().unwrap();
        let err = registry.metadata_for("Order").unwrap_err();
        assert!(matches!(err, MapError::NotMapped(name) if name == "Order"));
    }

    #[test]
    fn test_join_to_unregistered_type_fails() {
        let store = MemoryStore::new();
        let err = RegistryBuilder::new()
            .register(
                EntityDefinition::new("User", store.row_access("users"))
                    .id("id")
                    .join("home", "Address", Cascade::NONE),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, MapError::NotMapped(name) if name == "Address"));
    }

    #[test]
    fn test_invalid_definitions_are_rejected() {
        let store = MemoryStore::new();

        let no_id = RegistryBuilder::new()
            .register(EntityDefinition::new("User", store.row_access("users")).property("name"))
            .build();
        assert!(matches!(no_id, Err(MapError::InvalidMapping(_))));

        let duplicate_column = RegistryBuilder::new()
            .register(
                EntityDefinition::new("User", store.row_access("users"))
                    .id("id")
                    .property("name")
                    .column("alias", "name"),
            )
            .build();
        assert!(matches!(duplicate_column, Err(MapError::InvalidMapping(_))));

        let twice = RegistryBuilder::new()
            .register(address(&store))
            .register(address(&store))
            .build();
        assert!(matches!(twice, Err(MapError::InvalidMapping(_))));
    }
}
