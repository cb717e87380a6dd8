use super::batch::BatchSession;
use crate::core::{Columns, MapError, Result, Value};
use crate::entity::{transient_key, Entity, FieldValue, JoinLink, ManagedEntity};
use crate::metadata::{EntityMeta, EntityRegistry};
use crate::storage::{RowAccess, RowWrite};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

type Identity = (String, Value);

struct Visit {
    entity: ManagedEntity,
    /// Position in which the walk reached the entity
    order: usize,
}

/// State of one walk over an entity graph: the entities reached so far,
/// keyed by `(entity type, primary key)` in the order they were reached,
/// and the current cascade depth.
///
/// Only cascade walks (persist, merge, refresh) count depth. Loading is
/// bounded by the visited set alone.
pub(crate) struct GraphContext {
    visits: HashMap<Identity, Visit>,
    depth: usize,
    max_depth: usize,
}

impl GraphContext {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            visits: HashMap::new(),
            depth: 0,
            max_depth,
        }
    }

    pub(crate) fn enter(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(MapError::CascadeDepthExceeded(self.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn visited(&self, entity_type: &str, key: &Value) -> Option<ManagedEntity> {
        self.visits
            .get(&(entity_type.to_string(), key.clone()))
            .map(|visit| visit.entity.clone())
    }

    /// Record an entity reached by the walk. Reaching it again keeps its
    /// first position.
    pub(crate) fn begin(&mut self, entity: &ManagedEntity) {
        let order = self.visits.len();
        self.visits.entry(identity(entity)).or_insert_with(|| Visit {
            entity: entity.clone(),
            order,
        });
    }

    /// Link from `source` to `target`.
    ///
    /// Strong links only ever point at entities reached after their source,
    /// so the links made by one walk never form a strong cycle. A link to
    /// an entity reached earlier (or to the source itself) is a weak
    /// back-edge.
    pub(crate) fn link_to(&self, source: &ManagedEntity, target: ManagedEntity) -> JoinLink {
        let key = target.primary_key();
        let backwards = match (self.order_of(source), self.order_of(&target)) {
            (Some(from), Some(to)) => to <= from,
            _ => false,
        };
        if backwards {
            trace!(entity_type = %target.entity_type(), key = %key, "linking back-edge");
            JoinLink::back(key, &target)
        } else {
            JoinLink::managed(key, target)
        }
    }

    fn order_of(&self, entity: &ManagedEntity) -> Option<usize> {
        self.visits
            .get(&identity(entity))
            .filter(|visit| visit.entity.ptr_eq(entity))
            .map(|visit| visit.order)
    }
}

fn identity(entity: &ManagedEntity) -> Identity {
    (entity.entity_type(), entity.primary_key())
}

/// Where row writes of an operation go: straight to the store, or into the
/// mutators of an open batch.
pub(crate) enum WriteRoute {
    Direct,
    Batch(BatchSession),
}

impl WriteRoute {
    pub(crate) fn for_session(session: Option<BatchSession>) -> Self {
        session.map_or(WriteRoute::Direct, WriteRoute::Batch)
    }

    pub(crate) fn is_batch(&self) -> bool {
        matches!(self, WriteRoute::Batch(_))
    }

    /// Hand a batch session back to the entity it was taken from
    pub(crate) fn restore_into(self, entity: &ManagedEntity) {
        if let WriteRoute::Batch(session) = self {
            entity.restore_batch(session);
        }
    }

    pub(crate) async fn put(
        &mut self,
        access: &Arc<dyn RowAccess>,
        key: &Value,
        columns: Columns,
    ) -> Result<()> {
        let write = RowWrite::Put {
            key: key.clone(),
            columns,
        };
        if let Some(RowWrite::Put { key, columns }) = self.accumulate(access.row_group(), write) {
            access.write_columns(&key, columns).await?;
        }
        Ok(())
    }

    pub(crate) async fn delete(&mut self, access: &Arc<dyn RowAccess>, key: &Value) -> Result<()> {
        let write = RowWrite::Delete { key: key.clone() };
        if let Some(write) = self.accumulate(access.row_group(), write) {
            access.delete_row(write.key()).await?;
        }
        Ok(())
    }

    /// Queue the write when a mutator for the row-group is open, otherwise
    /// give it back for a direct write.
    fn accumulate(&mut self, row_group: &str, write: RowWrite) -> Option<RowWrite> {
        let WriteRoute::Batch(session) = self else {
            return Some(write);
        };
        match session.mutator_for(row_group) {
            Some(mutator) => {
                trace!(row_group, key = %write.key(), "write accumulated");
                mutator.accumulate(write);
                None
            }
            None => {
                warn!(row_group, "no mutator open for row group, writing directly");
                Some(write)
            }
        }
    }
}

/// Check a transient entity against its metadata and return the metadata
/// with the entity's primary key.
pub(crate) fn validate_entity(
    registry: &EntityRegistry,
    entity: &Entity,
) -> Result<(Arc<EntityMeta>, Value)> {
    let meta = registry.metadata_for(entity.entity_type())?.clone();

    for (name, field) in entity.fields() {
        let property = meta.require_property(name)?;
        match (field, property.join()) {
            (FieldValue::Value(value), None) if !property.kind().accepts(value) => {
                return Err(MapError::TypeMismatch(format!(
                    "Property '{}' of '{}' is {} and cannot take a {} value",
                    name,
                    meta.entity_type(),
                    property.kind(),
                    value.type_name()
                )));
            }
            (FieldValue::Value(_), Some(_)) => {
                return Err(MapError::TypeMismatch(format!(
                    "Join '{}' of '{}' was given a column value",
                    name,
                    meta.entity_type()
                )));
            }
            (FieldValue::Join(_), None) => {
                return Err(MapError::TypeMismatch(format!(
                    "Property '{}' of '{}' is not a join",
                    name,
                    meta.entity_type()
                )));
            }
            (FieldValue::Join(Some(target)), Some(join)) => {
                let target_type = target.entity_type();
                if target_type != join.target_type {
                    return Err(MapError::TypeMismatch(format!(
                        "Join '{}' of '{}' expects '{}' but was given '{}'",
                        name,
                        meta.entity_type(),
                        join.target_type,
                        target_type
                    )));
                }
            }
            _ => {}
        }
    }

    let key = transient_key(entity, meta.id_property())?;
    Ok((meta, key))
}

/// Base-row columns of a transient entity's non-join fields
pub(crate) fn transient_columns(meta: &EntityMeta, entity: &Entity) -> Columns {
    meta.column_properties()
        .filter(|property| !property.is_join())
        .filter_map(|property| {
            entity
                .value(property.name())
                .map(|value| (property.column().to_string(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::LinkTarget;
    use crate::metadata::{CascadeType, EntityDefinition, RegistryBuilder};
    use crate::storage::MemoryStore;

    fn registry() -> Arc<EntityRegistry> {
        let store = MemoryStore::new();
        RegistryBuilder::new()
            .register(
                EntityDefinition::new("Address", store.row_access("addresses"))
                    .id("id")
                    .property("city"),
            )
            .register(
                EntityDefinition::new("User", store.row_access("users"))
                    .id("id")
                    .column("name", "full_name")
                    .list("tags")
                    .join("home", "Address", CascadeType::Persist),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_depth_limit() {
        let mut ctx = GraphContext::new(2);
        ctx.enter().unwrap();
        ctx.enter().unwrap();
        assert!(matches!(ctx.enter(), Err(MapError::CascadeDepthExceeded(2))));
        ctx.leave();
        assert!(ctx.enter().is_ok());
    }

    #[test]
    fn test_links_to_earlier_entities_are_back_edges() {
        let registry = registry();
        let meta = registry.metadata_for("Address").unwrap().clone();
        let address = |key: i64| {
            ManagedEntity::new(
                crate::entity::Interceptor::from_columns(meta.clone(), Value::from(key), &Columns::new())
                    .unwrap(),
            )
        };
        let (first, second, outside) = (address(1), address(2), address(3));

        let mut ctx = GraphContext::new(8);
        ctx.begin(&first);
        ctx.begin(&second);
        ctx.begin(&first);

        assert!(matches!(ctx.link_to(&first, second.clone()).target, LinkTarget::Managed(_)));
        assert!(matches!(ctx.link_to(&second, first.clone()).target, LinkTarget::Back(_)));
        assert!(matches!(ctx.link_to(&first, first.clone()).target, LinkTarget::Back(_)));
        assert!(matches!(ctx.link_to(&second, outside).target, LinkTarget::Managed(_)));
    }

    #[test]
    fn test_validate_accepts_well_formed_entity() {
        let registry = registry();
        let user = Entity::new("User")
            .with("id", 1)
            .with("name", "alice")
            .with("tags", vec![Value::from("a")])
            .with_join("home", Entity::new("Address").with("id", 5));

        let (meta, key) = validate_entity(&registry, &user).unwrap();
        assert_eq!(meta.entity_type(), "User");
        assert_eq!(key, Value::from(1));

        let columns = transient_columns(&meta, &user);
        assert_eq!(columns.get("full_name"), Some(&Value::from("alice")));
        assert!(!columns.contains_key("home"));
    }

    #[test]
    fn test_validate_rejects_malformed_entities() {
        let registry = registry();

        let unmapped = Entity::new("Order").with("id", 1);
        assert!(matches!(validate_entity(&registry, &unmapped), Err(MapError::NotMapped(_))));

        let keyless = Entity::new("User").with("name", "bob");
        assert!(matches!(validate_entity(&registry, &keyless), Err(MapError::InvalidEntity(_))));

        let unknown = Entity::new("User").with("id", 1).with("age", 3);
        assert!(matches!(
            validate_entity(&registry, &unknown),
            Err(MapError::UnknownProperty { .. })
        ));

        let wrong_kind = Entity::new("User").with("id", 1).with("tags", "a");
        assert!(matches!(validate_entity(&registry, &wrong_kind), Err(MapError::TypeMismatch(_))));

        let wrong_target = Entity::new("User")
            .with("id", 1)
            .with_join("home", Entity::new("User").with("id", 2));
        assert!(matches!(
            validate_entity(&registry, &wrong_target),
            Err(MapError::TypeMismatch(_))
        ));
    }
}
