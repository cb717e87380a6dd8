use super::EntityManager;
use super::context::{GraphContext, WriteRoute, transient_columns, validate_entity};
use crate::core::{MapError, Result};
use crate::entity::{
    Entity, EntityInstance, FieldValue, Interceptor, JoinLink, ManagedEntity, transient_key,
};
use crate::metadata::CascadeType;
use async_recursion::async_recursion;
use tracing::{Instrument, debug, info_span};

impl EntityManager {
    /// Write a transient entity and return it as a managed one.
    ///
    /// Join targets cascade when the property declares PERSIST (or ALL) and
    /// are written before the base row. Without the cascade only the
    /// target's key is stored. Persisting an instance that is already
    /// managed fails with [`MapError::AlreadyManaged`]; use merge instead.
    pub async fn persist(&self, entity: impl Into<EntityInstance>) -> Result<ManagedEntity> {
        let entity = match entity.into() {
            EntityInstance::Managed(managed) => {
                return Err(MapError::AlreadyManaged(managed.entity_type()));
            }
            EntityInstance::Transient(entity) => entity,
        };

        let span = info_span!("mapper.persist", entity_type = %entity.entity_type());
        async move {
            let mut ctx = self.context();
            let mut route = WriteRoute::Direct;
            self.persist_transient(entity, &mut ctx, &mut route).await
        }
        .instrument(span)
        .await
    }

    #[async_recursion(?Send)]
    pub(crate) async fn persist_transient(
        &self,
        entity: Entity,
        ctx: &mut GraphContext,
        route: &mut WriteRoute,
    ) -> Result<ManagedEntity> {
        let mut entity = entity;
        let (meta, key) = validate_entity(&self.registry, &entity)?;
        if let Some(existing) = ctx.visited(meta.entity_type(), &key) {
            return Ok(existing);
        }
        ctx.enter()?;

        let columns = transient_columns(&meta, &entity);
        let managed = ManagedEntity::new(Interceptor::from_columns(meta.clone(), key.clone(), &columns)?);
        ctx.begin(&managed);

        for property in meta.join_properties() {
            let Some(join) = property.join() else {
                continue;
            };
            let link = match entity.take_field(property.name()) {
                None | Some(FieldValue::Join(None)) => None,
                Some(FieldValue::Join(Some(EntityInstance::Managed(target)))) => Some(ctx.link_to(&managed, target)),
                Some(FieldValue::Join(Some(EntityInstance::Transient(target)))) => {
                    if property.cascade().applies_to(CascadeType::Persist) {
                        debug!(
                            property = property.name(),
                            target_type = %join.target_type,
                            "cascading persist"
                        );
                        let persisted = self.persist_transient(target, ctx, route).await?;
                        Some(ctx.link_to(&managed, persisted))
                    } else {
                        let target_key = transient_key(&target, &join.target_id_property)?;
                        Some(JoinLink::transient(target_key, target))
                    }
                }
                Some(FieldValue::Value(_)) => {
                    return Err(MapError::TypeMismatch(format!(
                        "Join '{}' was given a column value",
                        property.name()
                    )));
                }
            };
            managed.with_interceptor(|interceptor| interceptor.install_join(property.name(), link))?;
        }

        let columns = managed.with_interceptor(|interceptor| interceptor.columns());
        debug!(row_group = meta.row_group(), key = %key, "writing base row");
        route.put(meta.row_access(), &key, columns).await?;

        ctx.leave();
        Ok(managed)
    }
}
