use super::EntityManager;
use super::context::{GraphContext, WriteRoute};
use crate::core::{MapError, Result};
use crate::entity::{EntityInstance, LinkTarget, ManagedEntity};
use crate::metadata::CascadeType;
use async_recursion::async_recursion;
use tracing::{Instrument, debug, info_span, trace};

impl EntityManager {
    /// Write back the dirty state of a managed entity, or persist a
    /// transient one.
    ///
    /// A managed input is returned as the same entity, and only its dirty
    /// properties are written: with nothing dirty, nothing is written.
    /// Managed join targets merge when the property declares MERGE (or
    /// ALL); transient targets are persisted under PERSIST or MERGE. A
    /// transient input goes through persist and the result is a new
    /// managed entity.
    pub async fn merge(&self, entity: impl Into<EntityInstance>) -> Result<ManagedEntity> {
        let instance = entity.into();
        let span = info_span!("mapper.merge", entity_type = %instance.entity_type());
        async move {
            let mut ctx = self.context();
            let mut route = WriteRoute::Direct;
            match instance {
                EntityInstance::Transient(entity) => {
                    self.persist_transient(entity, &mut ctx, &mut route).await
                }
                EntityInstance::Managed(managed) => {
                    if managed.is_removed() {
                        return Err(MapError::NotManaged(managed.entity_type()));
                    }
                    self.merge_managed(&managed, &mut ctx, &mut route).await?;
                    Ok(managed)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Merge through the entity's own batch when it has one and no outer
    /// batch is routing this walk.
    #[async_recursion(?Send)]
    pub(crate) async fn merge_managed(
        &self,
        entity: &ManagedEntity,
        ctx: &mut GraphContext,
        route: &mut WriteRoute,
    ) -> Result<()> {
        if route.is_batch() || !entity.has_open_batch() {
            return self.merge_fields(entity, ctx, route).await;
        }

        let mut own = WriteRoute::for_session(entity.take_batch());
        let result = self.merge_fields(entity, ctx, &mut own).await;
        own.restore_into(entity);
        result
    }

    pub(crate) async fn merge_fields(
        &self,
        entity: &ManagedEntity,
        ctx: &mut GraphContext,
        route: &mut WriteRoute,
    ) -> Result<()> {
        let meta = entity.meta();
        let key = entity.primary_key();
        if ctx.visited(meta.entity_type(), &key).is_some() {
            return Ok(());
        }
        ctx.enter()?;
        ctx.begin(entity);

        for property in meta.join_properties() {
            let cascade = property.cascade();
            let Some(link) = entity.with_interceptor(|i| i.join_link(property.name()))? else {
                continue;
            };

            match &link.target {
                LinkTarget::Transient(target) => {
                    if cascade.applies_to(CascadeType::Persist) || cascade.applies_to(CascadeType::Merge) {
                        debug!(property = property.name(), "persisting transient join target");
                        let persisted = self.persist_transient(target.clone(), ctx, route).await?;
                        let link = ctx.link_to(entity, persisted);
                        entity.with_interceptor(|i| i.install_join(property.name(), Some(link)))?;
                    }
                }
                LinkTarget::Managed(_) | LinkTarget::Back(_) => {
                    if !cascade.applies_to(CascadeType::Merge) {
                        continue;
                    }
                    match link.managed_target() {
                        Some(target) if !target.is_removed() => {
                            debug!(property = property.name(), "cascading merge");
                            self.merge_managed(&target, ctx, route).await?;
                        }
                        Some(_) => debug!(property = property.name(), "join target was removed, not merging"),
                        None => {}
                    }
                }
            }
        }

        let columns = entity.with_interceptor(|i| i.dirty_columns());
        if columns.is_empty() {
            trace!(entity_type = meta.entity_type(), key = %key, "nothing dirty");
        } else {
            debug!(
                row_group = meta.row_group(),
                key = %key,
                columns = columns.len(),
                "writing dirty columns"
            );
            route.put(meta.row_access(), &key, columns).await?;
            entity.with_interceptor(|i| i.clear_dirty());
        }

        ctx.leave();
        Ok(())
    }
}
