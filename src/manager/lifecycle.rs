use super::EntityManager;
use super::context::{GraphContext, WriteRoute};
use crate::core::{MapError, Result};
use crate::entity::{EntityInstance, LifecycleState, ManagedEntity};
use crate::metadata::CascadeType;
use async_recursion::async_recursion;
use tracing::{Instrument, debug, info_span};

impl EntityManager {
    /// Delete a managed entity's row and mark it removed.
    ///
    /// Removal never cascades: join targets may be shared with other
    /// entities, so their rows are left alone even when the join declares
    /// REMOVE or ALL. With a batch open the delete is accumulated.
    pub async fn remove(&self, entity: impl Into<EntityInstance>) -> Result<()> {
        let managed = super::live_handle(entity.into())?;
        let span = info_span!(
            "mapper.remove",
            entity_type = %managed.entity_type(),
            key = %managed.primary_key()
        );
        async move {
            let meta = managed.meta();
            for property in meta.join_properties() {
                if property.cascade().applies_to(CascadeType::Remove) {
                    debug!(property = property.name(), "remove does not cascade, join target kept");
                }
            }

            let mut route = WriteRoute::for_session(managed.take_batch());
            let result = route.delete(meta.row_access(), &managed.primary_key()).await;
            route.restore_into(&managed);
            result?;

            managed.with_interceptor(|i| i.set_state(LifecycleState::Removed));
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Overwrite a managed entity with what the store holds and clear all
    /// of its dirty flags.
    ///
    /// Joins whose key changed are reloaded. A join with an unchanged key
    /// is refreshed in place when it declares REFRESH (or ALL).
    pub async fn refresh(&self, entity: impl Into<EntityInstance>) -> Result<()> {
        let managed = super::live_handle(entity.into())?;
        let span = info_span!(
            "mapper.refresh",
            entity_type = %managed.entity_type(),
            key = %managed.primary_key()
        );
        async move {
            let mut ctx = self.context();
            self.refresh_managed(&managed, &mut ctx).await
        }
        .instrument(span)
        .await
    }

    #[async_recursion(?Send)]
    async fn refresh_managed(&self, entity: &ManagedEntity, ctx: &mut GraphContext) -> Result<()> {
        let meta = entity.meta();
        let key = entity.primary_key();
        if ctx.visited(meta.entity_type(), &key).is_some() {
            return Ok(());
        }
        ctx.enter()?;

        let columns = meta
            .row_access()
            .read_row(&key)
            .await?
            .ok_or_else(|| MapError::EntityNotFound {
                entity_type: meta.entity_type().to_string(),
                key: key.to_string(),
            })?;
        ctx.begin(entity);
        entity.with_interceptor(|i| i.replace_state(&columns));

        for property in meta.join_properties() {
            let Some(join) = property.join() else {
                continue;
            };
            let stored = columns.get(property.column()).filter(|v| !v.is_null()).cloned();
            let current = entity.with_interceptor(|i| i.join_link(property.name()))?;

            let link = match (stored, current) {
                (None, _) => None,
                (Some(stored), Some(current)) if current.key == stored => {
                    if property.cascade().applies_to(CascadeType::Refresh) {
                        if let Some(target) = current.managed_target().filter(|t| !t.is_removed()) {
                            debug!(property = property.name(), "cascading refresh");
                            self.refresh_managed(&target, ctx).await?;
                        }
                    }
                    Some(current)
                }
                (Some(stored), _) => self.load_link(entity, join, stored, ctx).await?,
            };
            entity.with_interceptor(|i| i.install_join(property.name(), link))?;
        }

        ctx.leave();
        Ok(())
    }
}
