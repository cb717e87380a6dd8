use super::EntityManager;
use super::context::GraphContext;
use crate::core::{Columns, Result, Value};
use crate::entity::{Interceptor, JoinLink, ManagedEntity};
use crate::metadata::JoinMeta;
use std::collections::VecDeque;
use tracing::{Instrument, info_span, trace, warn};

/// Loaded entity whose join columns are not resolved yet
struct PendingJoins {
    entity: ManagedEntity,
    columns: Columns,
}

impl EntityManager {
    /// Load an entity by primary key.
    ///
    /// A missing row is `Ok(None)`. Joins are loaded eagerly, and an entity
    /// reached twice in one load is the same managed entity both times.
    /// Loading walks the rows breadth-first without recursion, so chains
    /// of any length load; `max_cascade_depth` does not apply here.
    pub async fn find(&self, entity_type: &str, key: impl Into<Value>) -> Result<Option<ManagedEntity>> {
        let key = key.into();
        let span = info_span!("mapper.find", entity_type = entity_type, key = %key);
        async move {
            let mut ctx = self.context();
            self.load_graph(entity_type, key, &mut ctx).await
        }
        .instrument(span)
        .await
    }

    /// Same as [`EntityManager::find`]
    pub async fn get_reference(
        &self,
        entity_type: &str,
        key: impl Into<Value>,
    ) -> Result<Option<ManagedEntity>> {
        self.find(entity_type, key).await
    }

    /// Load one entity and everything its join columns reach
    pub(crate) async fn load_graph(
        &self,
        entity_type: &str,
        key: Value,
        ctx: &mut GraphContext,
    ) -> Result<Option<ManagedEntity>> {
        let mut pending = VecDeque::new();
        let root = self.load_row(entity_type, key, ctx, &mut pending).await?;
        self.resolve_joins(ctx, pending).await?;
        Ok(root)
    }

    /// Link from `source` to the target of a join column, loading the
    /// target's graph as needed. A key with no row behind it loads as an
    /// empty join.
    pub(crate) async fn load_link(
        &self,
        source: &ManagedEntity,
        join: &JoinMeta,
        key: Value,
        ctx: &mut GraphContext,
    ) -> Result<Option<JoinLink>> {
        match self.load_graph(&join.target_type, key.clone(), ctx).await? {
            Some(target) => Ok(Some(ctx.link_to(source, target))),
            None => {
                warn_dangling(join, &key);
                Ok(None)
            }
        }
    }

    /// Read one row into a managed entity and queue its joins. An entity
    /// already reached by this walk is returned as is.
    async fn load_row(
        &self,
        entity_type: &str,
        key: Value,
        ctx: &mut GraphContext,
        pending: &mut VecDeque<PendingJoins>,
    ) -> Result<Option<ManagedEntity>> {
        if let Some(existing) = ctx.visited(entity_type, &key) {
            return Ok(Some(existing));
        }
        let meta = self.registry.metadata_for(entity_type)?.clone();
        let Some(columns) = meta.row_access().read_row(&key).await? else {
            return Ok(None);
        };

        let managed = ManagedEntity::new(Interceptor::from_columns(meta, key, &columns)?);
        ctx.begin(&managed);
        pending.push_back(PendingJoins {
            entity: managed.clone(),
            columns,
        });
        Ok(Some(managed))
    }

    async fn resolve_joins(
        &self,
        ctx: &mut GraphContext,
        mut pending: VecDeque<PendingJoins>,
    ) -> Result<()> {
        while let Some(PendingJoins { entity, columns }) = pending.pop_front() {
            let meta = entity.meta();
            for property in meta.join_properties() {
                let Some(join) = property.join() else {
                    continue;
                };
                let Some(target_key) = columns.get(property.column()).filter(|v| !v.is_null()) else {
                    continue;
                };

                let target = self
                    .load_row(&join.target_type, target_key.clone(), ctx, &mut pending)
                    .await?;
                let link = match target {
                    Some(target) => Some(ctx.link_to(&entity, target)),
                    None => {
                        warn_dangling(join, target_key);
                        None
                    }
                };
                entity.with_interceptor(|i| i.install_join(property.name(), link))?;
            }
            trace!(entity_type = meta.entity_type(), queued = pending.len(), "joins resolved");
        }
        Ok(())
    }
}

fn warn_dangling(join: &JoinMeta, key: &Value) {
    warn!(
        target_type = %join.target_type,
        key = %key,
        "join column points at a missing row"
    );
}
