// ============================================================================
// Batch Mutation Coordinator
// ============================================================================
//
// A batch session holds one mutator per row-group an entity graph can
// write to. All of them are created when the batch opens, so routing a
// write never allocates. Flushing is per row-group: the store offers no
// cross-row atomicity, so one failed flush does not stop the others.
//
// ============================================================================

use super::EntityManager;
use super::context::WriteRoute;
use crate::core::{FlushFailure, MapError, Result};
use crate::entity::{EntityInstance, ManagedEntity};
use crate::metadata::{EntityMeta, EntityRegistry};
use crate::storage::Mutator;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, trace, warn};

/// Mutators of one open batch
pub(crate) struct BatchSession {
    base: Box<dyn Mutator>,
    /// Keyed by join property name, or by dotted path for row-groups only
    /// reachable through another join
    joins: Vec<(String, Box<dyn Mutator>)>,
}

impl BatchSession {
    pub(crate) fn open(meta: &Arc<EntityMeta>, registry: &EntityRegistry) -> Result<Self> {
        let base = meta.row_access().new_mutator();
        let mut joins = Vec::new();
        let mut row_groups = HashSet::from([meta.row_group().to_string()]);
        let mut walked = HashSet::from([meta.entity_type().to_string()]);
        let mut pending = VecDeque::from([(String::new(), meta.clone())]);

        while let Some((prefix, current)) = pending.pop_front() {
            for property in current.join_properties() {
                let Some(join) = property.join() else {
                    continue;
                };
                let path = if prefix.is_empty() {
                    property.name().to_string()
                } else {
                    format!("{}.{}", prefix, property.name())
                };
                if row_groups.insert(join.row_access.row_group().to_string()) {
                    joins.push((path.clone(), join.row_access.new_mutator()));
                }
                if walked.insert(join.target_type.clone()) {
                    pending.push_back((path, registry.metadata_for(&join.target_type)?.clone()));
                }
            }
        }

        Ok(Self { base, joins })
    }

    /// Mutator bound to `row_group`, if the batch opened one
    pub(crate) fn mutator_for(&mut self, row_group: &str) -> Option<&mut Box<dyn Mutator>> {
        if self.base.row_group() == row_group {
            return Some(&mut self.base);
        }
        self.joins
            .iter_mut()
            .find(|(_, mutator)| mutator.row_group() == row_group)
            .map(|(_, mutator)| mutator)
    }

    pub(crate) fn len(&self) -> usize {
        self.joins.len() + 1
    }

    /// Base mutator first, then join mutators
    fn mutators_mut(&mut self) -> impl Iterator<Item = (Option<&str>, &mut Box<dyn Mutator>)> {
        std::iter::once((None, &mut self.base)).chain(
            self.joins
                .iter_mut()
                .map(|(path, mutator)| (Some(path.as_str()), mutator)),
        )
    }
}

/// One mutator executed by [`EntityManager::end_batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedMutator {
    pub row_group: String,
    /// Join property (or dotted path) the mutator was opened for, `None`
    /// for the base row-group
    pub property: Option<String>,
    pub writes: usize,
}

/// Outcome of a successfully ended batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub flushed: Vec<FlushedMutator>,
}

impl BatchReport {
    pub fn total_writes(&self) -> usize {
        self.flushed.iter().map(|mutator| mutator.writes).sum()
    }

    pub fn row_groups(&self) -> Vec<&str> {
        self.flushed.iter().map(|m| m.row_group.as_str()).collect()
    }
}

impl EntityManager {
    /// Open a batch on a managed entity.
    ///
    /// Until [`EntityManager::end_batch`], merges and removes of the entity
    /// accumulate their writes in the batch instead of writing directly.
    pub async fn start_batch(&self, entity: impl Into<EntityInstance>) -> Result<()> {
        let managed = super::live_handle(entity.into())?;
        if managed.has_open_batch() {
            return Err(MapError::BatchAlreadyOpen {
                entity_type: managed.entity_type(),
                key: managed.primary_key().to_string(),
            });
        }

        let session = BatchSession::open(&managed.meta(), &self.registry)?;
        debug!(
            entity_type = %managed.entity_type(),
            key = %managed.primary_key(),
            mutators = session.len(),
            "batch opened"
        );
        managed.restore_batch(session);
        Ok(())
    }

    /// Route the entity's pending changes into the batch, flush every
    /// mutator and close the batch.
    ///
    /// The base mutator flushes first. A failed flush does not stop the
    /// remaining ones; all failures come back together as
    /// [`MapError::BatchFlush`]. The batch is closed in either case.
    ///
    /// Writes held by a mutator whose flush failed are dropped with the
    /// batch. The dirty flags were cleared when those writes were
    /// accumulated, so a later merge or batch does not resend them; each
    /// [`FlushFailure`](crate::core::FlushFailure) names a row-group whose
    /// writes were lost and the caller must reapply them.
    pub async fn end_batch(&self, entity: impl Into<EntityInstance>) -> Result<BatchReport> {
        let managed = super::handle(entity.into())?;
        let span = info_span!(
            "mapper.batch.end",
            entity_type = %managed.entity_type(),
            key = %managed.primary_key()
        );
        self.end_batch_inner(&managed).instrument(span).await
    }

    async fn end_batch_inner(&self, managed: &ManagedEntity) -> Result<BatchReport> {
        let Some(session) = managed.take_batch() else {
            return Err(no_active_batch(managed));
        };

        let mut route = WriteRoute::Batch(session);
        if !managed.is_removed() {
            let mut ctx = self.context();
            if let Err(err) = self.merge_fields(managed, &mut ctx, &mut route).await {
                route.restore_into(managed);
                return Err(err);
            }
        }
        let WriteRoute::Batch(mut session) = route else {
            return Err(no_active_batch(managed));
        };

        let mut flushed = Vec::new();
        let mut failures = Vec::new();
        for (property, mutator) in session.mutators_mut() {
            let writes = mutator.pending().len();
            let row_group = mutator.row_group().to_string();
            if writes == 0 && !self.config.flush_empty_mutators {
                trace!(row_group = %row_group, "skipping empty mutator");
                continue;
            }
            match mutator.flush().await {
                Ok(()) => {
                    debug!(row_group = %row_group, writes, "mutator flushed");
                    flushed.push(FlushedMutator {
                        row_group,
                        property: property.map(str::to_string),
                        writes,
                    });
                }
                Err(error) => {
                    warn!(row_group = %row_group, %error, "mutator flush failed");
                    failures.push(FlushFailure { row_group, error });
                }
            }
        }

        if failures.is_empty() {
            Ok(BatchReport { flushed })
        } else {
            Err(MapError::BatchFlush { failures })
        }
    }
}

fn no_active_batch(managed: &ManagedEntity) -> MapError {
    MapError::NoActiveBatch {
        entity_type: managed.entity_type(),
        key: managed.primary_key().to_string(),
    }
}
