use crate::metadata::{EntityMeta, PropertyMeta};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

/// Shared dirty marker of one property.
///
/// Clones share the same cell: the interceptor keeps one per property and
/// hands a clone to every wrapper it creates for that property, so a
/// mutation through any wrapper is visible through the interceptor.
/// The cell is not thread-safe, and neither is anything holding it.
#[derive(Clone, Default)]
pub struct DirtyFlag(Rc<Cell<bool>>);

impl DirtyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.set(true);
    }

    pub fn is_dirty(&self) -> bool {
        self.0.get()
    }

    pub fn clear(&self) {
        self.0.set(false);
    }

    pub fn shares_cell_with(&self, other: &DirtyFlag) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DirtyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirtyFlag").field(&self.0.get()).finish()
    }
}

/// Dirty flag plus the metadata of the property it belongs to.
#[derive(Clone)]
pub(crate) struct Tracker {
    flag: DirtyFlag,
    entity: Arc<EntityMeta>,
    property: Arc<PropertyMeta>,
}

impl Tracker {
    pub(crate) fn new(flag: DirtyFlag, entity: Arc<EntityMeta>, property: Arc<PropertyMeta>) -> Self {
        Self {
            flag,
            entity,
            property,
        }
    }

    pub(crate) fn mark_dirty(&self) {
        if !self.flag.is_dirty() {
            trace!(
                entity_type = self.entity.entity_type(),
                property = self.property.name(),
                "container property marked dirty"
            );
        }
        self.flag.mark();
    }

    pub(crate) fn flag(&self) -> &DirtyFlag {
        &self.flag
    }

    pub(crate) fn property(&self) -> &Arc<PropertyMeta> {
        &self.property
    }
}
