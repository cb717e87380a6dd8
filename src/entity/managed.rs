use super::interceptor::{Interceptor, JoinLink, LifecycleState, Property};
use super::record::{Entity, EntityInstance};
use crate::core::{MapError, Result, Value};
use crate::manager::batch::BatchSession;
use crate::metadata::{EntityMeta, JoinMeta};
use crate::tracking::{TrackedList, TrackedMap, TrackedSet};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Handle to an entity under management.
///
/// Clones are the same entity: they share one interceptor, so a mutation
/// through any clone is tracked once. The handle is neither `Send` nor
/// `Sync`; a managed entity belongs to the task that loaded it.
#[derive(Clone)]
pub struct ManagedEntity {
    inner: Rc<RefCell<Interceptor>>,
}

/// Non-owning handle, used for back-edges of loaded cycles
#[derive(Clone)]
pub(crate) struct WeakManaged {
    inner: Weak<RefCell<Interceptor>>,
}

impl WeakManaged {
    pub(crate) fn upgrade(&self) -> Option<ManagedEntity> {
        self.inner.upgrade().map(|inner| ManagedEntity { inner })
    }
}

impl ManagedEntity {
    pub(crate) fn new(interceptor: Interceptor) -> Self {
        Self {
            inner: Rc::new(RefCell::new(interceptor)),
        }
    }

    pub fn entity_type(&self) -> String {
        self.inner.borrow().meta().entity_type().to_string()
    }

    pub fn primary_key(&self) -> Value {
        self.inner.borrow().key().clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.borrow().state()
    }

    pub fn is_removed(&self) -> bool {
        self.state() == LifecycleState::Removed
    }

    /// Whether both handles point at the same managed entity
    pub fn ptr_eq(&self, other: &ManagedEntity) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn meta(&self) -> Arc<EntityMeta> {
        self.inner.borrow().meta().clone()
    }

    /// Read a property. Container properties come back as tracking
    /// wrappers, and repeated reads of one property share its dirty flag.
    pub fn get(&self, name: &str) -> Result<Property> {
        self.inner.borrow_mut().get(name)
    }

    /// Column value of a property; containers are copied out
    pub fn value(&self, name: &str) -> Result<Value> {
        match self.get(name)? {
            Property::Value(value) => Ok(value),
            Property::List(list) => Ok(Value::List(list.to_vec())),
            Property::Set(set) => Ok(Value::Set(set.to_set())),
            Property::Map(map) => Ok(Value::Map(map.to_map())),
            Property::Join(_) => Err(self.mismatch(name, "a join")),
        }
    }

    pub fn list(&self, name: &str) -> Result<TrackedList> {
        match self.get(name)? {
            Property::List(list) => Ok(list),
            _ => Err(self.mismatch(name, "not a list")),
        }
    }

    pub fn set_of(&self, name: &str) -> Result<TrackedSet> {
        match self.get(name)? {
            Property::Set(set) => Ok(set),
            _ => Err(self.mismatch(name, "not a set")),
        }
    }

    pub fn map(&self, name: &str) -> Result<TrackedMap> {
        match self.get(name)? {
            Property::Map(map) => Ok(map),
            _ => Err(self.mismatch(name, "not a map")),
        }
    }

    /// Target of a join property, `None` when the join is empty
    pub fn join(&self, name: &str) -> Result<Option<EntityInstance>> {
        match self.get(name)? {
            Property::Join(target) => Ok(target),
            _ => Err(self.mismatch(name, "not a join")),
        }
    }

    /// Key stored in a join column
    pub fn join_key(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.inner.borrow().join_link(name)?.map(|link| link.key))
    }

    /// Assign a column property. The property is marked dirty even when
    /// the value is unchanged.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.inner.borrow_mut().set_value(name, value.into())
    }

    /// Point a join property at another entity, managed or transient.
    ///
    /// The link holds its target strongly. A cycle built with `set_join`
    /// (including an entity joined to itself) keeps every entity on it
    /// alive until one of its joins is cleared with
    /// [`ManagedEntity::clear_join`] or pointed elsewhere. Cycles reached by
    /// `find`, `persist`, `merge` and `refresh` are linked back weakly and
    /// need no such care.
    pub fn set_join(&self, name: &str, target: impl Into<EntityInstance>) -> Result<()> {
        let join = self.join_meta(name)?;
        let link = link_for(&join, target.into())?;
        self.inner.borrow_mut().set_join(name, Some(link))
    }

    pub fn clear_join(&self, name: &str) -> Result<()> {
        self.join_meta(name)?;
        self.inner.borrow_mut().set_join(name, None)
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.inner.borrow().is_dirty(name)
    }

    pub fn dirty_properties(&self) -> Vec<String> {
        self.inner.borrow().dirty_properties()
    }

    pub fn has_open_batch(&self) -> bool {
        self.inner.borrow().has_batch()
    }

    /// Transient snapshot of the entity. Join targets stay as they are
    /// linked, so managed targets come back as managed handles.
    pub fn detach(&self) -> Entity {
        self.inner.borrow().detach()
    }

    pub(crate) fn with_interceptor<R>(&self, f: impl FnOnce(&mut Interceptor) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    pub(crate) fn take_batch(&self) -> Option<BatchSession> {
        self.inner.borrow_mut().take_batch()
    }

    pub(crate) fn restore_batch(&self, session: BatchSession) {
        self.inner.borrow_mut().restore_batch(session);
    }

    pub(crate) fn downgrade(&self) -> WeakManaged {
        WeakManaged {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn join_meta(&self, name: &str) -> Result<JoinMeta> {
        let meta = self.meta();
        let property = meta.require_property(name)?;
        property
            .join()
            .cloned()
            .ok_or_else(|| self.mismatch(name, "not a join"))
    }

    fn mismatch(&self, name: &str, what: &str) -> MapError {
        MapError::TypeMismatch(format!(
            "Property '{}' of '{}' is {}",
            name,
            self.entity_type(),
            what
        ))
    }
}

/// Build the link a join property stores for `target`
pub(crate) fn link_for(join: &JoinMeta, target: EntityInstance) -> Result<JoinLink> {
    let target_type = target.entity_type();
    if target_type != join.target_type {
        return Err(MapError::TypeMismatch(format!(
            "Join expects '{}' but was given '{}'",
            join.target_type, target_type
        )));
    }

    match target {
        EntityInstance::Managed(managed) => Ok(JoinLink::managed(managed.primary_key(), managed)),
        EntityInstance::Transient(entity) => {
            let key = transient_key(&entity, &join.target_id_property)?;
            Ok(JoinLink::transient(key, entity))
        }
    }
}

/// Primary key of a transient entity, which must be a non-null scalar
pub(crate) fn transient_key(entity: &Entity, id_property: &str) -> Result<Value> {
    match entity.value(id_property) {
        Some(key) if !key.is_null() && !key.is_container() => Ok(key.clone()),
        _ => Err(MapError::InvalidEntity(format!(
            "'{}' has no usable primary key '{}'",
            entity.entity_type(),
            id_property
        ))),
    }
}

impl PartialEq for ManagedEntity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ManagedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Join targets are not followed: a cycle would never terminate.
        match self.inner.try_borrow() {
            Ok(interceptor) => f
                .debug_struct("ManagedEntity")
                .field("entity_type", &interceptor.meta().entity_type())
                .field("key", interceptor.key())
                .field("state", &interceptor.state())
                .field("dirty", &interceptor.dirty_properties())
                .finish(),
            Err(_) => f.write_str("ManagedEntity(<borrowed>)"),
        }
    }
}
