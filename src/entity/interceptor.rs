use super::managed::{ManagedEntity, WeakManaged};
use super::record::{Entity, EntityInstance};
use crate::core::{Columns, MapError, Result, Value};
use crate::manager::batch::BatchSession;
use crate::metadata::{EntityMeta, PropertyKind, PropertyMeta};
use crate::tracking::{DirtyFlag, TrackedList, TrackedMap, TrackedSet, Tracker};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;

/// Lifecycle of an entity known to the mapper. Transient entities have no
/// interceptor at all, so they have no state here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Managed,
    Removed,
}

/// Target end of a join link
#[derive(Clone)]
pub(crate) enum LinkTarget {
    Managed(ManagedEntity),
    /// Edge back to an entity that was still being built when the link was
    /// made. Weak so a loaded cycle does not keep itself alive.
    Back(WeakManaged),
    /// Referenced by key only, never written by the mapper
    Transient(Entity),
}

#[derive(Clone)]
pub(crate) struct JoinLink {
    pub(crate) key: Value,
    pub(crate) target: LinkTarget,
}

impl JoinLink {
    pub(crate) fn managed(key: Value, target: ManagedEntity) -> Self {
        Self {
            key,
            target: LinkTarget::Managed(target),
        }
    }

    pub(crate) fn back(key: Value, target: &ManagedEntity) -> Self {
        Self {
            key,
            target: LinkTarget::Back(target.downgrade()),
        }
    }

    pub(crate) fn transient(key: Value, target: Entity) -> Self {
        Self {
            key,
            target: LinkTarget::Transient(target),
        }
    }

    /// Managed target, if the link points at one that is still alive
    pub(crate) fn managed_target(&self) -> Option<ManagedEntity> {
        match &self.target {
            LinkTarget::Managed(target) => Some(target.clone()),
            LinkTarget::Back(weak) => weak.upgrade(),
            LinkTarget::Transient(_) => None,
        }
    }

    pub(crate) fn instance(&self) -> Option<EntityInstance> {
        match &self.target {
            LinkTarget::Transient(entity) => Some(EntityInstance::Transient(entity.clone())),
            _ => self.managed_target().map(EntityInstance::Managed),
        }
    }
}

/// Backing state of one property
enum Slot {
    Simple(Value),
    List(Rc<RefCell<Vec<Value>>>),
    Set(Rc<RefCell<BTreeSet<Value>>>),
    Map(Rc<RefCell<BTreeMap<Value, Value>>>),
    Join(Option<JoinLink>),
}

impl Slot {
    fn from_value(kind: PropertyKind, value: Value) -> Result<Self> {
        let slot = match (kind, value) {
            (PropertyKind::Simple, value) if !value.is_container() => Slot::Simple(value),
            (PropertyKind::List, Value::List(items)) => Slot::List(Rc::new(RefCell::new(items))),
            (PropertyKind::Set, Value::Set(items)) => Slot::Set(Rc::new(RefCell::new(items))),
            (PropertyKind::Map, Value::Map(entries)) => Slot::Map(Rc::new(RefCell::new(entries))),
            (PropertyKind::Join, _) => Slot::Join(None),
            (kind, Value::Null) => return Slot::from_value(kind, kind.empty_value()),
            (kind, value) => {
                return Err(MapError::TypeMismatch(format!(
                    "{} column cannot hold a {} value",
                    kind,
                    value.type_name()
                )));
            }
        };
        Ok(slot)
    }

    /// Overwrite the backing state in place, so wrappers already handed
    /// out keep decorating the live container.
    fn replace(&mut self, value: Value) {
        match (self, value) {
            (Slot::List(target), Value::List(items)) => *target.borrow_mut() = items,
            (Slot::List(target), _) => target.borrow_mut().clear(),
            (Slot::Set(target), Value::Set(items)) => *target.borrow_mut() = items,
            (Slot::Set(target), _) => target.borrow_mut().clear(),
            (Slot::Map(target), Value::Map(entries)) => *target.borrow_mut() = entries,
            (Slot::Map(target), _) => target.borrow_mut().clear(),
            (Slot::Simple(current), value) => *current = value,
            (Slot::Join(_), _) => {}
        }
    }

    fn column_value(&self) -> Value {
        match self {
            Slot::Simple(value) => value.clone(),
            Slot::List(target) => Value::List(target.borrow().clone()),
            Slot::Set(target) => Value::Set(target.borrow().clone()),
            Slot::Map(target) => Value::Map(target.borrow().clone()),
            Slot::Join(link) => link.as_ref().map_or(Value::Null, |link| link.key.clone()),
        }
    }
}

#[derive(Clone)]
enum Wrapper {
    List(TrackedList),
    Set(TrackedSet),
    Map(TrackedMap),
}

/// What a property read returns: a plain value, a tracking wrapper over a
/// live container, or the target of a join.
#[derive(Debug, Clone)]
pub enum Property {
    Value(Value),
    List(TrackedList),
    Set(TrackedSet),
    Map(TrackedMap),
    Join(Option<EntityInstance>),
}

/// Per-entity mediator of field access.
///
/// Holds the backing state of every property, one dirty flag per non-key
/// property, the wrappers handed out so far and the batch session while
/// one is open. It never talks to the store.
pub(crate) struct Interceptor {
    meta: Arc<EntityMeta>,
    key: Value,
    slots: BTreeMap<String, Slot>,
    dirty: BTreeMap<String, DirtyFlag>,
    wrappers: HashMap<String, Wrapper>,
    state: LifecycleState,
    batch: Option<BatchSession>,
}

impl Interceptor {
    /// Backing state from a row's columns. Join slots start empty.
    pub(crate) fn from_columns(meta: Arc<EntityMeta>, key: Value, columns: &Columns) -> Result<Self> {
        let mut slots = BTreeMap::new();
        let mut dirty = BTreeMap::new();
        for property in meta.column_properties() {
            let value = columns.get(property.column()).cloned().unwrap_or(Value::Null);
            slots.insert(
                property.name().to_string(),
                Slot::from_value(property.kind(), value)?,
            );
            dirty.insert(property.name().to_string(), DirtyFlag::new());
        }

        Ok(Self {
            meta,
            key,
            slots,
            dirty,
            wrappers: HashMap::new(),
            state: LifecycleState::Managed,
            batch: None,
        })
    }

    pub(crate) fn meta(&self) -> &Arc<EntityMeta> {
        &self.meta
    }

    pub(crate) fn key(&self) -> &Value {
        &self.key
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: LifecycleState) {
        self.state = state;
    }

    pub(crate) fn get(&mut self, name: &str) -> Result<Property> {
        let property = self.meta.require_property(name)?.clone();
        if self.meta.is_id(name) {
            return Ok(Property::Value(self.key.clone()));
        }

        if let Some(wrapper) = self.wrappers.get(name) {
            return Ok(match wrapper.clone() {
                Wrapper::List(list) => Property::List(list),
                Wrapper::Set(set) => Property::Set(set),
                Wrapper::Map(map) => Property::Map(map),
            });
        }

        let tracker = self.tracker(&property)?;
        let (wrapper, read) = match self.slot(name)? {
            Slot::Simple(value) => return Ok(Property::Value(value.clone())),
            Slot::Join(link) => return Ok(Property::Join(link.as_ref().and_then(JoinLink::instance))),
            Slot::List(target) => {
                let list = TrackedList::new(target.clone(), tracker);
                (Wrapper::List(list.clone()), Property::List(list))
            }
            Slot::Set(target) => {
                let set = TrackedSet::new(target.clone(), tracker);
                (Wrapper::Set(set.clone()), Property::Set(set))
            }
            Slot::Map(target) => {
                let map = TrackedMap::new(target.clone(), tracker);
                (Wrapper::Map(map.clone()), Property::Map(map))
            }
        };
        self.wrappers.insert(name.to_string(), wrapper);
        Ok(read)
    }

    /// Write a column value and mark the property dirty unconditionally
    pub(crate) fn set_value(&mut self, name: &str, value: Value) -> Result<()> {
        let property = self.meta.require_property(name)?.clone();
        if self.meta.is_id(name) {
            return Err(MapError::InvalidEntity(format!(
                "Primary key '{}' of '{}' cannot be reassigned",
                name,
                self.meta.entity_type()
            )));
        }
        if !property.kind().accepts(&value) {
            return Err(MapError::TypeMismatch(format!(
                "Property '{}' of '{}' is {} and cannot take a {} value",
                name,
                self.meta.entity_type(),
                property.kind(),
                value.type_name()
            )));
        }

        let value = if value.is_null() {
            property.kind().empty_value()
        } else {
            value
        };
        self.slot_mut(name)?.replace(value);
        self.mark(name);
        Ok(())
    }

    /// Point a join at a new target and mark it dirty
    pub(crate) fn set_join(&mut self, name: &str, link: Option<JoinLink>) -> Result<()> {
        self.install_join(name, link)?;
        self.mark(name);
        Ok(())
    }

    /// Point a join at a target without touching its dirty flag. Used when
    /// the mapper itself resolves links during load, persist and refresh.
    pub(crate) fn install_join(&mut self, name: &str, link: Option<JoinLink>) -> Result<()> {
        match self.slot_mut(name)? {
            Slot::Join(current) => {
                *current = link;
                Ok(())
            }
            _ => Err(MapError::TypeMismatch(format!("Property '{}' is not a join", name))),
        }
    }

    pub(crate) fn join_link(&self, name: &str) -> Result<Option<JoinLink>> {
        match self.slot(name)? {
            Slot::Join(link) => Ok(link.clone()),
            _ => Err(MapError::TypeMismatch(format!("Property '{}' is not a join", name))),
        }
    }

    pub(crate) fn is_dirty(&self, name: &str) -> bool {
        self.dirty.get(name).is_some_and(DirtyFlag::is_dirty)
    }

    pub(crate) fn dirty_properties(&self) -> Vec<String> {
        self.dirty
            .iter()
            .filter(|(_, flag)| flag.is_dirty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.values().for_each(DirtyFlag::clear);
    }

    /// Every column of the base row
    pub(crate) fn columns(&self) -> Columns {
        self.column_values(|_| true)
    }

    /// Only the columns whose property is dirty
    pub(crate) fn dirty_columns(&self) -> Columns {
        self.column_values(|name| self.is_dirty(name))
    }

    /// Overwrite every non-join property from a freshly read row and clear
    /// all dirty flags. Join slots are left to the caller.
    pub(crate) fn replace_state(&mut self, columns: &Columns) {
        for property in self.meta.column_properties() {
            if property.is_join() {
                continue;
            }
            let value = columns
                .get(property.column())
                .cloned()
                .unwrap_or_else(|| property.kind().empty_value());
            if let Some(slot) = self.slots.get_mut(property.name()) {
                slot.replace(value);
            }
        }
        self.clear_dirty();
    }

    /// Transient copy of the current state
    pub(crate) fn detach(&self) -> Entity {
        let mut entity = Entity::new(self.meta.entity_type());
        entity.set(self.meta.id_property(), self.key.clone());
        for (name, slot) in &self.slots {
            match slot {
                Slot::Join(link) => entity.set_join(name, link.as_ref().and_then(JoinLink::instance)),
                slot => entity.set(name, slot.column_value()),
            }
        }
        entity
    }

    pub(crate) fn has_batch(&self) -> bool {
        self.batch.is_some()
    }

    pub(crate) fn take_batch(&mut self) -> Option<BatchSession> {
        self.batch.take()
    }

    pub(crate) fn restore_batch(&mut self, session: BatchSession) {
        self.batch = Some(session);
    }

    fn column_values(&self, include: impl Fn(&str) -> bool) -> Columns {
        self.meta
            .column_properties()
            .filter(|property| include(property.name()))
            .filter_map(|property| {
                self.slots
                    .get(property.name())
                    .map(|slot| (property.column().to_string(), slot.column_value()))
            })
            .collect()
    }

    fn mark(&self, name: &str) {
        if let Some(flag) = self.dirty.get(name) {
            flag.mark();
        }
    }

    fn tracker(&self, property: &Arc<PropertyMeta>) -> Result<Tracker> {
        let flag = self
            .dirty
            .get(property.name())
            .cloned()
            .ok_or_else(|| self.unknown(property.name()))?;
        Ok(Tracker::new(flag, self.meta.clone(), property.clone()))
    }

    fn slot(&self, name: &str) -> Result<&Slot> {
        self.slots.get(name).ok_or_else(|| self.unknown(name))
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut Slot> {
        let unknown = self.unknown(name);
        self.slots.get_mut(name).ok_or(unknown)
    }

    fn unknown(&self, name: &str) -> MapError {
        MapError::UnknownProperty {
            entity_type: self.meta.entity_type().to_string(),
            property: name.to_string(),
        }
    }
}
