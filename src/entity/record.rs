use super::managed::ManagedEntity;
use crate::core::Value;
use std::collections::BTreeMap;

/// Value of one field of a transient entity.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Value(Value),
    Join(Option<EntityInstance>),
}

/// A transient entity: plain application data, not known to the mapper.
///
/// # Examples
///
/// ```
/// use rowmapper::{Entity, Value};
///
/// let address = Entity::new("Address").with("id", 10).with("city", "Lyon");
/// let user = Entity::new("User")
///     .with("id", 1)
///     .with("name", "alice")
///     .with("tags", vec![Value::from("admin")])
///     .with_join("home", address);
///
/// assert_eq!(user.value("name"), Some(&Value::from("alice")));
/// assert!(user.join("home").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_join(mut self, name: &str, target: impl Into<EntityInstance>) -> Self {
        self.set_join(name, Some(target.into()));
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields
            .insert(name.to_string(), FieldValue::Value(value.into()));
    }

    pub fn set_join(&mut self, name: &str, target: Option<EntityInstance>) {
        self.fields.insert(name.to_string(), FieldValue::Join(target));
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Column value of a field, `None` when absent or a join
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(FieldValue::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn join(&self, name: &str) -> Option<&EntityInstance> {
        match self.fields.get(name) {
            Some(FieldValue::Join(target)) => target.as_ref(),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub(crate) fn take_field(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }
}

/// Anything the entity manager accepts: a transient entity or a handle to
/// a managed one.
#[derive(Debug, Clone)]
pub enum EntityInstance {
    Transient(Entity),
    Managed(ManagedEntity),
}

impl EntityInstance {
    pub fn entity_type(&self) -> String {
        match self {
            EntityInstance::Transient(entity) => entity.entity_type().to_string(),
            EntityInstance::Managed(managed) => managed.entity_type(),
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, EntityInstance::Managed(_))
    }

    pub fn as_managed(&self) -> Option<&ManagedEntity> {
        match self {
            EntityInstance::Managed(managed) => Some(managed),
            EntityInstance::Transient(_) => None,
        }
    }

    pub fn as_transient(&self) -> Option<&Entity> {
        match self {
            EntityInstance::Transient(entity) => Some(entity),
            EntityInstance::Managed(_) => None,
        }
    }
}

impl From<Entity> for EntityInstance {
    fn from(entity: Entity) -> Self {
        EntityInstance::Transient(entity)
    }
}

impl From<ManagedEntity> for EntityInstance {
    fn from(managed: ManagedEntity) -> Self {
        EntityInstance::Managed(managed)
    }
}

impl From<&ManagedEntity> for EntityInstance {
    fn from(managed: &ManagedEntity) -> Self {
        EntityInstance::Managed(managed.clone())
    }
}
