use super::property::PropertyMeta;
use crate::core::{MapError, Result};
use crate::storage::RowAccess;
use std::fmt;
use std::sync::Arc;

/// Descriptor of one mapped entity type. Immutable once the registry is
/// built, and shared by `Arc` between every managed entity of the type.
#[derive(Clone)]
pub struct EntityMeta {
    entity_type: String,
    id_property: String,
    properties: Vec<Arc<PropertyMeta>>,
    row_access: Arc<dyn RowAccess>,
}

impl EntityMeta {
    pub(crate) fn new(
        entity_type: String,
        id_property: String,
        properties: Vec<Arc<PropertyMeta>>,
        row_access: Arc<dyn RowAccess>,
    ) -> Self {
        Self {
            entity_type,
            id_property,
            properties,
            row_access,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Property holding the primary key. It is the row key, not a column.
    pub fn id_property(&self) -> &str {
        &self.id_property
    }

    pub fn is_id(&self, property: &str) -> bool {
        self.id_property == property
    }

    /// Every property in declaration order, the primary key included
    pub fn properties(&self) -> impl Iterator<Item = &Arc<PropertyMeta>> {
        self.properties.iter()
    }

    /// Properties stored as columns of the base row
    pub fn column_properties(&self) -> impl Iterator<Item = &Arc<PropertyMeta>> {
        self.properties.iter().filter(|p| !self.is_id(p.name()))
    }

    pub fn join_properties(&self) -> impl Iterator<Item = &Arc<PropertyMeta>> {
        self.properties.iter().filter(|p| p.is_join())
    }

    pub fn property(&self, name: &str) -> Option<&Arc<PropertyMeta>> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn require_property(&self, name: &str) -> Result<&Arc<PropertyMeta>> {
        self.property(name).ok_or_else(|| MapError::UnknownProperty {
            entity_type: self.entity_type.clone(),
            property: name.to_string(),
        })
    }

    pub fn row_access(&self) -> &Arc<dyn RowAccess> {
        &self.row_access
    }

    pub fn row_group(&self) -> &str {
        self.row_access.row_group()
    }
}

impl fmt::Debug for EntityMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMeta")
            .field("entity_type", &self.entity_type)
            .field("id_property", &self.id_property)
            .field("row_group", &self.row_group())
            .field("properties", &self.properties)
            .finish()
    }
}
