use super::cascade::Cascade;
use crate::core::Value;
use crate::storage::RowAccess;
use std::fmt;
use std::sync::Arc;

/// How a property is stored and how reads of it are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Scalar column value
    Simple,
    /// Ordered sequence, read through a `TrackedList`
    List,
    /// Sorted set, read through a `TrackedSet`
    Set,
    /// Key/value mapping, read through a `TrackedMap`
    Map,
    /// Reference to another entity; the column holds the target's primary key
    Join,
}

impl PropertyKind {
    pub fn is_container(&self) -> bool {
        matches!(self, Self::List | Self::Set | Self::Map)
    }

    /// Whether a column value may be stored in a property of this kind.
    /// `Null` is accepted everywhere except on joins, which take entities.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Join, _) => false,
            (_, Value::Null) => true,
            (Self::Simple, v) => !v.is_container(),
            (Self::List, Value::List(_)) => true,
            (Self::Set, Value::Set(_)) => true,
            (Self::Map, Value::Map(_)) => true,
            _ => false,
        }
    }

    /// Value a container property starts with when its column is absent
    pub fn empty_value(&self) -> Value {
        match self {
            Self::List => Value::List(Vec::new()),
            Self::Set => Value::Set(Default::default()),
            Self::Map => Value::Map(Default::default()),
            Self::Simple | Self::Join => Value::Null,
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "SIMPLE"),
            Self::List => write!(f, "LIST"),
            Self::Set => write!(f, "SET"),
            Self::Map => write!(f, "MAP"),
            Self::Join => write!(f, "JOIN"),
        }
    }
}

/// Resolved join target of a join property.
#[derive(Clone)]
pub struct JoinMeta {
    pub target_type: String,
    pub target_id_property: String,
    pub cascade: Cascade,
    pub row_access: Arc<dyn RowAccess>,
}

impl fmt::Debug for JoinMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinMeta")
            .field("target_type", &self.target_type)
            .field("target_id_property", &self.target_id_property)
            .field("cascade", &self.cascade)
            .field("row_group", &self.row_access.row_group())
            .finish()
    }
}

/// Mapping of one entity field onto its storage column.
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    name: String,
    column: String,
    kind: PropertyKind,
    join: Option<JoinMeta>,
}

impl PropertyMeta {
    pub(crate) fn new(name: String, column: String, kind: PropertyKind, join: Option<JoinMeta>) -> Self {
        Self {
            name,
            column,
            kind,
            join,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn is_join(&self) -> bool {
        self.kind == PropertyKind::Join
    }

    pub fn join(&self) -> Option<&JoinMeta> {
        self.join.as_ref()
    }

    /// Cascade policy of a join property. `Cascade::NONE` for everything else.
    pub fn cascade(&self) -> Cascade {
        self.join.as_ref().map_or(Cascade::NONE, |join| join.cascade)
    }
}
