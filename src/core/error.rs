use thiserror::Error;

/// Failure reported by the row-access client layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Row group '{0}' is unavailable")]
    Unavailable(String),

    #[error("Write rejected by row group '{row_group}': {reason}")]
    Rejected { row_group: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

/// One mutator that failed while a batch was being flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushFailure {
    pub row_group: String,
    pub error: StoreError,
}

impl std::fmt::Display for FlushFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.row_group, self.error)
    }
}

#[derive(Error, Debug)]
pub enum MapError {
    #[error("Entity of type '{0}' is not in 'managed' state")]
    NotManaged(String),

    #[error("Entity of type '{0}' is already in 'managed' state, use merge() instead of persist()")]
    AlreadyManaged(String),

    #[error("Entity type '{0}' is not mapped")]
    NotMapped(String),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    #[error("A batch is already open on entity '{entity_type}' with key {key}")]
    BatchAlreadyOpen { entity_type: String, key: String },

    #[error("No batch is open on entity '{entity_type}' with key {key}")]
    NoActiveBatch { entity_type: String, key: String },

    #[error("{} mutator flush(es) failed: {}", .failures.len(), join_failures(.failures))]
    BatchFlush { failures: Vec<FlushFailure> },

    #[error("Entity '{entity_type}' with key {key} does not exist in the store")]
    EntityNotFound { entity_type: String, key: String },

    #[error("Property '{property}' is not declared on entity type '{entity_type}'")]
    UnknownProperty { entity_type: String, property: String },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Illegal cursor state: {0}")]
    IllegalCursorState(&'static str),

    #[error("Cascade depth limit of {0} exceeded")]
    CascadeDepthExceeded(usize),

    #[error("A global entity registry is already installed")]
    GlobalRegistryInstalled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MapError {
    /// Call-order or usage mistakes. Retrying the same call will fail again.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotManaged(_)
                | Self::AlreadyManaged(_)
                | Self::BatchAlreadyOpen { .. }
                | Self::NoActiveBatch { .. }
        )
    }

    /// Failures raised by the row-access layer. These may succeed on retry.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_) | Self::BatchFlush { .. })
    }
}

fn join_failures(failures: &[FlushFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, MapError>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;
