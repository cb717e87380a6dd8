use crate::core::{Columns, StoreResult, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A pending row operation held by a [`Mutator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowWrite {
    /// Merge columns into the row; `Value::Null` columns are removed.
    Put { key: Value, columns: Columns },

    /// Delete the whole row.
    Delete { key: Value },
}

impl RowWrite {
    pub fn key(&self) -> &Value {
        match self {
            RowWrite::Put { key, .. } => key,
            RowWrite::Delete { key } => key,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, RowWrite::Delete { .. })
    }
}

/// Row-access handle for one row-group - the storage partition of one
/// entity type, addressed by primary key.
///
/// This is the narrow surface the mapping core consumes from the store
/// client; connection handling, retries and timeouts live behind it.
#[async_trait]
pub trait RowAccess: Send + Sync {
    /// Name of the row-group this handle addresses
    fn row_group(&self) -> &str;

    /// Read every column of a row. `None` when the row does not exist.
    async fn read_row(&self, key: &Value) -> StoreResult<Option<Columns>>;

    /// Merge the given columns into a row, creating it if needed
    async fn write_columns(&self, key: &Value, columns: Columns) -> StoreResult<()>;

    /// Delete a row
    async fn delete_row(&self, key: &Value) -> StoreResult<()>;

    /// Create an accumulator bound to this row-group
    fn new_mutator(&self) -> Box<dyn Mutator>;
}

/// Accumulator of pending writes for one row-group, executed as one request.
#[async_trait]
pub trait Mutator: Send {
    fn row_group(&self) -> &str;

    /// Queue a write. Nothing reaches the store until [`Mutator::flush`].
    fn accumulate(&mut self, write: RowWrite);

    /// Writes accumulated since the last successful flush
    fn pending(&self) -> &[RowWrite];

    /// Execute every accumulated write. On success the mutator is empty;
    /// on failure nothing was applied and the writes stay pending.
    async fn flush(&mut self) -> StoreResult<()>;
}
