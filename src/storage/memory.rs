use super::engine::{Mutator, RowAccess, RowWrite};
use crate::core::{Columns, StoreError, StoreResult, Value};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

/// Operation observed by a [`MemoryStore`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Read { row_group: String, key: Value },
    Write { row_group: String, key: Value, columns: Columns },
    Delete { row_group: String, key: Value },
    Flush { row_group: String, writes: Vec<RowWrite> },
}

impl StoreEvent {
    /// `true` for writes and deletes issued outside of a mutator
    pub fn is_direct_write(&self) -> bool {
        matches!(self, StoreEvent::Write { .. } | StoreEvent::Delete { .. })
    }
}

type RowGroup = BTreeMap<Value, Columns>;

#[derive(Default)]
struct StoreInner {
    groups: RwLock<HashMap<String, RowGroup>>,
    journal: RwLock<Vec<StoreEvent>>,
    failing: RwLock<HashSet<String>>,
}

/// In-memory wide-row store.
///
/// Each row-group is a sorted map of primary key to columns. The store
/// records every operation it serves and can be told to fail a row-group,
/// which is how the tests observe what the mapping layer sends down.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row-access handle for one row-group
    pub fn row_access(&self, row_group: &str) -> Arc<MemoryRowAccess> {
        Arc::new(MemoryRowAccess {
            store: self.clone(),
            row_group: row_group.to_string(),
        })
    }

    /// Seed a row without going through the journal
    pub async fn insert_row(&self, row_group: &str, key: impl Into<Value>, columns: Columns) {
        let mut groups = self.inner.groups.write().await;
        groups
            .entry(row_group.to_string())
            .or_default()
            .insert(key.into(), columns);
    }

    /// Current content of a row, without going through the journal
    pub async fn row(&self, row_group: &str, key: &Value) -> Option<Columns> {
        let groups = self.inner.groups.read().await;
        groups.get(row_group).and_then(|rows| rows.get(key)).cloned()
    }

    pub async fn row_count(&self, row_group: &str) -> usize {
        let groups = self.inner.groups.read().await;
        groups.get(row_group).map_or(0, |rows| rows.len())
    }

    /// Make every operation on the row-group fail until recovered
    pub async fn fail_row_group(&self, row_group: &str) {
        self.inner.failing.write().await.insert(row_group.to_string());
    }

    pub async fn recover_row_group(&self, row_group: &str) {
        self.inner.failing.write().await.remove(row_group);
    }

    pub async fn events(&self) -> Vec<StoreEvent> {
        self.inner.journal.read().await.clone()
    }

    pub async fn clear_events(&self) {
        self.inner.journal.write().await.clear();
    }

    /// Writes and deletes issued directly through [`RowAccess`]
    pub async fn direct_writes(&self) -> Vec<StoreEvent> {
        self.events()
            .await
            .into_iter()
            .filter(StoreEvent::is_direct_write)
            .collect()
    }

    /// Executed mutator flushes as `(row_group, writes)`
    pub async fn flushes(&self) -> Vec<(String, Vec<RowWrite>)> {
        self.events()
            .await
            .into_iter()
            .filter_map(|event| match event {
                StoreEvent::Flush { row_group, writes } => Some((row_group, writes)),
                _ => None,
            })
            .collect()
    }

    async fn check_available(&self, row_group: &str) -> StoreResult<()> {
        if self.inner.failing.read().await.contains(row_group) {
            return Err(StoreError::Unavailable(row_group.to_string()));
        }
        Ok(())
    }

    async fn record(&self, event: StoreEvent) {
        trace!(?event, "memory store operation");
        self.inner.journal.write().await.push(event);
    }

    async fn apply(&self, row_group: &str, writes: &[RowWrite]) {
        let mut groups = self.inner.groups.write().await;
        let rows = groups.entry(row_group.to_string()).or_default();
        for write in writes {
            match write {
                RowWrite::Put { key, columns } => {
                    let row = rows.entry(key.clone()).or_default();
                    for (name, value) in columns {
                        if value.is_null() {
                            row.remove(name);
                        } else {
                            row.insert(name.clone(), value.clone());
                        }
                    }
                }
                RowWrite::Delete { key } => {
                    rows.remove(key);
                }
            }
        }
    }
}

/// [`RowAccess`] over one row-group of a [`MemoryStore`]
pub struct MemoryRowAccess {
    store: MemoryStore,
    row_group: String,
}

#[async_trait]
impl RowAccess for MemoryRowAccess {
    fn row_group(&self) -> &str {
        &self.row_group
    }

    async fn read_row(&self, key: &Value) -> StoreResult<Option<Columns>> {
        self.store.check_available(&self.row_group).await?;
        self.store
            .record(StoreEvent::Read {
                row_group: self.row_group.clone(),
                key: key.clone(),
            })
            .await;
        Ok(self.store.row(&self.row_group, key).await)
    }

    async fn write_columns(&self, key: &Value, columns: Columns) -> StoreResult<()> {
        self.store.check_available(&self.row_group).await?;
        let write = RowWrite::Put {
            key: key.clone(),
            columns: columns.clone(),
        };
        self.store.apply(&self.row_group, std::slice::from_ref(&write)).await;
        self.store
            .record(StoreEvent::Write {
                row_group: self.row_group.clone(),
                key: key.clone(),
                columns,
            })
            .await;
        Ok(())
    }

    async fn delete_row(&self, key: &Value) -> StoreResult<()> {
        self.store.check_available(&self.row_group).await?;
        let write = RowWrite::Delete { key: key.clone() };
        self.store.apply(&self.row_group, std::slice::from_ref(&write)).await;
        self.store
            .record(StoreEvent::Delete {
                row_group: self.row_group.clone(),
                key: key.clone(),
            })
            .await;
        Ok(())
    }

    fn new_mutator(&self) -> Box<dyn Mutator> {
        Box::new(MemoryMutator {
            store: self.store.clone(),
            row_group: self.row_group.clone(),
            pending: Vec::new(),
        })
    }
}

/// [`Mutator`] that applies its writes to a [`MemoryStore`] under one lock
pub struct MemoryMutator {
    store: MemoryStore,
    row_group: String,
    pending: Vec<RowWrite>,
}

#[async_trait]
impl Mutator for MemoryMutator {
    fn row_group(&self) -> &str {
        &self.row_group
    }

    fn accumulate(&mut self, write: RowWrite) {
        self.pending.push(write);
    }

    fn pending(&self) -> &[RowWrite] {
        &self.pending
    }

    async fn flush(&mut self) -> StoreResult<()> {
        self.store.check_available(&self.row_group).await?;
        let writes = std::mem::take(&mut self.pending);
        self.store.apply(&self.row_group, &writes).await;
        self.store
            .record(StoreEvent::Flush {
                row_group: self.row_group.clone(),
                writes,
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(pairs: &[(&str, Value)]) -> Columns {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_write_merges_columns_and_null_removes() {
        let store = MemoryStore::new();
        let users = store.row_access("users");
        let key = Value::from(1);

        users
            .write_columns(&key, columns(&[("name", "alice".into()), ("age", 30.into())]))
            .await
            .unwrap();
        users
            .write_columns(&key, columns(&[("age", Value::Null), ("city", "Oslo".into())]))
            .await
            .unwrap();

        let row = users.read_row(&key).await.unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("alice")));
        assert_eq!(row.get("city"), Some(&Value::from("Oslo")));
        assert!(!row.contains_key("age"));
        assert_eq!(store.direct_writes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_mutator_applies_nothing_until_flush() {
        let store = MemoryStore::new();
        let users = store.row_access("users");
        let mut mutator = users.new_mutator();

        mutator.accumulate(RowWrite::Put {
            key: Value::from(1),
            columns: columns(&[("name", "bob".into())]),
        });
        mutator.accumulate(RowWrite::Delete { key: Value::from(2) });
        assert_eq!(mutator.pending().len(), 2);
        assert_eq!(store.row_count("users").await, 0);

        mutator.flush().await.unwrap();
        assert!(mutator.pending().is_empty());
        assert_eq!(store.row_count("users").await, 1);

        let flushes = store.flushes().await;
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].0, "users");
        assert_eq!(flushes[0].1.len(), 2);
        assert!(store.direct_writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_row_group_keeps_writes_pending() {
        let store = MemoryStore::new();
        let users = store.row_access("users");
        let mut mutator = users.new_mutator();
        mutator.accumulate(RowWrite::Delete { key: Value::from(1) });

        store.fail_row_group("users").await;
        let err = mutator.flush().await.unwrap_err();
        assert_eq!(err, StoreError::Unavailable("users".to_string()));
        assert_eq!(mutator.pending().len(), 1);
        assert!(users.read_row(&Value::from(1)).await.is_err());

        store.recover_row_group("users").await;
        mutator.flush().await.unwrap();
        assert_eq!(store.flushes().await.len(), 1);
    }

    #[test]
    fn test_seeded_rows_are_not_journaled() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            store
                .insert_row("users", 9, columns(&[("name", "eve".into())]))
                .await;
            assert_eq!(store.row_count("users").await, 1);
            assert!(store.events().await.is_empty());
        });
    }
}
