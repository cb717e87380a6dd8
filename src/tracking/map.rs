use super::dirty::{DirtyFlag, Tracker};
use crate::core::{MapError, Result, Value};
use crate::metadata::PropertyMeta;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::rc::Rc;
use std::sync::Arc;

type Backing = Rc<RefCell<BTreeMap<Value, Value>>>;

/// Dirty-tracking view over the live mapping backing a map property.
///
/// Besides direct mutations, the key, value and entry cursors also track
/// removals, and every entry yielded by [`TrackedMap::entries`] tracks
/// `set_value`.
#[derive(Clone)]
pub struct TrackedMap {
    target: Backing,
    tracker: Tracker,
}

impl TrackedMap {
    pub(crate) fn new(target: Backing, tracker: Tracker) -> Self {
        Self { target, tracker }
    }

    pub fn len(&self) -> usize {
        self.target.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.borrow().is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.target.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.target.borrow().contains_key(key)
    }

    pub fn contains_value(&self, value: &Value) -> bool {
        self.target.borrow().values().any(|v| v == value)
    }

    pub fn to_map(&self) -> BTreeMap<Value, Value> {
        self.target.borrow().clone()
    }

    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        let previous = self.target.borrow_mut().insert(key.into(), value.into());
        self.tracker.mark_dirty();
        previous
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        let removed = self.target.borrow_mut().remove(key);
        if removed.is_some() {
            self.tracker.mark_dirty();
        }
        removed
    }

    /// Keep the entries `keep` accepts. The predicate sees a snapshot and
    /// may read this map.
    pub fn retain(&self, mut keep: impl FnMut(&Value, &Value) -> bool) {
        let rejected: Vec<Value> = self
            .to_map()
            .into_iter()
            .filter(|(k, v)| !keep(k, v))
            .map(|(k, _)| k)
            .collect();
        if rejected.is_empty() {
            return;
        }
        {
            let mut target = self.target.borrow_mut();
            for key in &rejected {
                target.remove(key);
            }
        }
        self.tracker.mark_dirty();
    }

    pub fn extend<K, V, I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        let entries: Vec<(Value, Value)> = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.target.borrow_mut().extend(entries);
        self.tracker.mark_dirty();
    }

    pub fn clear(&self) {
        self.target.borrow_mut().clear();
        self.tracker.mark_dirty();
    }

    pub fn keys(&self) -> KeyCursor {
        KeyCursor {
            position: self.position(),
        }
    }

    pub fn values(&self) -> ValueCursor {
        ValueCursor {
            position: self.position(),
        }
    }

    pub fn entries(&self) -> EntryCursor {
        EntryCursor {
            position: self.position(),
        }
    }

    pub fn dirty_flag(&self) -> &DirtyFlag {
        self.tracker.flag()
    }

    pub fn property(&self) -> &Arc<PropertyMeta> {
        self.tracker.property()
    }

    pub fn same_instance(&self, other: &TrackedMap) -> bool {
        Rc::ptr_eq(&self.target, &other.target)
            && self.tracker.flag().shares_cell_with(other.tracker.flag())
    }

    fn position(&self) -> CursorPosition {
        CursorPosition {
            target: self.target.clone(),
            tracker: self.tracker.clone(),
            after: Bound::Unbounded,
            last: None,
        }
    }
}

impl PartialEq for TrackedMap {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.target, &other.target) || *self.target.borrow() == *other.target.borrow()
    }
}

impl Eq for TrackedMap {}

impl PartialEq<BTreeMap<Value, Value>> for TrackedMap {
    fn eq(&self, other: &BTreeMap<Value, Value>) -> bool {
        *self.target.borrow() == *other
    }
}

impl Hash for TrackedMap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.borrow().hash(state);
    }
}

impl fmt::Debug for TrackedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.target.borrow(), f)
    }
}

impl fmt::Display for TrackedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Value::Map(self.target.borrow().clone()), f)
    }
}

/// Key-ordered position shared by the three map cursors
struct CursorPosition {
    target: Backing,
    tracker: Tracker,
    after: Bound<Value>,
    last: Option<Value>,
}

impl CursorPosition {
    fn advance(&mut self) -> Option<(Value, Value)> {
        let (key, value) = self
            .target
            .borrow()
            .range((self.after.clone(), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))?;
        self.after = Bound::Excluded(key.clone());
        self.last = Some(key.clone());
        Some((key, value))
    }

    fn remove_last(&mut self) -> Result<(Value, Value)> {
        let key = self
            .last
            .take()
            .ok_or(MapError::IllegalCursorState("remove() called before next()"))?;
        let value = self
            .target
            .borrow_mut()
            .remove(&key)
            .ok_or(MapError::IllegalCursorState("entry no longer present"))?;
        self.tracker.mark_dirty();
        Ok((key, value))
    }
}

/// Cursor over the keys of a tracked map
pub struct KeyCursor {
    position: CursorPosition,
}

impl KeyCursor {
    /// Remove the entry whose key was last yielded
    pub fn remove(&mut self) -> Result<Value> {
        self.position.remove_last().map(|(key, _)| key)
    }
}

impl Iterator for KeyCursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.position.advance().map(|(key, _)| key)
    }
}

/// Cursor over the values of a tracked map, in key order
pub struct ValueCursor {
    position: CursorPosition,
}

impl ValueCursor {
    /// Remove the entry whose value was last yielded
    pub fn remove(&mut self) -> Result<Value> {
        self.position.remove_last().map(|(_, value)| value)
    }
}

impl Iterator for ValueCursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.position.advance().map(|(_, value)| value)
    }
}

/// Cursor over the entries of a tracked map.
///
/// Each yielded [`TrackedEntry`] writes through to the backing map.
pub struct EntryCursor {
    position: CursorPosition,
}

impl EntryCursor {
    /// Remove the entry last yielded
    pub fn remove(&mut self) -> Result<(Value, Value)> {
        self.position.remove_last()
    }
}

impl Iterator for EntryCursor {
    type Item = TrackedEntry;

    fn next(&mut self) -> Option<TrackedEntry> {
        let (key, _) = self.position.advance()?;
        Some(TrackedEntry {
            key,
            target: self.position.target.clone(),
            tracker: self.position.tracker.clone(),
        })
    }
}

/// One live entry of a tracked map
pub struct TrackedEntry {
    key: Value,
    target: Backing,
    tracker: Tracker,
}

impl TrackedEntry {
    pub fn key(&self) -> &Value {
        &self.key
    }

    /// Current value of the entry, `None` once the entry was removed
    pub fn value(&self) -> Option<Value> {
        self.target.borrow().get(&self.key).cloned()
    }

    /// Replace the value in the backing map, returning the previous one
    pub fn set_value(&self, value: impl Into<Value>) -> Result<Value> {
        let previous = {
            let mut target = self.target.borrow_mut();
            let slot = target
                .get_mut(&self.key)
                .ok_or(MapError::IllegalCursorState("entry no longer present"))?;
            std::mem::replace(slot, value.into())
        };
        self.tracker.mark_dirty();
        Ok(previous)
    }
}

impl fmt::Debug for TrackedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackedEntry")
            .field(&self.key)
            .field(&self.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyKind;
    use crate::tracking::test_support::tracker;

    fn map(entries: &[(&str, i64)]) -> (TrackedMap, DirtyFlag) {
        let flag = DirtyFlag::new();
        let backing = entries
            .iter()
            .map(|(k, v)| (Value::from(*k), Value::from(*v)))
            .collect();
        let map = TrackedMap::new(
            Rc::new(RefCell::new(backing)),
            tracker(PropertyKind::Map, flag.clone()),
        );
        (map, flag)
    }

    #[test]
    fn test_reads_and_iteration_stay_clean() {
        let (map, flag) = map(&[("a", 1), ("b", 2)]);
        assert_eq!(map.get(&Value::from("a")), Some(Value::from(1)));
        assert!(map.contains_value(&Value::from(2)));
        assert_eq!(map.keys().count(), 2);
        assert_eq!(map.values().collect::<Vec<_>>(), vec![Value::from(1), Value::from(2)]);
        for entry in map.entries() {
            assert!(entry.value().is_some());
        }
        assert!(!flag.is_dirty());
    }

    #[test]
    fn test_entry_set_value_marks_dirty() {
        let (map, flag) = map(&[("a", 1), ("b", 2)]);
        for entry in map.entries() {
            if entry.key() == &Value::from("b") {
                let previous = entry.set_value(20).unwrap();
                assert_eq!(previous, Value::from(2));
            }
        }
        assert!(flag.is_dirty());
        assert_eq!(map.get(&Value::from("b")), Some(Value::from(20)));
    }

    #[test]
    fn test_cursor_removals_mark_dirty() {
        let (map, flag) = map(&[("a", 1), ("b", 2), ("c", 3)]);

        let mut keys = map.keys();
        assert!(keys.remove().is_err());
        assert!(!flag.is_dirty());
        assert_eq!(keys.next(), Some(Value::from("a")));
        keys.remove().unwrap();
        assert!(flag.is_dirty());

        flag.clear();
        let mut values = map.values();
        assert_eq!(values.next(), Some(Value::from(2)));
        assert_eq!(values.remove().unwrap(), Value::from(2));
        assert!(flag.is_dirty());

        flag.clear();
        let mut entries = map.entries();
        let entry = entries.next().unwrap();
        assert_eq!(entry.key(), &Value::from("c"));
        entries.remove().unwrap();
        assert!(flag.is_dirty());
        assert!(map.is_empty());
        assert!(entry.set_value(1).is_err());
    }

    #[test]
    fn test_callbacks_may_read_the_same_map() {
        let (map, flag) = map(&[("a", 1), ("b", 2), ("c", 3)]);
        let view = map.clone();
        map.retain(|k, _| view.len() == 3 && k != &Value::from("b"));
        assert_eq!(map.to_string(), "{'a': 1, 'c': 3}");
        assert!(flag.is_dirty());

        flag.clear();
        map.retain(|k, _| view.contains_key(k));
        assert!(!flag.is_dirty());

        map.extend(view.entries().map(|e| (e.key().clone(), Value::from(0))));
        assert_eq!(map.get(&Value::from("a")), Some(Value::from(0)));
        assert_eq!(map.len(), 2);
        assert!(flag.is_dirty());
    }

    #[test]
    fn test_remove_absent_key_is_not_a_mutation() {
        let (map, flag) = map(&[("a", 1)]);
        assert_eq!(map.remove(&Value::from("z")), None);
        assert!(!flag.is_dirty());
        assert_eq!(map.insert("z", 26), None);
        assert!(flag.is_dirty());
        assert_eq!(map.to_string(), "{'a': 1, 'z': 26}");
    }
}
