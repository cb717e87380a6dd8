use super::dirty::{DirtyFlag, Tracker};
use crate::core::value::write_joined;
use crate::core::{MapError, Result, Value};
use crate::metadata::PropertyMeta;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::rc::Rc;
use std::sync::Arc;

/// Dirty-tracking view over the live set backing a set property.
#[derive(Clone)]
pub struct TrackedSet {
    target: Rc<RefCell<BTreeSet<Value>>>,
    tracker: Tracker,
}

impl TrackedSet {
    pub(crate) fn new(target: Rc<RefCell<BTreeSet<Value>>>, tracker: Tracker) -> Self {
        Self { target, tracker }
    }

    pub fn len(&self) -> usize {
        self.target.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.borrow().is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.target.borrow().contains(value)
    }

    pub fn to_set(&self) -> BTreeSet<Value> {
        self.target.borrow().clone()
    }

    pub fn iter(&self) -> SetCursor {
        SetCursor {
            target: self.target.clone(),
            tracker: self.tracker.clone(),
            position: Bound::Unbounded,
            last: None,
        }
    }

    /// Returns `true` if the value was not present yet
    pub fn insert(&self, value: impl Into<Value>) -> bool {
        let inserted = self.target.borrow_mut().insert(value.into());
        if inserted {
            self.tracker.mark_dirty();
        }
        inserted
    }

    pub fn remove(&self, value: &Value) -> bool {
        let removed = self.target.borrow_mut().remove(value);
        if removed {
            self.tracker.mark_dirty();
        }
        removed
    }

    /// Keep the values `keep` accepts. The predicate sees a snapshot and
    /// may read this set.
    pub fn retain(&self, mut keep: impl FnMut(&Value) -> bool) {
        let rejected: Vec<Value> = self.to_set().into_iter().filter(|v| !keep(v)).collect();
        if rejected.is_empty() {
            return;
        }
        {
            let mut target = self.target.borrow_mut();
            for value in &rejected {
                target.remove(value);
            }
        }
        self.tracker.mark_dirty();
    }

    pub fn extend<I>(&self, values: I)
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.target.borrow_mut().extend(values);
        self.tracker.mark_dirty();
    }

    pub fn clear(&self) {
        self.target.borrow_mut().clear();
        self.tracker.mark_dirty();
    }

    pub fn dirty_flag(&self) -> &DirtyFlag {
        self.tracker.flag()
    }

    pub fn property(&self) -> &Arc<PropertyMeta> {
        self.tracker.property()
    }

    pub fn same_instance(&self, other: &TrackedSet) -> bool {
        Rc::ptr_eq(&self.target, &other.target)
            && self.tracker.flag().shares_cell_with(other.tracker.flag())
    }
}

impl PartialEq for TrackedSet {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.target, &other.target) || *self.target.borrow() == *other.target.borrow()
    }
}

impl Eq for TrackedSet {}

impl PartialEq<BTreeSet<Value>> for TrackedSet {
    fn eq(&self, other: &BTreeSet<Value>) -> bool {
        *self.target.borrow() == *other
    }
}

impl Hash for TrackedSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.borrow().hash(state);
    }
}

impl fmt::Debug for TrackedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.target.borrow(), f)
    }
}

impl fmt::Display for TrackedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        write_joined(f, self.target.borrow().iter())?;
        write!(f, "}}")
    }
}

impl IntoIterator for &TrackedSet {
    type Item = Value;
    type IntoIter = SetCursor;

    fn into_iter(self) -> SetCursor {
        self.iter()
    }
}

/// Cursor over a tracked set, in ascending order.
///
/// The cursor remembers the last element it yielded rather than an index,
/// so elements removed behind it do not shift its position.
pub struct SetCursor {
    target: Rc<RefCell<BTreeSet<Value>>>,
    tracker: Tracker,
    position: Bound<Value>,
    last: Option<Value>,
}

impl SetCursor {
    /// Remove the element last yielded
    pub fn remove(&mut self) -> Result<Value> {
        let value = self
            .last
            .take()
            .ok_or(MapError::IllegalCursorState("remove() called before next()"))?;
        if !self.target.borrow_mut().remove(&value) {
            return Err(MapError::IllegalCursorState("element no longer present"));
        }
        self.tracker.mark_dirty();
        Ok(value)
    }
}

impl Iterator for SetCursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let value = self
            .target
            .borrow()
            .range((self.position.clone(), Bound::Unbounded))
            .next()
            .cloned()?;
        self.position = Bound::Excluded(value.clone());
        self.last = Some(value.clone());
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyKind;
    use crate::tracking::test_support::tracker;

    fn set(values: &[i64]) -> (TrackedSet, DirtyFlag) {
        let flag = DirtyFlag::new();
        let backing = values.iter().map(|v| Value::from(*v)).collect();
        let set = TrackedSet::new(
            Rc::new(RefCell::new(backing)),
            tracker(PropertyKind::Set, flag.clone()),
        );
        (set, flag)
    }

    #[test]
    fn test_insert_and_remove_mark_only_on_change() {
        let (set, flag) = set(&[1, 2]);
        assert!(!set.insert(1));
        assert!(!set.remove(&Value::from(9)));
        assert!(!flag.is_dirty());

        assert!(set.insert(3));
        assert!(flag.is_dirty());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_clear_marks_dirty() {
        let (set, flag) = set(&[1]);
        set.clear();
        assert!(set.is_empty());
        assert!(flag.is_dirty());
    }

    #[test]
    fn test_callbacks_may_read_the_same_set() {
        let (set, flag) = set(&[1, 2, 3]);
        let view = set.clone();
        set.retain(|v| view.contains(v) && v != &Value::from(3));
        assert_eq!(set.to_string(), "{1, 2}");
        assert!(flag.is_dirty());

        flag.clear();
        set.retain(|_| view.len() == 2);
        assert!(!flag.is_dirty());

        set.extend(&view);
        assert_eq!(set.len(), 2);
        assert!(flag.is_dirty());
    }

    #[test]
    fn test_cursor_remove_keeps_iterating() {
        let (set, flag) = set(&[1, 2, 3, 4]);
        let mut cursor = set.iter();
        let mut seen = Vec::new();
        while let Some(value) = cursor.next() {
            if value.as_i64().is_some_and(|v| v % 2 == 0) {
                cursor.remove().unwrap();
            }
            seen.push(value);
        }

        assert_eq!(seen.len(), 4);
        assert!(flag.is_dirty());
        let expected: BTreeSet<Value> = [Value::from(1), Value::from(3)].into_iter().collect();
        assert_eq!(set, expected);
        assert_eq!(set.to_string(), "{1, 3}");
    }
}
