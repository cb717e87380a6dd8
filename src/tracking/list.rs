use super::dirty::{DirtyFlag, Tracker};
use crate::core::value::write_joined;
use crate::core::{MapError, Result, Value};
use crate::metadata::PropertyMeta;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

/// Dirty-tracking view over the live sequence backing a list property.
///
/// Reads go straight to the backing `Vec`. Mutations are applied to it
/// first and only then mark the property dirty, so a rejected mutation
/// leaves the flag untouched. Operations that end up changing nothing
/// (removing an absent element) do not mark.
#[derive(Clone)]
pub struct TrackedList {
    target: Rc<RefCell<Vec<Value>>>,
    tracker: Tracker,
}

impl TrackedList {
    pub(crate) fn new(target: Rc<RefCell<Vec<Value>>>, tracker: Tracker) -> Self {
        Self { target, tracker }
    }

    pub fn len(&self) -> usize {
        self.target.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.target.borrow().get(index).cloned()
    }

    pub fn first(&self) -> Option<Value> {
        self.target.borrow().first().cloned()
    }

    pub fn last(&self) -> Option<Value> {
        self.target.borrow().last().cloned()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.target.borrow().contains(value)
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.target.borrow().iter().position(|v| v == value)
    }

    /// Copy of the current elements
    pub fn to_vec(&self) -> Vec<Value> {
        self.target.borrow().clone()
    }

    /// Cursor over the elements. Removals and replacements made through the
    /// cursor are tracked like direct mutations.
    pub fn iter(&self) -> ListCursor {
        ListCursor {
            target: self.target.clone(),
            tracker: self.tracker.clone(),
            next: 0,
            last: None,
        }
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.target.borrow_mut().push(value.into());
        self.tracker.mark_dirty();
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        {
            let mut target = self.target.borrow_mut();
            if index > target.len() {
                return Err(MapError::IndexOutOfBounds {
                    index,
                    len: target.len(),
                });
            }
            target.insert(index, value.into());
        }
        self.tracker.mark_dirty();
        Ok(())
    }

    /// Replace the element at `index`, returning the previous one
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<Value> {
        let previous = {
            let mut target = self.target.borrow_mut();
            let len = target.len();
            let slot = target
                .get_mut(index)
                .ok_or(MapError::IndexOutOfBounds { index, len })?;
            std::mem::replace(slot, value.into())
        };
        self.tracker.mark_dirty();
        Ok(previous)
    }

    pub fn remove(&self, index: usize) -> Result<Value> {
        let removed = {
            let mut target = self.target.borrow_mut();
            if index >= target.len() {
                return Err(MapError::IndexOutOfBounds {
                    index,
                    len: target.len(),
                });
            }
            target.remove(index)
        };
        self.tracker.mark_dirty();
        Ok(removed)
    }

    /// Remove the first occurrence of `value`
    pub fn remove_item(&self, value: &Value) -> bool {
        let removed = {
            let mut target = self.target.borrow_mut();
            match target.iter().position(|v| v == value) {
                Some(index) => {
                    target.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.tracker.mark_dirty();
        }
        removed
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.target.borrow_mut().pop();
        if popped.is_some() {
            self.tracker.mark_dirty();
        }
        popped
    }

    /// Keep the elements `keep` accepts. The predicate runs before the list
    /// is borrowed for writing, so it may read this list.
    pub fn retain(&self, mut keep: impl FnMut(&Value) -> bool) {
        let mask: Vec<bool> = self.to_vec().iter().map(|v| keep(v)).collect();
        if mask.iter().all(|kept| *kept) {
            return;
        }
        let mut mask = mask.into_iter();
        self.target
            .borrow_mut()
            .retain(|_| mask.next().unwrap_or(true));
        self.tracker.mark_dirty();
    }

    /// Append every value. The input is drained first, so it may be a
    /// cursor over this list.
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

    /// Whether both wrappers decorate the same backing list with the same flag
    pub fn same_instance(&self, other: &TrackedList) -> bool {
        Rc::ptr_eq(&self.target, &other.target)
            && self.tracker.flag().shares_cell_with(other.tracker.flag())
    }
}

impl PartialEq for TrackedList {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.target, &other.target) || *self.target.borrow() == *other.target.borrow()
    }
}

impl Eq for TrackedList {}

impl PartialEq<Vec<Value>> for TrackedList {
    fn eq(&self, other: &Vec<Value>) -> bool {
        *self.target.borrow() == *other
    }
}

impl Hash for TrackedList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.borrow().hash(state);
    }
}

impl fmt::Debug for TrackedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.target.borrow(), f)
    }
}

impl fmt::Display for TrackedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        write_joined(f, self.target.borrow().iter())?;
        write!(f, "]")
    }
}

impl IntoIterator for &TrackedList {
    type Item = Value;
    type IntoIter = ListCursor;

    fn into_iter(self) -> ListCursor {
        self.iter()
    }
}

/// Cursor over a tracked list.
///
/// Yields copies of the elements; `remove` and `set` act on the element
/// last yielded and mark the property dirty.
pub struct ListCursor {
    target: Rc<RefCell<Vec<Value>>>,
    tracker: Tracker,
    next: usize,
    last: Option<usize>,
}

impl ListCursor {
    pub fn remove(&mut self) -> Result<Value> {
        let index = self
            .last
            .take()
            .ok_or(MapError::IllegalCursorState("remove() called before next()"))?;
        let removed = {
            let mut target = self.target.borrow_mut();
            if index >= target.len() {
                return Err(MapError::IllegalCursorState("element no longer present"));
            }
            target.remove(index)
        };
        self.next = index;
        self.tracker.mark_dirty();
        Ok(removed)
    }

    pub fn set(&mut self, value: impl Into<Value>) -> Result<Value> {
        let index = self
            .last
            .ok_or(MapError::IllegalCursorState("set() called before next()"))?;
        let previous = {
            let mut target = self.target.borrow_mut();
            let slot = target
                .get_mut(index)
                .ok_or(MapError::IllegalCursorState("element no longer present"))?;
            std::mem::replace(slot, value.into())
        };
        self.tracker.mark_dirty();
        Ok(previous)
    }
}

impl Iterator for ListCursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let value = self.target.borrow().get(self.next).cloned()?;
        self.last = Some(self.next);
        self.next += 1;
        Some(value)
    }
}
