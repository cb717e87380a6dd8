// ============================================================================
// Container Mutation Tracking
// ============================================================================
//
// Wrappers over the live containers of a managed entity. Every wrapper of a
// property shares that property's DirtyFlag with the owning interceptor.
//
// ============================================================================

pub mod dirty;
pub mod list;
pub mod map;
pub mod set;

pub use dirty::DirtyFlag;
pub(crate) use dirty::Tracker;
pub use list::{ListCursor, TrackedList};
pub use map::{EntryCursor, KeyCursor, TrackedEntry, TrackedMap, ValueCursor};
pub use set::{SetCursor, TrackedSet};
