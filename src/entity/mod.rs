// ============================================================================
// Entities
// ============================================================================
//
// Transient records built by the application, and managed handles composed
// with the interceptor that mediates every field access.
//
// ============================================================================

pub mod interceptor;
pub mod managed;
pub mod record;

pub use interceptor::{LifecycleState, Property};
pub use managed::ManagedEntity;
pub use record::{Entity, EntityInstance, FieldValue};

pub(crate) use interceptor::{Interceptor, JoinLink, LinkTarget};
pub(crate) use managed::transient_key;
