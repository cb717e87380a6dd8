pub mod engine;
pub mod memory;

pub use engine::{Mutator, RowAccess, RowWrite};
pub use memory::{MemoryMutator, MemoryRowAccess, MemoryStore, StoreEvent};
