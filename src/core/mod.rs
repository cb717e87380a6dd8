pub mod error;
pub mod value;

pub use error::{FlushFailure, MapError, Result, StoreError, StoreResult};
pub use value::{Columns, Value};
