pub mod conformance;
mod error;
mod memory;
mod record;
mod statement;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage, DEFAULT_LOCK_TIMEOUT};
pub use record::{Row, StatusRow, STATUS_COLUMN};
pub use statement::{delete_sql, id_condition, lock_query_sql, Assignment, Statement};
pub use traits::LifecycleStorage;
