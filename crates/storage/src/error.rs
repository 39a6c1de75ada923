/// All errors that can be returned by a LifecycleStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The statement referenced a table the backend does not know.
    #[error("unknown table: {table}")]
    UnknownTable { table: String },

    /// The statement referenced a column the table does not have.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    /// A row lock could not be acquired before the backend's lock timeout.
    #[error("timed out waiting for row lock on {table}/{id}")]
    LockTimeout { table: String, id: u64 },

    /// A fixture row with the same id already exists.
    #[error("duplicate row: {table}/{id}")]
    DuplicateRow { table: String, id: u64 },

    /// A backend-specific storage error (connection, injected failure, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
