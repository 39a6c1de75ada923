use std::path::PathBuf;

use lapse_storage::StorageError;

/// Errors returned by [`flush_discoveries`](crate::flush_discoveries).
///
/// Any error returned after the snapshot was opened means the snapshot was
/// rolled back: nothing staged by the run reached storage.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    /// A lock, read or write failed in the storage backend.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Status updates were staged for a kind that has no object table.
    #[error("object kind '{kind}' has no object table, but status updates were staged")]
    MissingObjectTable { kind: String },

    /// The kind's batch delete failed.
    #[error("deleting '{kind}' objects failed: {source}")]
    Delete {
        kind: String,
        #[source]
        source: StorageError,
    },
}

/// Errors raised while loading a [`LifecycleConfig`](crate::LifecycleConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
