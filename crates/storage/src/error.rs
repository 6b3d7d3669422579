use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a catalog file: {0}")]
    NotACatalog(String),

    #[error("failed to replace catalog file: {0}")]
    Persist(String),

    #[error("catalog file was replaced but could not be reopened: {0}")]
    Reopen(String),

    #[error("core error: {0}")]
    Core(#[from] iocat_core::CoreError),
}

impl From<tempfile::PersistError> for StorageError {
    fn from(e: tempfile::PersistError) -> Self {
        Self::Persist(e.error.to_string())
    }
}
