use iocat_core::{CoreError, ValidationError};
use iocat_storage::StorageError;
use thiserror::Error;

use crate::classify::ClassifierError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("a merge is in progress; commit or cancel it first")]
    MergeInProgress,

    #[error("merge was not started by this catalog or has already finished")]
    StaleMerge,

    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

impl EngineError {
    /// True when the catalog was left unchanged and the call can simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Sqlite(_) | StorageError::Io(_)) | Self::Io(_))
    }
}
