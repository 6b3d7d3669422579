use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid signature on entry {entry_id}")]
    InvalidSignature { entry_id: String },

    #[error("clock drift too large: remote is {delta_ms}ms ahead (max {max_ms}ms)")]
    HlcDriftTooLarge { delta_ms: u64, max_ms: u64 },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Rejected mutations. The catalog is left untouched when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("image key must not be empty")]
    EmptyImageKey,

    #[error("image not in catalog: {0}")]
    UnknownImage(String),

    #[error("image already in catalog: {0}")]
    ImageAlreadyPresent(String),

    #[error("field cannot be edited: {0}")]
    InvalidField(String),

    #[error("invalid tag: {0:?}")]
    InvalidTag(String),

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
}
