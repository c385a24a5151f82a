use conduit_core::{FieldError, ResourceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// Conditional write rejected: the record moved past `expected`.
    #[error("version conflict on {resource_id}: expected v{expected}, found v{current}")]
    VersionConflict {
        resource_id: ResourceId,
        expected: u64,
        current: u64,
    },

    #[error("validation failed: {0}")]
    Validation(FieldError),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("core error: {0}")]
    Core(#[from] conduit_core::CoreError),
}
