use conduit_core::{CoreError, OperationId, ResourceId, ShelfId};
use conduit_storage::StorageError;
use thiserror::Error;

use crate::operation::OperationStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("resource {resource_id} is not a target of operation {operation_id}")]
    InvalidTarget {
        operation_id: OperationId,
        resource_id: ResourceId,
    },

    #[error("invalid field path: {0}")]
    InvalidFieldPath(String),

    #[error("cannot start an operation from an empty shelf")]
    EmptyShelf,

    #[error("shelf name must not be blank: {0:?}")]
    InvalidShelfName(String),

    #[error("shelf not found: {0}")]
    ShelfNotFound(ShelfId),

    #[error("shelf {0} is the session's last shelf")]
    LastShelf(ShelfId),

    #[error("invalid merge: {0}")]
    InvalidMerge(String),

    #[error("operation {0} must be previewed before commit")]
    NotPreviewed(OperationId),

    #[error("operation {operation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        operation_id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("{} target(s) still conflicted", resource_ids.len())]
    UnresolvedConflict { resource_ids: Vec<ResourceId> },

    #[error("nothing to undo for operation {0}")]
    NothingToUndo(OperationId),

    #[error("undo token rejected for operation {0}")]
    InvalidUndoToken(OperationId),

    #[error("operation {0} has not been committed")]
    NotCommitted(OperationId),

    #[error("operation {0} has no failed targets")]
    NoFailedTargets(OperationId),

    #[error("invalid configuration: {0}")]
    Config(String),
}
