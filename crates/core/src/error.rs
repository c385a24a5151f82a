use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid field path {path:?}: {reason}")]
    InvalidFieldPath { path: String, reason: String },

    #[error("field path {path:?} crosses a non-container value at {segment:?}")]
    PathTypeMismatch { path: String, segment: String },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
