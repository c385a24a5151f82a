pub mod chord;
pub mod clock;
pub mod error;
pub mod field_error;
pub mod field_path;
pub mod field_value;
pub mod ids;
pub mod schema;
pub mod token;

pub use error::CoreError;
pub use field_error::FieldError;
pub use field_path::FieldPath;
pub use field_value::{FieldValue, Fields};
pub use ids::*;
pub use schema::{FieldRule, Schema};
pub use token::{TokenDigest, UndoToken};
