pub mod error;
pub mod etag;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

#[cfg(test)]
mod contract;

pub use error::StorageError;
pub use etag::resource_etag;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::*;
