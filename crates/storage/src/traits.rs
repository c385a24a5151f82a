use conduit_core::{Fields, ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Version every freshly inserted resource starts at.
pub const INITIAL_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    pub version: u64,
    pub fields: Fields,
    /// Presentation hint only; the engine never branches on it.
    pub sensitive: bool,
}

/// One committed state of a resource, kept for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub version: u64,
    pub fields: Fields,
}

/// Canonical store of versioned resources.
///
/// The only mutation the bulk-edit engine performs is `compare_and_swap`,
/// which must be atomic with respect to every other writer of the same
/// record. Outcomes of a rejected write, checked in this order:
///
/// 1. `StorageError::NotFound` when the record does not exist,
/// 2. `StorageError::VersionConflict` when `expected_version` is stale,
/// 3. `StorageError::Validation` when the new fields break the schema.
///
/// A rejected write leaves the record untouched.
pub trait RecordStore: Send + Sync {
    fn get(&self, resource_id: ResourceId) -> Result<Option<ResourceRecord>, StorageError>;

    /// Replace the record's fields if it is still at `expected_version`.
    /// Returns the new version, always `expected_version + 1`.
    fn compare_and_swap(
        &self,
        resource_id: ResourceId,
        expected_version: u64,
        fields: &Fields,
    ) -> Result<u64, StorageError>;

    fn insert(
        &self,
        kind: ResourceKind,
        fields: Fields,
        sensitive: bool,
    ) -> Result<ResourceRecord, StorageError>;

    fn delete(&self, resource_id: ResourceId) -> Result<(), StorageError>;

    /// Every committed revision, oldest first.
    fn history(&self, resource_id: ResourceId) -> Result<Vec<Revision>, StorageError>;
}
