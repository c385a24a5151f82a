use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use conduit_core::{Fields, ResourceId, ResourceKind, Schema};

use crate::error::StorageError;
use crate::traits::{RecordStore, ResourceRecord, Revision, INITIAL_VERSION};

struct Entry {
    record: ResourceRecord,
    history: Vec<Revision>,
}

/// In-process record store. A single mutex makes each conditional write atomic.
pub struct MemoryStore {
    entries: Mutex<HashMap<ResourceId, Entry>>,
    schema: Schema,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_schema(Schema::new())
    }

    pub fn with_schema(schema: Schema) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            schema,
        }
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ResourceId, Entry>>, StorageError> {
        self.entries.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, resource_id: ResourceId) -> Result<Option<ResourceRecord>, StorageError> {
        Ok(self.lock()?.get(&resource_id).map(|e| e.record.clone()))
    }

    fn compare_and_swap(
        &self,
        resource_id: ResourceId,
        expected_version: u64,
        fields: &Fields,
    ) -> Result<u64, StorageError> {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(&resource_id)
            .ok_or(StorageError::NotFound(resource_id))?;

        let current = entry.record.version;
        if current != expected_version {
            tracing::debug!(%resource_id, expected_version, current, "conditional write rejected");
            return Err(StorageError::VersionConflict {
                resource_id,
                expected: expected_version,
                current,
            });
        }
        self.schema.validate(fields).map_err(StorageError::Validation)?;

        entry.record.version = current + 1;
        entry.record.fields = fields.clone();
        entry.history.push(Revision {
            version: entry.record.version,
            fields: fields.clone(),
        });
        Ok(entry.record.version)
    }

    fn insert(
        &self,
        kind: ResourceKind,
        fields: Fields,
        sensitive: bool,
    ) -> Result<ResourceRecord, StorageError> {
        self.schema.validate(&fields).map_err(StorageError::Validation)?;
        let record = ResourceRecord {
            resource_id: ResourceId::new(),
            kind,
            version: INITIAL_VERSION,
            fields,
            sensitive,
        };
        let history = vec![Revision {
            version: record.version,
            fields: record.fields.clone(),
        }];
        self.lock()?.insert(
            record.resource_id,
            Entry {
                record: record.clone(),
                history,
            },
        );
        Ok(record)
    }

    fn delete(&self, resource_id: ResourceId) -> Result<(), StorageError> {
        match self.lock()?.remove(&resource_id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(resource_id)),
        }
    }

    fn history(&self, resource_id: ResourceId) -> Result<Vec<Revision>, StorageError> {
        Ok(self
            .lock()?
            .get(&resource_id)
            .map(|e| e.history.clone())
            .unwrap_or_default())
    }
}
