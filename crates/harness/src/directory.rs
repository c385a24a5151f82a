use std::sync::Arc;

use conduit_core::{FieldPath, FieldValue, Fields, ResourceId, ResourceKind, Schema};
use conduit_engine::{BulkEditSession, EngineConfig};
use conduit_storage::{MemoryStore, RecordStore, ResourceRecord, SqliteStore, StorageError};
use tempfile::TempDir;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// A shared resource directory that several bulk-edit sessions work against,
/// plus helpers for seeding records and simulating outside writers.
pub struct TestDirectory<S: RecordStore> {
    store: Arc<S>,
    _dir: Option<TempDir>,
}

impl TestDirectory<MemoryStore> {
    /// In-memory directory enforcing the HSDS field rules.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::with_schema(Schema::hsds()))
    }

    pub fn unvalidated() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl Default for TestDirectory<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDirectory<SqliteStore> {
    /// SQLite file in a temporary directory that lives as long as the fixture.
    pub fn on_disk() -> TestResult<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("directory.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;
        let store = SqliteStore::open_with_schema(path, Schema::hsds())?;
        Ok(Self {
            store: Arc::new(store),
            _dir: Some(dir),
        })
    }
}

impl<S: RecordStore> TestDirectory<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store: Arc::new(store),
            _dir: None,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn session(&self) -> BulkEditSession<S> {
        BulkEditSession::new(Arc::clone(&self.store))
    }

    pub fn session_with(&self, config: EngineConfig) -> BulkEditSession<S> {
        BulkEditSession::with_config(Arc::clone(&self.store), config)
    }

    pub fn seed(&self, kind: ResourceKind, fields: Fields) -> Result<ResourceRecord, StorageError> {
        self.store.insert(kind, fields, false)
    }

    pub fn seed_service(&self, name: &str, phone: &str) -> Result<ResourceId, StorageError> {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::text(name));
        fields.insert("phone.primary".into(), FieldValue::text(phone));
        fields.insert("status".into(), FieldValue::text("active"));
        Ok(self.seed(ResourceKind::Service, fields)?.resource_id)
    }

    pub fn get(&self, resource_id: ResourceId) -> TestResult<ResourceRecord> {
        Ok(self
            .store
            .get(resource_id)?
            .ok_or_else(|| format!("resource {resource_id} missing"))?)
    }

    pub fn version(&self, resource_id: ResourceId) -> TestResult<u64> {
        Ok(self.get(resource_id)?.version)
    }

    pub fn field(&self, resource_id: ResourceId, path: &str) -> TestResult<Option<FieldValue>> {
        let path = FieldPath::parse(path)?;
        Ok(path.get(&self.get(resource_id)?.fields).cloned())
    }

    /// An edit made outside any bulk session, as another volunteer would.
    pub fn write(
        &self,
        resource_id: ResourceId,
        path: &str,
        value: impl Into<FieldValue>,
    ) -> TestResult<u64> {
        let record = self.get(resource_id)?;
        let mut fields = record.fields;
        FieldPath::parse(path)?.set(&mut fields, value.into())?;
        Ok(self.store.compare_and_swap(resource_id, record.version, &fields)?)
    }

    /// Rewrite the record unchanged until it reaches `version`.
    pub fn bump_to(&self, resource_id: ResourceId, version: u64) -> TestResult<()> {
        loop {
            let record = self.get(resource_id)?;
            if record.version >= version {
                return Ok(());
            }
            self.store
                .compare_and_swap(resource_id, record.version, &record.fields)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_reaches_requested_version() -> TestResult<()> {
        let directory = TestDirectory::new();
        let id = directory.seed_service("Food Bank", "555-111-0000")?;
        directory.bump_to(id, 4)?;
        assert_eq!(directory.version(id)?, 4);
        assert_eq!(
            directory.field(id, "phone.primary")?,
            Some(FieldValue::text("555-111-0000"))
        );
        Ok(())
    }

    #[test]
    fn outside_writes_bump_version() -> TestResult<()> {
        let directory = TestDirectory::unvalidated();
        let id = directory.seed_service("Food Bank", "555-111-0000")?;
        assert_eq!(directory.write(id, "name", "Pantry")?, 2);
        assert_eq!(directory.field(id, "name")?, Some(FieldValue::text("Pantry")));
        Ok(())
    }
}
