use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use conduit_core::{
    field_value::{fields_from_msgpack, fields_to_msgpack},
    Fields, ResourceId, ResourceKind, Schema,
};

use crate::error::StorageError;
use crate::traits::{RecordStore, ResourceRecord, Revision, INITIAL_VERSION};

/// Fixed-width blob column (ids are 16 bytes) into an array.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// SQLite-backed record store. One connection shared behind a mutex; every
/// conditional write runs in its own `BEGIN IMMEDIATE` transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    schema: Schema,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_with_schema(path, Schema::new())
    }

    pub fn open_with_schema(path: &str, schema: Schema) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            schema,
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::open_in_memory_with_schema(Schema::new())
    }

    pub fn open_in_memory_with_schema(schema: Schema) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            schema,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn read_record(row: &rusqlite::Row) -> Result<ResourceRecord, StorageError> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let kind: String = row.get(1)?;
    let version: i64 = row.get(2)?;
    let field_bytes: Vec<u8> = row.get(3)?;
    let sensitive: bool = row.get(4)?;

    Ok(ResourceRecord {
        resource_id: ResourceId::from_bytes(to_array::<16>(id_bytes, "resource_id")?),
        kind: ResourceKind::parse(&kind)?,
        version: version as u64,
        fields: fields_from_msgpack(&field_bytes)?,
        sensitive,
    })
}

impl RecordStore for SqliteStore {
    fn get(&self, resource_id: ResourceId) -> Result<Option<ResourceRecord>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT resource_id, kind, version, fields, sensitive FROM resources WHERE resource_id = ?1",
        )?;
        let mut rows = stmt.query(rusqlite::params![resource_id.as_bytes().as_slice()])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_record(row)?)),
            None => Ok(None),
        }
    }

    fn compare_and_swap(
        &self,
        resource_id: ResourceId,
        expected_version: u64,
        fields: &Fields,
    ) -> Result<u64, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: i64 = tx
            .query_row(
                "SELECT version FROM resources WHERE resource_id = ?1",
                rusqlite::params![resource_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::NotFound(resource_id))?;
        let current = current as u64;

        if current != expected_version {
            tracing::debug!(%resource_id, expected_version, current, "conditional write rejected");
            return Err(StorageError::VersionConflict {
                resource_id,
                expected: expected_version,
                current,
            });
        }
        self.schema.validate(fields).map_err(StorageError::Validation)?;

        let new_version = current + 1;
        let field_bytes = fields_to_msgpack(fields)?;
        tx.execute(
            "UPDATE resources SET version = ?1, fields = ?2, updated_at = unixepoch() WHERE resource_id = ?3 AND version = ?4",
            rusqlite::params![
                new_version as i64,
                field_bytes,
                resource_id.as_bytes().as_slice(),
                current as i64,
            ],
        )?;
        tx.execute(
            "INSERT INTO revisions (resource_id, version, fields, recorded_at) VALUES (?1, ?2, ?3, unixepoch())",
            rusqlite::params![
                resource_id.as_bytes().as_slice(),
                new_version as i64,
                field_bytes,
            ],
        )?;
        tx.commit()?;
        Ok(new_version)
    }

    fn insert(
        &self,
        kind: ResourceKind,
        fields: Fields,
        sensitive: bool,
    ) -> Result<ResourceRecord, StorageError> {
        self.schema.validate(&fields).map_err(StorageError::Validation)?;
        let resource_id = ResourceId::new();
        let field_bytes = fields_to_msgpack(&fields)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO resources (resource_id, kind, version, fields, sensitive, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, unixepoch())",
            rusqlite::params![
                resource_id.as_bytes().as_slice(),
                kind.as_str(),
                INITIAL_VERSION as i64,
                field_bytes,
                sensitive,
            ],
        )?;
        tx.execute(
            "INSERT INTO revisions (resource_id, version, fields, recorded_at) VALUES (?1, ?2, ?3, unixepoch())",
            rusqlite::params![
                resource_id.as_bytes().as_slice(),
                INITIAL_VERSION as i64,
                field_bytes,
            ],
        )?;
        tx.commit()?;

        Ok(ResourceRecord {
            resource_id,
            kind,
            version: INITIAL_VERSION,
            fields,
            sensitive,
        })
    }

    fn delete(&self, resource_id: ResourceId) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM resources WHERE resource_id = ?1",
            rusqlite::params![resource_id.as_bytes().as_slice()],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound(resource_id));
        }
        Ok(())
    }

    fn history(&self, resource_id: ResourceId) -> Result<Vec<Revision>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT version, fields FROM revisions WHERE resource_id = ?1 ORDER BY version",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![resource_id.as_bytes().as_slice()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(version, bytes)| -> Result<Revision, StorageError> {
                Ok(Revision {
                    version: version as u64,
                    fields: fields_from_msgpack(&bytes)?,
                })
            })
            .collect()
    }
}
