//! Folding a duplicate record into the one that survives it.

use conduit_core::{FieldPath, ResourceId};
use conduit_storage::{resource_etag, RecordStore, StorageError};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub survivor_id: ResourceId,
    pub duplicate_id: ResourceId,
    /// Survivor's version after the merge write.
    pub version: u64,
    /// Paths actually copied; selected paths the duplicate lacks are skipped.
    pub merged_paths: Vec<FieldPath>,
    pub etag: String,
}

/// Copy the selected fields from `duplicate_id` onto `survivor_id` with a
/// conditional write at `survivor_version`, then delete the duplicate.
///
/// Nothing is written unless at least one selected path holds a value on the
/// duplicate. A stale `survivor_version` surfaces as a storage
/// `VersionConflict` and leaves both records alone.
pub(crate) fn merge_duplicate<S: RecordStore + ?Sized>(
    store: &S,
    survivor_id: ResourceId,
    survivor_version: u64,
    duplicate_id: ResourceId,
    field_paths: &[FieldPath],
) -> Result<MergeReport, EngineError> {
    if survivor_id == duplicate_id {
        return Err(EngineError::InvalidMerge("a record cannot absorb itself".into()));
    }
    let survivor = store
        .get(survivor_id)?
        .ok_or(EngineError::ResourceNotFound(survivor_id))?;
    let duplicate = store
        .get(duplicate_id)?
        .ok_or(EngineError::ResourceNotFound(duplicate_id))?;
    if survivor.kind != duplicate.kind {
        return Err(EngineError::InvalidMerge(format!(
            "cannot merge a {} into a {}",
            duplicate.kind.as_str(),
            survivor.kind.as_str()
        )));
    }

    let mut fields = survivor.fields.clone();
    let mut merged_paths = Vec::new();
    for path in field_paths {
        let Some(value) = path.get(&duplicate.fields).filter(|v| !v.is_null()) else {
            continue;
        };
        path.set(&mut fields, value.clone())?;
        merged_paths.push(path.clone());
    }
    if merged_paths.is_empty() {
        return Err(EngineError::InvalidMerge("no fields selected".into()));
    }

    let version = store.compare_and_swap(survivor_id, survivor_version, &fields)?;
    match store.delete(duplicate_id) {
        Ok(()) | Err(StorageError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let merged = store
        .get(survivor_id)?
        .ok_or(EngineError::ResourceNotFound(survivor_id))?;
    let etag = resource_etag(&merged)?;
    tracing::info!(%survivor_id, %duplicate_id, version, paths = merged_paths.len(), "duplicate merged");
    Ok(MergeReport {
        survivor_id,
        duplicate_id,
        version,
        merged_paths,
        etag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{FieldValue, Fields, ResourceKind};
    use conduit_storage::MemoryStore;

    fn seed(store: &MemoryStore, kind: ResourceKind, pairs: &[(&str, &str)]) -> ResourceId {
        let mut fields = Fields::new();
        for (key, value) in pairs {
            fields.insert((*key).into(), FieldValue::text(*value));
        }
        store.insert(kind, fields, false).unwrap().resource_id
    }

    fn paths(raw: &[&str]) -> Vec<FieldPath> {
        raw.iter().map(|p| FieldPath::parse(p).unwrap()).collect()
    }

    #[test]
    fn copies_selected_fields_and_deletes_duplicate() {
        let store = MemoryStore::new();
        let survivor = seed(&store, ResourceKind::Service, &[("name", "Food Bank"), ("email", "old@example.org")]);
        let duplicate = seed(
            &store,
            ResourceKind::Service,
            &[("name", "Food Bank Inc"), ("email", "new@example.org"), ("url", "https://fb.example.org")],
        );

        let report =
            merge_duplicate(&store, survivor, 1, duplicate, &paths(&["email", "url", "fax"])).unwrap();
        assert_eq!(report.version, 2);
        assert_eq!(report.merged_paths, paths(&["email", "url"]));
        assert!(report.etag.starts_with("W/\""));

        let merged = store.get(survivor).unwrap().unwrap();
        assert_eq!(merged.fields["name"], FieldValue::text("Food Bank"));
        assert_eq!(merged.fields["email"], FieldValue::text("new@example.org"));
        assert_eq!(merged.fields["url"], FieldValue::text("https://fb.example.org"));
        assert!(store.get(duplicate).unwrap().is_none());
    }

    #[test]
    fn nothing_selected_writes_nothing() {
        let store = MemoryStore::new();
        let survivor = seed(&store, ResourceKind::Service, &[("name", "A")]);
        let duplicate = seed(&store, ResourceKind::Service, &[("name", "B")]);

        let err = merge_duplicate(&store, survivor, 1, duplicate, &paths(&["email"])).unwrap_err();
        assert!(matches!(err, EngineError::InvalidMerge(_)));
        assert!(store.get(duplicate).unwrap().is_some());
        assert_eq!(store.get(survivor).unwrap().unwrap().version, 1);
    }

    #[test]
    fn stale_survivor_version_keeps_duplicate() {
        let store = MemoryStore::new();
        let survivor = seed(&store, ResourceKind::Service, &[("name", "A")]);
        let duplicate = seed(&store, ResourceKind::Service, &[("name", "B"), ("email", "b@example.org")]);
        let fields = store.get(survivor).unwrap().unwrap().fields;
        store.compare_and_swap(survivor, 1, &fields).unwrap();

        let err = merge_duplicate(&store, survivor, 1, duplicate, &paths(&["email"])).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Storage(StorageError::VersionConflict { current: 2, .. })
        ));
        assert!(store.get(duplicate).unwrap().is_some());
    }

    #[test]
    fn kinds_and_identity_must_differ_sensibly() {
        let store = MemoryStore::new();
        let service = seed(&store, ResourceKind::Service, &[("name", "A")]);
        let location = seed(&store, ResourceKind::Location, &[("name", "B")]);
        assert!(matches!(
            merge_duplicate(&store, service, 1, location, &paths(&["name"])),
            Err(EngineError::InvalidMerge(_))
        ));
        assert!(matches!(
            merge_duplicate(&store, service, 1, service, &paths(&["name"])),
            Err(EngineError::InvalidMerge(_))
        ));
        assert!(matches!(
            merge_duplicate(&store, service, 1, ResourceId::new(), &paths(&["name"])),
            Err(EngineError::ResourceNotFound(_))
        ));
    }
}
