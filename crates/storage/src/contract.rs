//! Behaviour every `RecordStore` must share, run against each backend from
//! its own test module.

use conduit_core::{FieldValue, Fields, ResourceKind, Schema};

use crate::{RecordStore, StorageError};

fn fields(name: &str, phone: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".into(), FieldValue::text(name));
    fields.insert("phone.primary".into(), FieldValue::text(phone));
    fields
}

pub(crate) fn run_all<S, F>(factory: F)
where
    S: RecordStore,
    F: Fn(Schema) -> S,
{
    insert_starts_at_version_one(&factory(Schema::new()));
    swap_increments_version_by_one(&factory(Schema::new()));
    stale_swap_conflicts_without_writing(&factory(Schema::new()));
    swap_on_missing_record_is_not_found(&factory(Schema::new()));
    invalid_fields_are_rejected(&factory(Schema::hsds()));
    version_check_precedes_validation(&factory(Schema::hsds()));
    delete_removes_record(&factory(Schema::new()));
    racing_writers_have_one_winner(&factory(Schema::new()));
}

fn insert_starts_at_version_one<S: RecordStore>(store: &S) {
    let record = store
        .insert(ResourceKind::Service, fields("Food Bank", "555-111-0000"), false)
        .unwrap();
    assert_eq!(record.version, 1);
    let loaded = store.get(record.resource_id).unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(store.history(record.resource_id).unwrap().len(), 1);
}

fn swap_increments_version_by_one<S: RecordStore>(store: &S) {
    let record = store
        .insert(ResourceKind::Location, fields("Main St", "555-111-0000"), false)
        .unwrap();
    let updated = fields("Main Street", "555-111-0000");
    let version = store.compare_and_swap(record.resource_id, 1, &updated).unwrap();
    assert_eq!(version, 2);

    let loaded = store.get(record.resource_id).unwrap().unwrap();
    assert_eq!(loaded.version, 2);
    assert_eq!(loaded.fields, updated);

    let history = store.history(record.resource_id).unwrap();
    assert_eq!(history.iter().map(|r| r.version).collect::<Vec<_>>(), vec![1, 2]);
}

fn stale_swap_conflicts_without_writing<S: RecordStore>(store: &S) {
    let record = store
        .insert(ResourceKind::Service, fields("Food Bank", "555-111-0000"), false)
        .unwrap();
    store
        .compare_and_swap(record.resource_id, 1, &fields("Winner", "555-111-0000"))
        .unwrap();

    let err = store
        .compare_and_swap(record.resource_id, 1, &fields("Loser", "555-111-0000"))
        .unwrap_err();
    match err {
        StorageError::VersionConflict { expected, current, .. } => {
            assert_eq!(expected, 1);
            assert_eq!(current, 2);
        }
        other => panic!("expected VersionConflict, got {other:?}"),
    }
    let loaded = store.get(record.resource_id).unwrap().unwrap();
    assert_eq!(loaded.fields["name"], FieldValue::text("Winner"));
    assert_eq!(loaded.version, 2);
}

fn swap_on_missing_record_is_not_found<S: RecordStore>(store: &S) {
    let missing = conduit_core::ResourceId::new();
    let err = store
        .compare_and_swap(missing, 1, &fields("Ghost", "555-111-0000"))
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(id) if id == missing));
    assert!(store.get(missing).unwrap().is_none());
}

fn invalid_fields_are_rejected<S: RecordStore>(store: &S) {
    let record = store
        .insert(ResourceKind::Service, fields("Food Bank", "555-111-0000"), false)
        .unwrap();
    let err = store
        .compare_and_swap(record.resource_id, 1, &fields("Food Bank", "not a phone"))
        .unwrap_err();
    match err {
        StorageError::Validation(errors) => {
            assert!(errors.by_path().contains_key("phone.primary"));
        }
        other => panic!("expected Validation, got {other:?}"),
    }
    assert_eq!(store.get(record.resource_id).unwrap().unwrap().version, 1);

    assert!(matches!(
        store.insert(ResourceKind::Service, fields("", "555-111-0000"), false),
        Err(StorageError::Validation(_))
    ));
}

fn version_check_precedes_validation<S: RecordStore>(store: &S) {
    let record = store
        .insert(ResourceKind::Service, fields("Food Bank", "555-111-0000"), false)
        .unwrap();
    store
        .compare_and_swap(record.resource_id, 1, &fields("Food Bank", "555-222-0000"))
        .unwrap();
    let err = store
        .compare_and_swap(record.resource_id, 1, &fields("Food Bank", "bogus"))
        .unwrap_err();
    assert!(matches!(err, StorageError::VersionConflict { .. }));
}

fn delete_removes_record<S: RecordStore>(store: &S) {
    let record = store
        .insert(ResourceKind::Organization, fields("Org", "555-111-0000"), false)
        .unwrap();
    store.delete(record.resource_id).unwrap();
    assert!(store.get(record.resource_id).unwrap().is_none());
    assert!(store.history(record.resource_id).unwrap().is_empty());
    assert!(matches!(
        store.delete(record.resource_id),
        Err(StorageError::NotFound(_))
    ));
}

fn racing_writers_have_one_winner<S: RecordStore>(store: &S) {
    let record = store
        .insert(ResourceKind::Service, fields("Food Bank", "555-111-0000"), false)
        .unwrap();
    let id = record.resource_id;

    let outcomes: Vec<Result<u64, StorageError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                scope.spawn(move || {
                    store.compare_and_swap(id, 1, &fields(&format!("writer {n}"), "555-111-0000"))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, StorageError::VersionConflict { current: 2, .. })));
    assert_eq!(store.get(id).unwrap().unwrap().version, 2);
}
