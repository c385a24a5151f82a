use serde::{Deserialize, Serialize};

use conduit_core::{FieldPath, FieldValue, ResourceId};
use conduit_storage::RecordStore;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionSource {
    /// Keep what is currently stored.
    Server,
    /// Keep the caller's own value, re-based onto the current version.
    Local,
}

/// A "merge chip": one concrete value a disputed field can be settled to,
/// together with the version it is valid against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionOption {
    pub resource_id: ResourceId,
    pub field_path: FieldPath,
    /// `None` when the field is absent on the record.
    pub value: Option<FieldValue>,
    pub version: u64,
    pub source: ResolutionSource,
}

impl ResolutionOption {
    /// The value to stage when this option is accepted.
    pub fn staged_value(&self) -> FieldValue {
        self.value.clone().unwrap_or(FieldValue::Null)
    }
}

pub(crate) fn server_option<S: RecordStore + ?Sized>(
    store: &S,
    resource_id: ResourceId,
    field_path: &FieldPath,
) -> Result<ResolutionOption, EngineError> {
    let record = store
        .get(resource_id)?
        .ok_or(EngineError::ResourceNotFound(resource_id))?;
    Ok(ResolutionOption {
        resource_id,
        field_path: field_path.clone(),
        value: field_path.get(&record.fields).cloned(),
        version: record.version,
        source: ResolutionSource::Server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{Fields, ResourceKind};
    use conduit_storage::MemoryStore;

    #[test]
    fn reads_live_value_and_version() {
        let store = MemoryStore::new();
        let mut fields = Fields::new();
        fields.insert("phone.primary".into(), FieldValue::text("555-111-0000"));
        let record = store.insert(ResourceKind::Service, fields.clone(), false).unwrap();
        fields.insert("phone.primary".into(), FieldValue::text("555-222-0000"));
        store.compare_and_swap(record.resource_id, 1, &fields).unwrap();

        let path = FieldPath::parse("phone.primary").unwrap();
        let option = server_option(&store, record.resource_id, &path).unwrap();
        assert_eq!(option.value, Some(FieldValue::text("555-222-0000")));
        assert_eq!(option.version, 2);
        assert_eq!(option.source, ResolutionSource::Server);

        let absent = server_option(&store, record.resource_id, &FieldPath::parse("email").unwrap())
            .unwrap();
        assert_eq!(absent.value, None);
        assert_eq!(absent.staged_value(), FieldValue::Null);
    }

    #[test]
    fn missing_record_is_reported() {
        let store = MemoryStore::new();
        let path = FieldPath::parse("name").unwrap();
        let err = server_option(&store, ResourceId::new(), &path).unwrap_err();
        assert!(matches!(err, EngineError::ResourceNotFound(_)));
    }
}
