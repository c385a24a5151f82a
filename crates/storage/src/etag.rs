use conduit_core::field_value::fields_to_msgpack;

use crate::error::StorageError;
use crate::traits::ResourceRecord;

/// Weak entity tag for a record, e.g. `W/"3f1c..."`.
///
/// Two reads yield the same tag exactly when they saw the same version of
/// the same fields, so a client can send it back as a cheap precondition.
pub fn resource_etag(record: &ResourceRecord) -> Result<String, StorageError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(record.resource_id.as_bytes());
    hasher.update(&record.version.to_be_bytes());
    hasher.update(&fields_to_msgpack(&record.fields)?);
    Ok(format!("W/\"{}\"", hasher.finalize().to_hex()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{FieldValue, Fields, ResourceId, ResourceKind};

    fn record(version: u64, name: &str) -> ResourceRecord {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::text(name));
        ResourceRecord {
            resource_id: ResourceId::from_bytes([7; 16]),
            kind: ResourceKind::Service,
            version,
            fields,
            sensitive: false,
        }
    }

    #[test]
    fn etag_is_weak_and_stable() {
        let tag = resource_etag(&record(3, "Food Bank")).unwrap();
        assert!(tag.starts_with("W/\"") && tag.ends_with('"'));
        assert_eq!(tag.len(), 2 + 1 + 64 + 1);
        assert_eq!(tag, resource_etag(&record(3, "Food Bank")).unwrap());
    }

    #[test]
    fn etag_changes_with_version_or_fields() {
        let base = resource_etag(&record(3, "Food Bank")).unwrap();
        assert_ne!(base, resource_etag(&record(4, "Food Bank")).unwrap());
        assert_ne!(base, resource_etag(&record(3, "Food Pantry")).unwrap());
    }
}
