use std::collections::BTreeSet;

use conduit_core::{FieldValue, OperationId, ResourceId};
use conduit_storage::RecordStore;

use crate::error::EngineError;
use crate::operation::BulkOperation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub field_path: String,
    pub old_value: Option<FieldValue>,
    /// `Null` clears the field.
    pub new_value: FieldValue,
    /// The proposed value already matches the record.
    pub no_op: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisputedField {
    pub field_path: String,
    pub baseline_version: u64,
    pub live_value: Option<FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPreview {
    Clean {
        current_version: u64,
        lines: Vec<DiffLine>,
    },
    /// At least one staged change was computed against an older version.
    Conflicted {
        current_version: u64,
        disputed: Vec<DisputedField>,
    },
    Missing,
    Unchanged,
}

impl TargetPreview {
    pub fn is_conflicted(&self) -> bool {
        matches!(self, Self::Conflicted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewEntry {
    pub resource_id: ResourceId,
    pub preview: TargetPreview,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewReport {
    pub operation_id: OperationId,
    pub entries: Vec<PreviewEntry>,
}

impl PreviewReport {
    pub fn get(&self, resource_id: ResourceId) -> Option<&TargetPreview> {
        self.entries
            .iter()
            .find(|e| e.resource_id == resource_id)
            .map(|e| &e.preview)
    }

    pub fn conflicted_ids(&self) -> Vec<ResourceId> {
        self.entries
            .iter()
            .filter(|e| e.preview.is_conflicted())
            .map(|e| e.resource_id)
            .collect()
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.preview.is_conflicted())
    }

    /// Lines that would actually change a value.
    pub fn effective_lines(&self) -> usize {
        self.entries
            .iter()
            .map(|e| match &e.preview {
                TargetPreview::Clean { lines, .. } => lines.iter().filter(|l| !l.no_op).count(),
                _ => 0,
            })
            .sum()
    }
}

/// Diff every target of `op` against the live records. Never writes.
pub(crate) fn build_preview<S: RecordStore + ?Sized>(
    store: &S,
    op: &BulkOperation,
) -> Result<PreviewReport, EngineError> {
    let mut entries = Vec::with_capacity(op.targets().len());
    for &resource_id in op.targets() {
        let changes = op.changes_for(resource_id);
        let preview = if changes.is_empty() {
            TargetPreview::Unchanged
        } else {
            match store.get(resource_id)? {
                None => TargetPreview::Missing,
                Some(record) => {
                    let current_version = record.version;
                    let disputed: Vec<DisputedField> = changes
                        .iter()
                        .filter(|c| c.baseline_version != current_version)
                        .map(|c| DisputedField {
                            field_path: c.field_path.to_string(),
                            baseline_version: c.baseline_version,
                            live_value: c.field_path.get(&record.fields).cloned(),
                        })
                        .collect();
                    if disputed.is_empty() {
                        let lines = changes
                            .iter()
                            .map(|c| {
                                let old_value = c.field_path.get(&record.fields).cloned();
                                let no_op = old_value.as_ref().unwrap_or(&FieldValue::Null)
                                    == &c.proposed_value;
                                DiffLine {
                                    field_path: c.field_path.to_string(),
                                    old_value,
                                    new_value: c.proposed_value.clone(),
                                    no_op,
                                }
                            })
                            .collect();
                        TargetPreview::Clean {
                            current_version,
                            lines,
                        }
                    } else {
                        TargetPreview::Conflicted {
                            current_version,
                            disputed,
                        }
                    }
                }
            }
        };
        entries.push(PreviewEntry {
            resource_id,
            preview,
        });
    }
    Ok(PreviewReport {
        operation_id: op.operation_id(),
        entries,
    })
}

pub(crate) fn conflicted_set(report: &PreviewReport) -> BTreeSet<ResourceId> {
    report.conflicted_ids().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::StagedChange;
    use conduit_core::{FieldPath, Fields, ResourceKind};
    use conduit_storage::MemoryStore;

    fn seed(store: &MemoryStore, phone: &str) -> ResourceId {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::text("Food Bank"));
        fields.insert("phone.primary".into(), FieldValue::text(phone));
        store.insert(ResourceKind::Service, fields, false).unwrap().resource_id
    }

    fn stage(op: &mut BulkOperation, id: ResourceId, path: &str, baseline: u64, value: &str) {
        op.stage(StagedChange {
            resource_id: id,
            field_path: FieldPath::parse(path).unwrap(),
            baseline_version: baseline,
            proposed_value: FieldValue::text(value),
        })
        .unwrap();
    }

    #[test]
    fn clean_diff_shows_old_and_new() {
        let store = MemoryStore::new();
        let id = seed(&store, "555-111-0000");
        let mut op = BulkOperation::new(OperationId::new(), [id]);
        stage(&mut op, id, "phone.primary", 1, "555-000-1234");
        stage(&mut op, id, "name", 1, "Food Bank");

        let report = build_preview(&store, &op).unwrap();
        let TargetPreview::Clean { current_version, lines } = report.get(id).unwrap() else {
            panic!("expected clean preview");
        };
        assert_eq!(*current_version, 1);
        let phone = lines.iter().find(|l| l.field_path == "phone.primary").unwrap();
        assert_eq!(phone.old_value, Some(FieldValue::text("555-111-0000")));
        assert_eq!(phone.new_value, FieldValue::text("555-000-1234"));
        assert!(!phone.no_op);
        assert!(lines.iter().find(|l| l.field_path == "name").unwrap().no_op);
        assert_eq!(report.effective_lines(), 1);
    }

    #[test]
    fn stale_baseline_is_conflicted_not_rebased() {
        let store = MemoryStore::new();
        let id = seed(&store, "555-111-0000");
        let mut op = BulkOperation::new(OperationId::new(), [id]);
        stage(&mut op, id, "phone.primary", 1, "555-000-1234");

        let mut live = store.get(id).unwrap().unwrap().fields;
        live.insert("phone.primary".into(), FieldValue::text("555-999-9999"));
        store.compare_and_swap(id, 1, &live).unwrap();

        let report = build_preview(&store, &op).unwrap();
        assert_eq!(report.conflicted_ids(), vec![id]);
        let TargetPreview::Conflicted { current_version, disputed } = report.get(id).unwrap() else {
            panic!("expected conflict");
        };
        assert_eq!(*current_version, 2);
        assert_eq!(disputed[0].baseline_version, 1);
        assert_eq!(disputed[0].live_value, Some(FieldValue::text("555-999-9999")));
        assert_eq!(op.changes_for(id)[0].baseline_version, 1);
    }

    #[test]
    fn missing_and_untouched_targets() {
        let store = MemoryStore::new();
        let kept = seed(&store, "555-111-0000");
        let gone = seed(&store, "555-111-0001");
        let idle = seed(&store, "555-111-0002");
        let mut op = BulkOperation::new(OperationId::new(), [kept, gone, idle]);
        stage(&mut op, kept, "name", 1, "A");
        stage(&mut op, gone, "name", 1, "B");
        store.delete(gone).unwrap();

        let report = build_preview(&store, &op).unwrap();
        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.get(gone), Some(&TargetPreview::Missing));
        assert_eq!(report.get(idle), Some(&TargetPreview::Unchanged));
        assert!(!report.has_conflicts());
    }
}
