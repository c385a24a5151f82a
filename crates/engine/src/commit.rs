use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use conduit_core::{CoreError, FieldError, FieldPath, FieldValue, Fields, OperationId, ResourceId, UndoToken};
use conduit_storage::{RecordStore, StorageError};

use crate::operation::{BulkOperation, OperationStatus, TargetResult};
use crate::staging::StagedChange;
use crate::undo::UndoRecord;

#[derive(Debug, Clone)]
pub struct CommitReport {
    pub operation_id: OperationId,
    pub status: OperationStatus,
    pub results: Vec<(ResourceId, TargetResult)>,
    /// Issued when at least one target was written.
    pub undo_token: Option<UndoToken>,
}

impl CommitReport {
    pub fn applied(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_success()).count()
    }

    /// Targets that had something to write.
    pub fn attempted(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, r)| *r != TargetResult::Unchanged)
            .count()
    }

    pub fn result_for(&self, resource_id: ResourceId) -> Option<&TargetResult> {
        self.results
            .iter()
            .find(|(id, _)| *id == resource_id)
            .map(|(_, r)| r)
    }

    pub fn failed_ids(&self) -> Vec<ResourceId> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_failure())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CommitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} applied", self.applied(), self.attempted())
    }
}

/// Write `value` at `path`; `None` and `Null` both clear the field.
pub(crate) fn write_value(
    fields: &mut Fields,
    path: &FieldPath,
    value: Option<FieldValue>,
) -> Result<(), CoreError> {
    match value {
        None | Some(FieldValue::Null) => {
            path.remove(fields);
            Ok(())
        }
        Some(value) => path.set(fields, value),
    }
}

pub(crate) struct TargetOutcome {
    pub resource_id: ResourceId,
    pub result: TargetResult,
    pub undo: Option<UndoRecord>,
}

fn live_values(changes: &[&StagedChange], fields: &Fields) -> BTreeMap<String, Option<FieldValue>> {
    changes
        .iter()
        .map(|c| (c.field_path.to_string(), c.field_path.get(fields).cloned()))
        .collect()
}

fn conflict_after_race<S: RecordStore + ?Sized>(
    store: &S,
    resource_id: ResourceId,
    changes: &[&StagedChange],
) -> TargetResult {
    match store.get(resource_id) {
        Ok(Some(record)) => TargetResult::Conflict(live_values(changes, &record.fields)),
        Ok(None) => TargetResult::NotFound,
        Err(e) => TargetResult::StoreError(e.to_string()),
    }
}

/// Overlay the staged changes onto the live record and write it back
/// conditionally on the staged baseline.
pub(crate) fn apply_target<S: RecordStore + ?Sized>(
    store: &S,
    operation_id: OperationId,
    resource_id: ResourceId,
    changes: &[&StagedChange],
) -> TargetOutcome {
    let outcome = |result: TargetResult, undo: Option<UndoRecord>| TargetOutcome {
        resource_id,
        result,
        undo,
    };
    if changes.is_empty() {
        return outcome(TargetResult::Unchanged, None);
    }

    let current = match store.get(resource_id) {
        Ok(Some(record)) => record,
        Ok(None) => return outcome(TargetResult::NotFound, None),
        Err(e) => return outcome(TargetResult::StoreError(e.to_string()), None),
    };

    if changes.iter().any(|c| c.baseline_version != current.version) {
        tracing::warn!(%operation_id, %resource_id, current = current.version, "stale baseline at commit");
        return outcome(TargetResult::Conflict(live_values(changes, &current.fields)), None);
    }

    let mut fields = current.fields.clone();
    for change in changes {
        if let Err(e) = write_value(&mut fields, &change.field_path, Some(change.proposed_value.clone())) {
            let errors = FieldError::at(change.field_path.as_str(), e.to_string());
            return outcome(TargetResult::ValidationError(errors), None);
        }
    }

    match store.compare_and_swap(resource_id, current.version, &fields) {
        Ok(new_version) => {
            let pre_commit_fields = changes
                .iter()
                .flat_map(|c| c.field_path.top_level_keys())
                .map(|key| (key.to_string(), current.fields.get(key).cloned()))
                .collect();
            let undo = UndoRecord {
                operation_id,
                resource_id,
                pre_commit_fields,
                pre_commit_version: current.version,
                post_commit_version: new_version,
            };
            outcome(TargetResult::Success(new_version), Some(undo))
        }
        Err(StorageError::VersionConflict { current, .. }) => {
            tracing::warn!(%operation_id, %resource_id, current, "lost conditional write race");
            outcome(conflict_after_race(store, resource_id, changes), None)
        }
        Err(StorageError::NotFound(_)) => outcome(TargetResult::NotFound, None),
        Err(StorageError::Validation(errors)) => {
            tracing::warn!(%operation_id, %resource_id, %errors, "staged values failed validation");
            outcome(TargetResult::ValidationError(errors), None)
        }
        Err(e) => outcome(TargetResult::StoreError(e.to_string()), None),
    }
}

/// `apply_target`, with a panic anywhere below it turned into a per-target
/// store fault so it cannot take the rest of the batch down.
fn apply_isolated<S: RecordStore + ?Sized>(
    store: &S,
    operation_id: OperationId,
    resource_id: ResourceId,
    changes: &[&StagedChange],
) -> TargetOutcome {
    panic::catch_unwind(AssertUnwindSafe(|| {
        apply_target(store, operation_id, resource_id, changes)
    }))
    .unwrap_or_else(|_| {
        tracing::error!(%operation_id, %resource_id, "commit worker panicked");
        TargetOutcome {
            resource_id,
            result: TargetResult::StoreError(WORKER_PANICKED.to_string()),
            undo: None,
        }
    })
}

const WORKER_PANICKED: &str = "commit worker panicked";

/// Apply every target of `op`, spreading the writes over `parallelism`
/// scoped threads. Outcomes come back in target order, one per target,
/// whatever happens to the workers.
pub(crate) fn execute<S: RecordStore + ?Sized>(
    store: &S,
    op: &BulkOperation,
    parallelism: usize,
) -> Vec<TargetOutcome> {
    let operation_id = op.operation_id();
    let plans: Vec<(ResourceId, Vec<&StagedChange>)> = op
        .targets()
        .iter()
        .map(|id| (*id, op.changes_for(*id)))
        .collect();

    if parallelism <= 1 || plans.len() <= 1 {
        return plans
            .iter()
            .map(|(id, changes)| apply_isolated(store, operation_id, *id, changes))
            .collect();
    }

    let chunk_size = plans.len().div_ceil(parallelism);
    std::thread::scope(|scope| {
        let handles: Vec<_> = plans
            .chunks(chunk_size)
            .map(|chunk| {
                let handle = scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|(id, changes)| apply_isolated(store, operation_id, *id, changes))
                        .collect::<Vec<_>>()
                });
                (chunk, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(plans.len());
        for (chunk, handle) in handles {
            match handle.join() {
                Ok(chunk_outcomes) => outcomes.extend(chunk_outcomes),
                Err(_) => {
                    tracing::error!(%operation_id, targets = chunk.len(), "commit worker died");
                    outcomes.extend(chunk.iter().map(|(id, _)| TargetOutcome {
                        resource_id: *id,
                        result: TargetResult::StoreError(WORKER_PANICKED.to_string()),
                        undo: None,
                    }));
                }
            }
        }
        outcomes
    })
}
