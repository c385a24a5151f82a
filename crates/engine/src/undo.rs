use std::collections::{BTreeMap, HashSet, VecDeque};

use conduit_core::{FieldError, FieldValue, OperationId, ResourceId, TokenDigest, UndoToken};
use conduit_storage::{RecordStore, StorageError};

/// Pre-commit state of the top-level fields one commit touched on one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    pub operation_id: OperationId,
    pub resource_id: ResourceId,
    /// Whole top-level values keyed by field name, so nested and list edits
    /// restore exactly. `None` marks a field that did not exist before the commit.
    pub pre_commit_fields: BTreeMap<String, Option<FieldValue>>,
    pub pre_commit_version: u64,
    pub post_commit_version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    Restored(u64),
    /// Someone wrote the record after our commit; left alone.
    StaleUndo { current_version: u64 },
    NotFound,
    ValidationError(FieldError),
    StoreError(String),
}

impl UndoOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored(_))
    }

    /// Nothing is left to retry: the record was restored or no longer exists.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Restored(_) | Self::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoReport {
    pub operation_id: OperationId,
    pub outcomes: Vec<(ResourceId, UndoOutcome)>,
}

impl UndoReport {
    pub fn restored(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_restored()).count()
    }

    /// True once every target is settled. A record deleted since the commit
    /// has nothing to restore, so it does not hold the operation open.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_settled())
    }

    pub fn stale_ids(&self) -> Vec<ResourceId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, UndoOutcome::StaleUndo { .. }))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn outcome_for(&self, resource_id: ResourceId) -> Option<&UndoOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == resource_id)
            .map(|(_, o)| o)
    }
}

struct UndoEntry {
    operation_id: OperationId,
    records: Vec<UndoRecord>,
    token: TokenDigest,
}

/// Undo records of committed operations, bounded to the most recent `limit`
/// operations.
pub struct UndoLog {
    entries: VecDeque<UndoEntry>,
    limit: usize,
}

impl UndoLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// Returns the operations whose records were evicted to respect the limit.
    pub fn push(
        &mut self,
        operation_id: OperationId,
        records: Vec<UndoRecord>,
        token: &UndoToken,
    ) -> Vec<OperationId> {
        if records.is_empty() {
            return Vec::new();
        }
        self.entries.push_back(UndoEntry {
            operation_id,
            records,
            token: token.digest(),
        });
        let mut evicted = Vec::new();
        while self.entries.len() > self.limit {
            if let Some(entry) = self.entries.pop_front() {
                evicted.push(entry.operation_id);
            }
        }
        evicted
    }

    fn entry(&self, operation_id: OperationId) -> Option<&UndoEntry> {
        self.entries.iter().find(|e| e.operation_id == operation_id)
    }

    pub fn records(&self, operation_id: OperationId) -> &[UndoRecord] {
        self.entry(operation_id)
            .map(|e| e.records.as_slice())
            .unwrap_or_default()
    }

    pub fn token_matches(&self, operation_id: OperationId, token: &UndoToken) -> bool {
        self.entry(operation_id).is_some_and(|e| e.token.matches(token))
    }

    /// Drop the records of every target not in `keep`. Returns how many remain.
    pub(crate) fn retain(&mut self, operation_id: OperationId, keep: &HashSet<ResourceId>) -> usize {
        let Some(pos) = self.entries.iter().position(|e| e.operation_id == operation_id) else {
            return 0;
        };
        let entry = &mut self.entries[pos];
        entry.records.retain(|r| keep.contains(&r.resource_id));
        let remaining = entry.records.len();
        if remaining == 0 {
            self.entries.remove(pos);
        }
        remaining
    }

    /// Operations that still hold undo records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Put the pre-commit values back with a conditional write against the
/// version our commit produced.
pub(crate) fn compensate<S: RecordStore + ?Sized>(store: &S, record: &UndoRecord) -> UndoOutcome {
    let current = match store.get(record.resource_id) {
        Ok(Some(current)) => current,
        Ok(None) => return UndoOutcome::NotFound,
        Err(e) => return UndoOutcome::StoreError(e.to_string()),
    };
    if current.version != record.post_commit_version {
        return UndoOutcome::StaleUndo {
            current_version: current.version,
        };
    }

    let mut fields = current.fields;
    for (key, value) in &record.pre_commit_fields {
        match value {
            Some(value) => fields.insert(key.clone(), value.clone()),
            None => fields.remove(key),
        };
    }

    match store.compare_and_swap(record.resource_id, record.post_commit_version, &fields) {
        Ok(version) => UndoOutcome::Restored(version),
        Err(StorageError::VersionConflict { current, .. }) => UndoOutcome::StaleUndo {
            current_version: current,
        },
        Err(StorageError::NotFound(_)) => UndoOutcome::NotFound,
        Err(StorageError::Validation(errors)) => UndoOutcome::ValidationError(errors),
        Err(e) => UndoOutcome::StoreError(e.to_string()),
    }
}
