use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use conduit_core::{FieldError, FieldPath, FieldValue, OperationId, ResourceId};

use crate::error::EngineError;
use crate::staging::{StagedChange, StagingStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Draft,
    Staged,
    Previewed,
    Committing,
    PartiallyCommitted,
    Committed,
    Undone,
    Abandoned,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Staged => "staged",
            Self::Previewed => "previewed",
            Self::Committing => "committing",
            Self::PartiallyCommitted => "partially_committed",
            Self::Committed => "committed",
            Self::Undone => "undone",
            Self::Abandoned => "abandoned",
        }
    }

    /// Staging is still open and nothing has been written.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Staged | Self::Previewed)
    }

    pub fn has_committed(&self) -> bool {
        matches!(self, Self::Committed | Self::PartiallyCommitted)
    }

    pub fn can_transition_to(&self, to: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, to),
            (Draft | Staged | Previewed, Staged)
                | (Staged | Previewed, Previewed)
                | (Previewed, Committing)
                | (Committing, Committed | PartiallyCommitted)
                | (Committed | PartiallyCommitted, Undone)
                | (Draft | Staged | Previewed, Abandoned)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one target fared in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResult {
    Success(u64),
    /// Live values at the staged paths; `None` where the field is absent.
    Conflict(BTreeMap<String, Option<FieldValue>>),
    ValidationError(FieldError),
    NotFound,
    /// Nothing was staged for this target.
    Unchanged,
    /// The store failed for reasons unrelated to the record's state.
    StoreError(String),
}

impl TargetResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Counts against full success of the operation.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Success(_) | Self::Unchanged)
    }

    pub fn new_version(&self) -> Option<u64> {
        match self {
            Self::Success(version) => Some(*version),
            _ => None,
        }
    }

    /// Validation messages keyed by dotted field path.
    pub fn field_errors(&self) -> Option<BTreeMap<String, String>> {
        match self {
            Self::ValidationError(errors) => Some(errors.by_path()),
            _ => None,
        }
    }
}

/// One bulk edit across the records that were on the shelf when it started.
#[derive(Debug, Clone)]
pub struct BulkOperation {
    operation_id: OperationId,
    status: OperationStatus,
    staging: StagingStore,
    conflicted: BTreeSet<ResourceId>,
    results: BTreeMap<ResourceId, TargetResult>,
}

impl BulkOperation {
    pub fn new(operation_id: OperationId, targets: impl IntoIterator<Item = ResourceId>) -> Self {
        Self {
            operation_id,
            status: OperationStatus::Draft,
            staging: StagingStore::new(targets),
            conflicted: BTreeSet::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn targets(&self) -> &[ResourceId] {
        self.staging.targets()
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    pub fn changes_for(&self, resource_id: ResourceId) -> Vec<&StagedChange> {
        self.staging.changes_for(resource_id)
    }

    pub fn all_changes(&self) -> Vec<&StagedChange> {
        self.staging.all_changes()
    }

    /// Targets flagged by the most recent preview.
    pub fn conflicted(&self) -> &BTreeSet<ResourceId> {
        &self.conflicted
    }

    pub fn result_for(&self, resource_id: ResourceId) -> Option<&TargetResult> {
        self.results.get(&resource_id)
    }

    /// Per-target results in target order.
    pub fn results(&self) -> Vec<(ResourceId, &TargetResult)> {
        self.targets()
            .iter()
            .filter_map(|id| self.results.get(id).map(|r| (*id, r)))
            .collect()
    }

    pub fn failed_targets(&self) -> Vec<ResourceId> {
        self.results()
            .into_iter()
            .filter(|(_, r)| r.is_failure())
            .map(|(id, _)| id)
            .collect()
    }

    /// Move to `to`. Returns the previous status when the status changed,
    /// `None` for an allowed self-transition such as re-staging.
    pub(crate) fn transition(
        &mut self,
        to: OperationStatus,
    ) -> Result<Option<OperationStatus>, EngineError> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                operation_id: self.operation_id,
                from: self.status,
                to,
            });
        }
        let from = self.status;
        self.status = to;
        Ok((from != to).then_some(from))
    }

    pub(crate) fn stage(&mut self, change: StagedChange) -> Result<Option<OperationStatus>, EngineError> {
        if !self.staging.is_target(change.resource_id) {
            return Err(EngineError::InvalidTarget {
                operation_id: self.operation_id,
                resource_id: change.resource_id,
            });
        }
        let from = self.transition(OperationStatus::Staged)?;
        self.staging.put(change);
        Ok(from)
    }

    pub(crate) fn unstage(
        &mut self,
        resource_id: ResourceId,
        field_path: &FieldPath,
    ) -> Result<(Option<StagedChange>, Option<OperationStatus>), EngineError> {
        if !self.staging.is_target(resource_id) {
            return Err(EngineError::InvalidTarget {
                operation_id: self.operation_id,
                resource_id,
            });
        }
        if self.status == OperationStatus::Draft {
            return Ok((None, None));
        }
        let from = self.transition(OperationStatus::Staged)?;
        Ok((self.staging.take(resource_id, field_path), from))
    }

    pub(crate) fn set_conflicted(&mut self, conflicted: BTreeSet<ResourceId>) {
        self.conflicted = conflicted;
    }

    /// Record a commit outcome. A recorded success is never replaced.
    pub(crate) fn record_result(&mut self, resource_id: ResourceId, result: TargetResult) -> bool {
        if self.results.get(&resource_id).is_some_and(TargetResult::is_success) {
            return false;
        }
        self.results.insert(resource_id, result);
        true
    }
}
