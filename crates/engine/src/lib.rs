pub mod audit;
pub mod commit;
pub mod config;
pub mod error;
pub mod merge;
pub mod operation;
pub mod preview;
pub mod resolve;
pub mod shelf;
pub mod staging;
pub mod undo;

pub use audit::{AuditEntry, AuditLog};
pub use commit::CommitReport;
pub use config::EngineConfig;
pub use error::EngineError;
pub use merge::MergeReport;
pub use operation::{BulkOperation, OperationStatus, TargetResult};
pub use preview::{DiffLine, DisputedField, PreviewEntry, PreviewReport, TargetPreview};
pub use resolve::{ResolutionOption, ResolutionSource};
pub use shelf::{Shelf, ShelfSet, DEFAULT_SHELF_NAME};
pub use staging::{StagedChange, StagingStore};
pub use undo::{UndoLog, UndoOutcome, UndoRecord, UndoReport};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use conduit_core::{
    chord::ChordState, FieldPath, FieldValue, OperationId, ResourceId, SessionId, ShelfId,
    UndoToken,
};
use conduit_storage::RecordStore;

fn parse_path(field_path: &str) -> Result<FieldPath, EngineError> {
    FieldPath::parse(field_path).map_err(|e| EngineError::InvalidFieldPath(e.to_string()))
}

/// One user's bulk-edit workspace over a shared record store.
///
/// The shelves, operations, undo log and audit log are private to the session;
/// the only shared state is the store, and every write to it is a
/// compare-and-swap against a version the session has seen.
pub struct BulkEditSession<S: RecordStore> {
    session_id: SessionId,
    store: Arc<S>,
    config: EngineConfig,
    shelves: ShelfSet,
    operations: BTreeMap<OperationId, BulkOperation>,
    undo_log: UndoLog,
    audit: AuditLog,
}

impl<S: RecordStore> BulkEditSession<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            session_id: SessionId::new(),
            store,
            undo_log: UndoLog::new(config.undo_history_limit),
            config,
            shelves: ShelfSet::new(),
            operations: BTreeMap::new(),
            audit: AuditLog::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The active shelf.
    pub fn shelf(&self) -> &Shelf {
        self.shelves.active()
    }

    pub fn shelf_mut(&mut self) -> &mut Shelf {
        self.shelves.active_mut()
    }

    pub fn shelves(&self) -> &ShelfSet {
        &self.shelves
    }

    pub fn shelves_mut(&mut self) -> &mut ShelfSet {
        &mut self.shelves
    }

    /// Create a named shelf and make it the active one.
    pub fn create_shelf(&mut self, name: &str) -> Result<ShelfId, EngineError> {
        let shelf_id = self.shelves.create(name)?;
        self.shelves.activate(shelf_id)?;
        tracing::debug!(session_id = %self.session_id, %shelf_id, name, "shelf created");
        Ok(shelf_id)
    }

    /// Put a stored record on the active shelf, tagged with its kind.
    /// Returns false if it was already there.
    pub fn shelve(&mut self, resource_id: ResourceId) -> Result<bool, EngineError> {
        let record = self
            .store
            .get(resource_id)?
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        Ok(self.shelves.active_mut().add(record.kind, resource_id))
    }

    /// `shelve` each id in turn. Returns how many were newly added.
    pub fn shelve_all(
        &mut self,
        resource_ids: impl IntoIterator<Item = ResourceId>,
    ) -> Result<usize, EngineError> {
        let mut added = 0;
        for resource_id in resource_ids {
            if self.shelve(resource_id)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Key-sequence tracker using the session's configured chord timeout.
    pub fn input_chords(&self, prefixes: impl IntoIterator<Item = char>) -> ChordState {
        ChordState::new(prefixes, self.config.chord_timeout_ms)
    }

    pub fn audit_log(&self) -> &[AuditEntry] {
        self.audit.entries()
    }

    pub fn undo_records(&self, operation_id: OperationId) -> &[UndoRecord] {
        self.undo_log.records(operation_id)
    }

    pub fn operation(&self, operation_id: OperationId) -> Result<&BulkOperation, EngineError> {
        self.operations
            .get(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))
    }

    /// Open a bulk operation over everything currently on the active shelf.
    pub fn start_operation(&mut self) -> Result<OperationId, EngineError> {
        let shelf = self.shelves.active();
        if shelf.is_empty() {
            return Err(EngineError::EmptyShelf);
        }
        let operation_id = OperationId::new();
        let op = BulkOperation::new(operation_id, shelf.list().iter().copied());
        tracing::debug!(session_id = %self.session_id, %operation_id, targets = op.targets().len(), "operation started");
        self.operations.insert(operation_id, op);
        Ok(operation_id)
    }

    pub fn stage_change(
        &mut self,
        operation_id: OperationId,
        resource_id: ResourceId,
        field_path: &str,
        baseline_version: u64,
        value: impl Into<FieldValue>,
    ) -> Result<(), EngineError> {
        let field_path = parse_path(field_path)?;
        self.stage_parsed(operation_id, resource_id, field_path, baseline_version, value.into())
    }

    fn stage_parsed(
        &mut self,
        operation_id: OperationId,
        resource_id: ResourceId,
        field_path: FieldPath,
        baseline_version: u64,
        proposed_value: FieldValue,
    ) -> Result<(), EngineError> {
        let op = self
            .operations
            .get_mut(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        tracing::debug!(%operation_id, %resource_id, %field_path, baseline_version, "staging change");
        let from = op.stage(StagedChange {
            resource_id,
            field_path,
            baseline_version,
            proposed_value,
        })?;
        if let Some(from) = from {
            self.audit.record(operation_id, from, OperationStatus::Staged)?;
        }
        Ok(())
    }

    pub fn unstage(
        &mut self,
        operation_id: OperationId,
        resource_id: ResourceId,
        field_path: &str,
    ) -> Result<Option<StagedChange>, EngineError> {
        let field_path = parse_path(field_path)?;
        let op = self
            .operations
            .get_mut(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        let (removed, from) = op.unstage(resource_id, &field_path)?;
        if let Some(from) = from {
            self.audit.record(operation_id, from, OperationStatus::Staged)?;
        }
        Ok(removed)
    }

    /// Diff staged changes against the live records. Safe to repeat; it is
    /// how a caller refreshes after resolving conflicts.
    pub fn preview(&mut self, operation_id: OperationId) -> Result<PreviewReport, EngineError> {
        let op = self
            .operations
            .get_mut(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        if !op.status().can_transition_to(OperationStatus::Previewed) {
            return Err(EngineError::InvalidTransition {
                operation_id,
                from: op.status(),
                to: OperationStatus::Previewed,
            });
        }

        let report = preview::build_preview(self.store.as_ref(), op)?;
        op.set_conflicted(preview::conflicted_set(&report));
        if let Some(from) = op.transition(OperationStatus::Previewed)? {
            self.audit.record(operation_id, from, OperationStatus::Previewed)?;
        }

        let conflicted = report.conflicted_ids();
        if conflicted.is_empty() {
            tracing::debug!(%operation_id, targets = report.entries.len(), lines = report.effective_lines(), "preview clean");
        } else {
            tracing::warn!(%operation_id, conflicted = conflicted.len(), "preview found stale baselines");
        }
        Ok(report)
    }

    fn require_target(&self, operation_id: OperationId, resource_id: ResourceId) -> Result<(), EngineError> {
        if self.operation(operation_id)?.staging().is_target(resource_id) {
            Ok(())
        } else {
            Err(EngineError::InvalidTarget {
                operation_id,
                resource_id,
            })
        }
    }

    /// The live server value of one disputed field. Read-only.
    pub fn resolve_conflict(
        &self,
        operation_id: OperationId,
        resource_id: ResourceId,
        field_path: &str,
    ) -> Result<ResolutionOption, EngineError> {
        self.require_target(operation_id, resource_id)?;
        let field_path = parse_path(field_path)?;
        resolve::server_option(self.store.as_ref(), resource_id, &field_path)
    }

    /// Server options for every staged field of `resource_id` whose baseline
    /// is behind the record.
    pub fn resolution_options(
        &self,
        operation_id: OperationId,
        resource_id: ResourceId,
    ) -> Result<Vec<ResolutionOption>, EngineError> {
        self.require_target(operation_id, resource_id)?;
        let op = self.operation(operation_id)?;
        let record = self
            .store
            .get(resource_id)?
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        Ok(op
            .changes_for(resource_id)
            .into_iter()
            .filter(|c| c.baseline_version != record.version)
            .map(|c| ResolutionOption {
                resource_id,
                field_path: c.field_path.clone(),
                value: c.field_path.get(&record.fields).cloned(),
                version: record.version,
                source: ResolutionSource::Server,
            })
            .collect())
    }

    /// Re-stage the option's value against the option's version.
    pub fn accept_resolution(
        &mut self,
        operation_id: OperationId,
        option: &ResolutionOption,
    ) -> Result<(), EngineError> {
        self.stage_parsed(
            operation_id,
            option.resource_id,
            option.field_path.clone(),
            option.version,
            option.staged_value(),
        )
    }

    /// Keep the caller's own value but re-base it onto the record's current version.
    pub fn rebase(
        &mut self,
        operation_id: OperationId,
        resource_id: ResourceId,
        field_path: &str,
        value: impl Into<FieldValue>,
    ) -> Result<ResolutionOption, EngineError> {
        self.require_target(operation_id, resource_id)?;
        let field_path = parse_path(field_path)?;
        let record = self
            .store
            .get(resource_id)?
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let option = ResolutionOption {
            resource_id,
            field_path,
            value: Some(value.into()),
            version: record.version,
            source: ResolutionSource::Local,
        };
        self.accept_resolution(operation_id, &option)?;
        Ok(option)
    }

    /// Write every target's staged changes with a conditional write on its
    /// baseline. Targets succeed or fail independently.
    pub fn commit(&mut self, operation_id: OperationId) -> Result<CommitReport, EngineError> {
        let op = self
            .operations
            .get_mut(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        match op.status() {
            OperationStatus::Previewed => {}
            OperationStatus::Draft | OperationStatus::Staged => {
                return Err(EngineError::NotPreviewed(operation_id));
            }
            from => {
                return Err(EngineError::InvalidTransition {
                    operation_id,
                    from,
                    to: OperationStatus::Committing,
                });
            }
        }
        if !op.conflicted().is_empty() {
            return Err(EngineError::UnresolvedConflict {
                resource_ids: op.conflicted().iter().copied().collect(),
            });
        }

        if let Some(from) = op.transition(OperationStatus::Committing)? {
            self.audit.record(operation_id, from, OperationStatus::Committing)?;
        }
        let outcomes = commit::execute(self.store.as_ref(), op, self.config.commit_parallelism);

        let mut results = Vec::with_capacity(outcomes.len());
        let mut undo_records = Vec::new();
        for outcome in outcomes {
            op.record_result(outcome.resource_id, outcome.result.clone());
            results.push((outcome.resource_id, outcome.result));
            undo_records.extend(outcome.undo);
        }

        let status = if results.iter().any(|(_, r)| r.is_failure()) {
            OperationStatus::PartiallyCommitted
        } else {
            OperationStatus::Committed
        };
        if let Some(from) = op.transition(status)? {
            self.audit.record(operation_id, from, status)?;
        }

        let undo_token = if undo_records.is_empty() {
            None
        } else {
            let token = UndoToken::generate();
            for evicted in self.undo_log.push(operation_id, undo_records, &token) {
                tracing::debug!(%evicted, "undo history full, dropped oldest operation");
            }
            Some(token)
        };

        let report = CommitReport {
            operation_id,
            status,
            results,
            undo_token,
        };
        tracing::info!(%operation_id, applied = report.applied(), total = report.attempted(), %status, "commit finished");
        Ok(report)
    }

    pub fn undo(&mut self, operation_id: OperationId) -> Result<UndoReport, EngineError> {
        if self.config.require_undo_token {
            return Err(EngineError::InvalidUndoToken(operation_id));
        }
        self.undo_inner(operation_id, None)
    }

    pub fn undo_with_token(
        &mut self,
        operation_id: OperationId,
        token: &UndoToken,
    ) -> Result<UndoReport, EngineError> {
        self.undo_inner(operation_id, Some(token))
    }

    fn undo_inner(
        &mut self,
        operation_id: OperationId,
        token: Option<&UndoToken>,
    ) -> Result<UndoReport, EngineError> {
        let op = self
            .operations
            .get_mut(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        if !op.status().has_committed() {
            return Err(EngineError::NothingToUndo(operation_id));
        }
        let records = self.undo_log.records(operation_id).to_vec();
        if records.is_empty() {
            return Err(EngineError::NothingToUndo(operation_id));
        }
        if let Some(token) = token
            && !self.undo_log.token_matches(operation_id, token)
        {
            return Err(EngineError::InvalidUndoToken(operation_id));
        }

        let mut outcomes = Vec::with_capacity(records.len());
        let mut keep = HashSet::new();
        for record in &records {
            let outcome = undo::compensate(self.store.as_ref(), record);
            match &outcome {
                UndoOutcome::Restored(_) | UndoOutcome::NotFound => {}
                UndoOutcome::StaleUndo { current_version } => {
                    tracing::warn!(%operation_id, resource_id = %record.resource_id, expected = record.post_commit_version, current = current_version, "stale undo skipped");
                    keep.insert(record.resource_id);
                }
                _ => {
                    keep.insert(record.resource_id);
                }
            }
            outcomes.push((record.resource_id, outcome));
        }
        let remaining = self.undo_log.retain(operation_id, &keep);

        let report = UndoReport {
            operation_id,
            outcomes,
        };
        if report.is_complete()
            && let Some(from) = op.transition(OperationStatus::Undone)?
        {
            self.audit.record(operation_id, from, OperationStatus::Undone)?;
        }
        tracing::info!(%operation_id, restored = report.restored(), total = records.len(), remaining, "undo finished");
        Ok(report)
    }

    /// Fold `duplicate_id` into `survivor_id`: copy the chosen fields over with
    /// a conditional write at `survivor_version`, delete the duplicate, and
    /// take it off every shelf.
    pub fn merge_duplicate(
        &mut self,
        survivor_id: ResourceId,
        survivor_version: u64,
        duplicate_id: ResourceId,
        field_paths: &[&str],
    ) -> Result<MergeReport, EngineError> {
        let field_paths = field_paths
            .iter()
            .map(|p| parse_path(p))
            .collect::<Result<Vec<_>, _>>()?;
        let report = merge::merge_duplicate(
            self.store.as_ref(),
            survivor_id,
            survivor_version,
            duplicate_id,
            &field_paths,
        )?;
        self.shelves.remove_everywhere(duplicate_id);
        Ok(report)
    }

    /// Discard an uncommitted operation. Nothing is written.
    pub fn abandon(&mut self, operation_id: OperationId) -> Result<(), EngineError> {
        let op = self
            .operations
            .get_mut(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        if let Some(from) = op.transition(OperationStatus::Abandoned)? {
            self.audit.record(operation_id, from, OperationStatus::Abandoned)?;
        }
        self.operations.remove(&operation_id);
        tracing::debug!(%operation_id, "operation abandoned");
        Ok(())
    }

    /// Start a fresh operation over the targets that failed in `operation_id`.
    pub fn retry_failed(&mut self, operation_id: OperationId) -> Result<OperationId, EngineError> {
        let op = self.operation(operation_id)?;
        if !op.status().has_committed() {
            return Err(EngineError::NotCommitted(operation_id));
        }
        let failed = op.failed_targets();
        if failed.is_empty() {
            return Err(EngineError::NoFailedTargets(operation_id));
        }
        let retry_id = OperationId::new();
        tracing::debug!(%operation_id, %retry_id, targets = failed.len(), "retrying failed targets");
        self.operations
            .insert(retry_id, BulkOperation::new(retry_id, failed));
        Ok(retry_id)
    }
}
