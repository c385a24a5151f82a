use std::collections::{BTreeMap, HashSet};

use conduit_core::{FieldPath, FieldValue, ResourceId};

/// A proposed value for one field of one target, pinned to the version the
/// caller saw when computing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedChange {
    pub resource_id: ResourceId,
    pub field_path: FieldPath,
    pub baseline_version: u64,
    pub proposed_value: FieldValue,
}

/// Staged changes of a single bulk operation. At most one change per
/// `(resource_id, field_path)`; staging the same pair again replaces it.
#[derive(Debug, Clone, Default)]
pub struct StagingStore {
    targets: Vec<ResourceId>,
    target_set: HashSet<ResourceId>,
    changes: BTreeMap<ResourceId, BTreeMap<FieldPath, StagedChange>>,
}

impl StagingStore {
    pub fn new(targets: impl IntoIterator<Item = ResourceId>) -> Self {
        let mut store = Self::default();
        for id in targets {
            if store.target_set.insert(id) {
                store.targets.push(id);
            }
        }
        store
    }

    pub fn targets(&self) -> &[ResourceId] {
        &self.targets
    }

    pub fn is_target(&self, resource_id: ResourceId) -> bool {
        self.target_set.contains(&resource_id)
    }

    /// Insert or replace. Callers check target membership first.
    pub(crate) fn put(&mut self, change: StagedChange) -> Option<StagedChange> {
        self.changes
            .entry(change.resource_id)
            .or_default()
            .insert(change.field_path.clone(), change)
    }

    pub(crate) fn take(&mut self, resource_id: ResourceId, field_path: &FieldPath) -> Option<StagedChange> {
        let per_target = self.changes.get_mut(&resource_id)?;
        let removed = per_target.remove(field_path);
        if per_target.is_empty() {
            self.changes.remove(&resource_id);
        }
        removed
    }

    pub fn get(&self, resource_id: ResourceId, field_path: &FieldPath) -> Option<&StagedChange> {
        self.changes.get(&resource_id)?.get(field_path)
    }

    pub fn changes_for(&self, resource_id: ResourceId) -> Vec<&StagedChange> {
        self.changes
            .get(&resource_id)
            .map(|per_target| per_target.values().collect())
            .unwrap_or_default()
    }

    /// Every staged change, grouped by target in shelf order.
    pub fn all_changes(&self) -> Vec<&StagedChange> {
        self.targets
            .iter()
            .flat_map(|id| self.changes_for(*id))
            .collect()
    }

    pub fn has_changes(&self, resource_id: ResourceId) -> bool {
        self.changes.contains_key(&resource_id)
    }

    pub fn len(&self) -> usize {
        self.changes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
