use std::collections::HashMap;

use conduit_core::{ResourceId, ResourceKind, ShelfId};

use crate::error::EngineError;

/// Name of the shelf every session starts with.
pub const DEFAULT_SHELF_NAME: &str = "Working set";

/// A named set of records a user has picked up, in the order they were
/// added. Each member remembers what kind of record it is. Never persisted.
#[derive(Debug, Clone)]
pub struct Shelf {
    shelf_id: ShelfId,
    name: String,
    order: Vec<ResourceId>,
    kinds: HashMap<ResourceId, ResourceKind>,
}

fn checked_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidShelfName(name.to_string()));
    }
    Ok(name.to_string())
}

impl Shelf {
    pub fn new(name: &str) -> Result<Self, EngineError> {
        Ok(Self {
            shelf_id: ShelfId::new(),
            name: checked_name(name)?,
            order: Vec::new(),
            kinds: HashMap::new(),
        })
    }

    pub fn shelf_id(&self) -> ShelfId {
        self.shelf_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: &str) -> Result<(), EngineError> {
        self.name = checked_name(name)?;
        Ok(())
    }

    /// Returns false if the id was already shelved; the first kind sticks.
    pub fn add(&mut self, kind: ResourceKind, resource_id: ResourceId) -> bool {
        if self.kinds.contains_key(&resource_id) {
            return false;
        }
        self.kinds.insert(resource_id, kind);
        self.order.push(resource_id);
        true
    }

    pub fn remove(&mut self, resource_id: ResourceId) -> bool {
        if self.kinds.remove(&resource_id).is_none() {
            return false;
        }
        self.order.retain(|id| *id != resource_id);
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.kinds.clear();
    }

    pub fn list(&self) -> &[ResourceId] {
        &self.order
    }

    pub fn kind_of(&self, resource_id: ResourceId) -> Option<ResourceKind> {
        self.kinds.get(&resource_id).copied()
    }

    /// Members of one kind, in shelf order.
    pub fn list_kind(&self, kind: ResourceKind) -> Vec<ResourceId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.kinds.get(id) == Some(&kind))
            .collect()
    }

    pub fn contains(&self, resource_id: ResourceId) -> bool {
        self.kinds.contains_key(&resource_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Extend<(ResourceKind, ResourceId)> for Shelf {
    fn extend<I: IntoIterator<Item = (ResourceKind, ResourceId)>>(&mut self, iter: I) {
        for (kind, id) in iter {
            self.add(kind, id);
        }
    }
}

/// The shelves of one session. Exactly one is active at a time and there is
/// always at least one.
#[derive(Debug, Clone)]
pub struct ShelfSet {
    shelves: Vec<Shelf>,
    active: usize,
}

impl Default for ShelfSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ShelfSet {
    pub fn new() -> Self {
        let working = Shelf {
            shelf_id: ShelfId::new(),
            name: DEFAULT_SHELF_NAME.to_string(),
            order: Vec::new(),
            kinds: HashMap::new(),
        };
        Self {
            shelves: vec![working],
            active: 0,
        }
    }

    /// Create an empty shelf. It does not become active.
    pub fn create(&mut self, name: &str) -> Result<ShelfId, EngineError> {
        let shelf = Shelf::new(name)?;
        let shelf_id = shelf.shelf_id;
        self.shelves.push(shelf);
        Ok(shelf_id)
    }

    fn position(&self, shelf_id: ShelfId) -> Result<usize, EngineError> {
        self.shelves
            .iter()
            .position(|s| s.shelf_id == shelf_id)
            .ok_or(EngineError::ShelfNotFound(shelf_id))
    }

    pub fn get(&self, shelf_id: ShelfId) -> Option<&Shelf> {
        self.shelves.iter().find(|s| s.shelf_id == shelf_id)
    }

    pub fn get_mut(&mut self, shelf_id: ShelfId) -> Option<&mut Shelf> {
        self.shelves.iter_mut().find(|s| s.shelf_id == shelf_id)
    }

    pub fn active(&self) -> &Shelf {
        &self.shelves[self.active]
    }

    pub fn active_mut(&mut self) -> &mut Shelf {
        &mut self.shelves[self.active]
    }

    pub fn activate(&mut self, shelf_id: ShelfId) -> Result<(), EngineError> {
        self.active = self.position(shelf_id)?;
        Ok(())
    }

    /// Remove a shelf. Deleting the active one activates the newest remaining
    /// shelf; the last shelf cannot be deleted.
    pub fn delete(&mut self, shelf_id: ShelfId) -> Result<Shelf, EngineError> {
        let pos = self.position(shelf_id)?;
        if self.shelves.len() == 1 {
            return Err(EngineError::LastShelf(shelf_id));
        }
        let removed = self.shelves.remove(pos);
        if pos == self.active {
            self.active = self.shelves.len() - 1;
        } else if pos < self.active {
            self.active -= 1;
        }
        Ok(removed)
    }

    /// Newest first.
    pub fn list(&self) -> impl Iterator<Item = &Shelf> {
        self.shelves.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.shelves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shelves.is_empty()
    }

    /// Take a record off every shelf. Returns how many shelves held it.
    pub fn remove_everywhere(&mut self, resource_id: ResourceId) -> usize {
        self.shelves
            .iter_mut()
            .filter_map(|s| s.remove(resource_id).then_some(()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shelf() -> Shelf {
        Shelf::new("Pantries").unwrap()
    }

    #[test]
    fn preserves_insertion_order() {
        let (a, b, c) = (ResourceId::new(), ResourceId::new(), ResourceId::new());
        let mut shelf = shelf();
        shelf.add(ResourceKind::Service, c);
        shelf.add(ResourceKind::Location, a);
        shelf.add(ResourceKind::Service, b);
        assert_eq!(shelf.list(), &[c, a, b]);
        assert_eq!(shelf.list_kind(ResourceKind::Service), vec![c, b]);
        assert_eq!(shelf.kind_of(a), Some(ResourceKind::Location));
    }

    #[test]
    fn duplicate_add_is_noop() {
        let a = ResourceId::new();
        let mut shelf = shelf();
        assert!(shelf.add(ResourceKind::Service, a));
        assert!(!shelf.add(ResourceKind::Organization, a));
        assert_eq!(shelf.len(), 1);
        assert_eq!(shelf.kind_of(a), Some(ResourceKind::Service));
    }

    #[test]
    fn remove_and_clear() {
        let (a, b) = (ResourceId::new(), ResourceId::new());
        let mut shelf = shelf();
        shelf.extend([(ResourceKind::Service, a), (ResourceKind::Service, b)]);
        assert!(shelf.remove(a));
        assert!(!shelf.remove(a));
        assert!(!shelf.contains(a));
        assert_eq!(shelf.list(), &[b]);

        shelf.add(ResourceKind::Service, a);
        assert_eq!(shelf.list(), &[b, a]);
        shelf.clear();
        assert!(shelf.is_empty());
        assert!(shelf.list().is_empty());
    }

    #[test]
    fn names_must_not_be_blank() {
        assert!(matches!(Shelf::new("   "), Err(EngineError::InvalidShelfName(_))));
        let mut shelf = shelf();
        assert!(shelf.rename("").is_err());
        shelf.rename("  Shelters ").unwrap();
        assert_eq!(shelf.name(), "Shelters");
    }

    #[test]
    fn set_starts_with_working_shelf() {
        let shelves = ShelfSet::new();
        assert_eq!(shelves.len(), 1);
        assert_eq!(shelves.active().name(), DEFAULT_SHELF_NAME);
    }

    #[test]
    fn set_lists_newest_first_and_switches() {
        let mut shelves = ShelfSet::new();
        let working = shelves.active().shelf_id();
        let pantries = shelves.create("Pantries").unwrap();
        let shelters = shelves.create("Shelters").unwrap();
        let names: Vec<_> = shelves.list().map(Shelf::name).collect();
        assert_eq!(names, vec!["Shelters", "Pantries", DEFAULT_SHELF_NAME]);
        assert_eq!(shelves.active().shelf_id(), working);

        shelves.activate(pantries).unwrap();
        shelves.active_mut().add(ResourceKind::Service, ResourceId::new());
        assert_eq!(shelves.get(pantries).unwrap().len(), 1);
        assert!(shelves.get(shelters).unwrap().is_empty());
        assert!(matches!(
            shelves.activate(ShelfId::new()),
            Err(EngineError::ShelfNotFound(_))
        ));
    }

    #[test]
    fn deleting_active_falls_back_to_newest() {
        let mut shelves = ShelfSet::new();
        let working = shelves.active().shelf_id();
        let pantries = shelves.create("Pantries").unwrap();
        let shelters = shelves.create("Shelters").unwrap();

        shelves.activate(shelters).unwrap();
        assert_eq!(shelves.delete(shelters).unwrap().name(), "Shelters");
        assert_eq!(shelves.active().shelf_id(), pantries);

        shelves.activate(pantries).unwrap();
        shelves.delete(working).unwrap();
        assert_eq!(shelves.active().shelf_id(), pantries);
        assert!(matches!(shelves.delete(pantries), Err(EngineError::LastShelf(_))));
    }

    #[test]
    fn remove_everywhere_counts_shelves() {
        let id = ResourceId::new();
        let mut shelves = ShelfSet::new();
        let other = shelves.create("Other").unwrap();
        shelves.active_mut().add(ResourceKind::Service, id);
        shelves.get_mut(other).unwrap().add(ResourceKind::Service, id);
        assert_eq!(shelves.remove_everywhere(id), 2);
        assert_eq!(shelves.remove_everywhere(id), 0);
    }
}
