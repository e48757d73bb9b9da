//! Pending change tracking.
//!
//! # Invariants
//! - An identity appears in at most one of inserted/updated/deleted.
//! - Updating a pending insert folds into the insert.
//! - Deleting a pending insert drops it without leaving a tombstone.

use crate::model::object::{ManagedObject, ObjectId};
use indexmap::IndexMap;

/// Ordered set of uncommitted inserts, updates and deletes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    inserted: IndexMap<ObjectId, ManagedObject>,
    updated: IndexMap<ObjectId, ManagedObject>,
    /// Deleted identity -> entity name.
    deleted: IndexMap<ObjectId, String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of recorded operations.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    pub fn inserted(&self) -> impl Iterator<Item = &ManagedObject> {
        self.inserted.values()
    }

    pub fn updated(&self) -> impl Iterator<Item = &ManagedObject> {
        self.updated.values()
    }

    /// Deleted identities with their entity names.
    pub fn deleted(&self) -> impl Iterator<Item = (ObjectId, &str)> {
        self.deleted.iter().map(|(id, entity)| (*id, entity.as_str()))
    }

    pub fn is_deleted(&self, id: ObjectId) -> bool {
        self.deleted.contains_key(&id)
    }

    /// Returns the pending version of `id`, if it is inserted or updated.
    pub fn pending_object(&self, id: ObjectId) -> Option<&ManagedObject> {
        self.inserted.get(&id).or_else(|| self.updated.get(&id))
    }

    pub fn touches(&self, id: ObjectId) -> bool {
        self.inserted.contains_key(&id)
            || self.updated.contains_key(&id)
            || self.deleted.contains_key(&id)
    }

    pub(crate) fn record_insert(&mut self, object: ManagedObject) {
        let id = object.id();
        self.deleted.shift_remove(&id);
        self.updated.shift_remove(&id);
        self.inserted.insert(id, object);
    }

    pub(crate) fn record_update(&mut self, object: ManagedObject) {
        let id = object.id();
        if let Some(slot) = self.inserted.get_mut(&id) {
            *slot = object;
            return;
        }
        self.deleted.shift_remove(&id);
        self.updated.insert(id, object);
    }

    pub(crate) fn record_delete(&mut self, id: ObjectId, entity: &str) {
        if self.inserted.shift_remove(&id).is_some() {
            return;
        }
        self.updated.shift_remove(&id);
        self.deleted.insert(id, entity.to_string());
    }

    /// Replays `other` on top of this set, in insert/update/delete order.
    pub(crate) fn absorb(&mut self, other: ChangeSet) {
        for (_, object) in other.inserted {
            self.record_insert(object);
        }
        for (_, object) in other.updated {
            self.record_update(object);
        }
        for (id, entity) in other.deleted {
            self.record_delete(id, &entity);
        }
    }

    /// Moves the pending versions of `ids` into a new set.
    pub(crate) fn detach_objects(&mut self, ids: &[ObjectId]) -> ChangeSet {
        let mut detached = ChangeSet::default();
        for id in ids {
            if let Some(object) = self.inserted.shift_remove(id) {
                detached.inserted.insert(*id, object);
            } else if let Some(object) = self.updated.shift_remove(id) {
                detached.updated.insert(*id, object);
            }
        }
        detached
    }

    /// Applies this set to a base list of `entity` objects in store order.
    ///
    /// Deleted objects are removed, updated objects replaced in place and
    /// inserted objects appended in insertion order.
    pub(crate) fn overlay(&self, entity: &str, base: Vec<ManagedObject>) -> Vec<ManagedObject> {
        let mut objects: Vec<ManagedObject> = base
            .into_iter()
            .filter(|object| !self.deleted.contains_key(&object.id()))
            .map(|object| match self.updated.get(&object.id()) {
                Some(updated) => updated.clone(),
                None => object,
            })
            .collect();

        let already_present = |id: ObjectId, objects: &[ManagedObject]| {
            objects.iter().any(|object| object.id() == id)
        };
        for object in self.inserted.values().filter(|object| object.entity() == entity) {
            if !already_present(object.id(), &objects) {
                objects.push(object.clone());
            }
        }
        objects
    }
}
