//! Per-context working set: registry, pending changes, upstream link.
//!
//! # Invariants
//! - Only the lane owning this state ever touches it.
//! - Reads see the upstream view with this context's pending changes on top.
//! - Only the root keeps a registry; it holds at most one copy per identity.
//! - Objects failing validation stay pending without holding back valid ones.
//! - A failed upstream commit leaves the pending set as it was before.

use super::change_set::ChangeSet;
use super::{ContextHandle, ContextId, ContextKind};
use crate::model::object::{ManagedObject, ObjectId};
use crate::model::schema::{Model, ValidationError};
use crate::query::{FetchError, Filter};
use crate::repo::object_repo::ObjectRepository;
use crate::save::SaveError;
use indexmap::IndexMap;
use std::sync::Arc;

/// Where committed changes go.
pub(crate) enum Upstream {
    /// Root context: the physical store.
    Store(Box<dyn ObjectRepository + Send>),
    /// Child context: the parent's pending set.
    Parent(ContextHandle),
}

/// Counts of registry changes produced by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub registered: usize,
    pub refreshed: usize,
    pub evicted: usize,
}

pub(crate) struct ContextState {
    id: ContextId,
    kind: ContextKind,
    model: Arc<Model>,
    registry: IndexMap<ObjectId, ManagedObject>,
    pending: ChangeSet,
    upstream: Upstream,
}

impl ContextState {
    pub(crate) fn root(
        id: ContextId,
        model: Arc<Model>,
        store: Box<dyn ObjectRepository + Send>,
    ) -> Self {
        Self::with_upstream(id, ContextKind::Interactive, model, Upstream::Store(store))
    }

    pub(crate) fn child(id: ContextId, model: Arc<Model>, parent: ContextHandle) -> Self {
        Self::with_upstream(id, ContextKind::Worker, model, Upstream::Parent(parent))
    }

    fn with_upstream(
        id: ContextId,
        kind: ContextKind,
        model: Arc<Model>,
        upstream: Upstream,
    ) -> Self {
        Self {
            id,
            kind,
            model,
            registry: IndexMap::new(),
            pending: ChangeSet::default(),
            upstream,
        }
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn kind(&self) -> ContextKind {
        self.kind
    }

    pub(crate) fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Creates a detached object with model defaults; nothing is recorded.
    pub(crate) fn instantiate(&self, entity: &str) -> Result<ManagedObject, ValidationError> {
        self.model.instantiate(entity)
    }

    pub(crate) fn insert(&mut self, object: ManagedObject) {
        self.pending.record_insert(object);
    }

    pub(crate) fn update(&mut self, object: ManagedObject) {
        self.pending.record_update(object);
    }

    pub(crate) fn delete(&mut self, object: &ManagedObject) {
        self.registry.shift_remove(&object.id());
        self.pending.record_delete(object.id(), object.entity());
    }

    /// Objects of `entity` as this context sees them, in store order.
    pub(crate) fn resolve(&self, entity: &str) -> Result<Vec<ManagedObject>, FetchError> {
        if self.model.entity_named(entity).is_none() {
            return Err(FetchError::UnknownEntity(entity.to_string()));
        }
        let base = match &self.upstream {
            Upstream::Store(store) => store.list_entity(entity)?,
            Upstream::Parent(parent) => {
                let entity = entity.to_string();
                parent.perform_and_wait(move |cell| cell.borrow().resolve(&entity))??
            }
        };
        Ok(self.pending.overlay(entity, base))
    }

    /// Resolves, filters and materializes objects of `entity`.
    pub(crate) fn fetch(
        &mut self,
        entity: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<ManagedObject>, FetchError> {
        let matched: Vec<ManagedObject> = self
            .resolve(entity)?
            .into_iter()
            .filter(|object| filter.map_or(true, |filter| filter.matches(object)))
            .collect();
        for object in &matched {
            self.materialize(object);
        }
        Ok(matched)
    }

    /// Finds one object by identity.
    ///
    /// The root answers from its registry when the object is materialized;
    /// the registry of a child may lag behind its parent, so a child always
    /// asks upstream.
    pub(crate) fn lookup(&mut self, id: ObjectId) -> Result<Option<ManagedObject>, FetchError> {
        if self.pending.is_deleted(id) {
            return Ok(None);
        }
        if let Some(object) = self.pending.pending_object(id) {
            return Ok(Some(object.clone()));
        }

        let found = match &self.upstream {
            Upstream::Store(store) => match self.registry.get(&id) {
                Some(object) => Some(object.clone()),
                None => store.get(id)?,
            },
            Upstream::Parent(parent) => {
                parent.perform_and_wait(move |cell| cell.borrow_mut().lookup(id))??
            }
        };
        if let Some(object) = &found {
            self.materialize(object);
        }
        Ok(found)
    }

    fn is_root(&self) -> bool {
        matches!(self.upstream, Upstream::Store(_))
    }

    fn materialize(&mut self, object: &ManagedObject) {
        if !self.is_root() || self.pending.touches(object.id()) {
            return;
        }
        self.registry.insert(object.id(), object.clone());
    }

    /// Folds committed changes into the registry keyed by identity.
    pub(crate) fn merge_changes(&mut self, changes: &ChangeSet) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for object in changes.inserted() {
            if self.registry.insert(object.id(), object.clone()).is_none() {
                summary.registered += 1;
            } else {
                summary.refreshed += 1;
            }
        }
        for object in changes.updated() {
            if let Some(slot) = self.registry.get_mut(&object.id()) {
                *slot = object.clone();
                summary.refreshed += 1;
            }
        }
        for (id, _) in changes.deleted() {
            if self.registry.shift_remove(&id).is_some() {
                summary.evicted += 1;
            }
        }
        summary
    }

    /// Takes over a child's committed changes as this context's pending changes.
    pub(crate) fn absorb(&mut self, changes: ChangeSet) {
        self.pending.absorb(changes);
    }

    /// Local commit stage: validates and detaches the pending set.
    ///
    /// Invalid objects are held back as pending; the rest is detached.
    /// Returns `Ok(None)` when there is nothing to commit and an error when
    /// nothing valid is left to commit.
    pub(crate) fn commit_local(&mut self) -> Result<Option<ChangeSet>, SaveError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let mut rejected = Vec::new();
        let mut first_error = None;
        for object in self.pending.inserted().chain(self.pending.updated()) {
            if let Err(err) = self.model.validate(object) {
                rejected.push(object.id());
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        let held = self.pending.detach_objects(&rejected);
        let valid = std::mem::replace(&mut self.pending, held);
        match first_error {
            Some(err) if valid.is_empty() => Err(err.into()),
            _ => Ok(Some(valid)),
        }
    }

    /// Upstream commit stage: store write for the root, parent push for a child.
    pub(crate) fn commit_upstream(&mut self, changes: &ChangeSet) -> Result<(), SaveError> {
        match &mut self.upstream {
            Upstream::Store(store) => store.apply_changes(changes)?,
            Upstream::Parent(parent) => {
                let pushed = changes.clone();
                parent.perform_and_wait(move |cell| cell.borrow_mut().absorb(pushed))?;
            }
        }
        Ok(())
    }

    /// Runs both commit stages; on failure the pending set is restored.
    pub(crate) fn commit(&mut self) -> Result<Option<ChangeSet>, SaveError> {
        let Some(changes) = self.commit_local()? else {
            return Ok(None);
        };
        if let Err(err) = self.commit_upstream(&changes) {
            self.restore(changes);
            return Err(err);
        }
        if self.is_root() {
            self.merge_changes(&changes);
        }
        Ok(Some(changes))
    }

    fn restore(&mut self, changes: ChangeSet) {
        let newer = std::mem::replace(&mut self.pending, changes);
        self.pending.absorb(newer);
    }
}
