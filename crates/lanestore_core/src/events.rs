//! Commit event channel scoped to one stack instance.
//!
//! # Responsibility
//! - Deliver one `CommitEvent` per successful save to every subscriber.
//!
//! # Invariants
//! - Publishing never holds the subscriber list lock while calling out,
//!   so subscribers may publish or (un)subscribe re-entrantly.
//! - Subscribers filter by origin; delivery order across contexts is
//!   not part of the contract.

use crate::context::change_set::ChangeSet;
use crate::context::{ContextId, ContextKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable record of one successful save.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    origin: ContextId,
    origin_kind: ContextKind,
    changes: Arc<ChangeSet>,
}

impl CommitEvent {
    pub(crate) fn new(origin: ContextId, origin_kind: ContextKind, changes: ChangeSet) -> Self {
        Self {
            origin,
            origin_kind,
            changes: Arc::new(changes),
        }
    }

    pub fn origin(&self) -> ContextId {
        self.origin
    }

    pub fn origin_kind(&self) -> ContextKind {
        self.origin_kind
    }

    /// Changes the origin context committed.
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub(crate) fn shared_changes(&self) -> Arc<ChangeSet> {
        Arc::clone(&self.changes)
    }
}

/// Handle returned by `CommitBus::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&CommitEvent) + Send + Sync>;

/// In-process publish/subscribe channel for commit events.
#[derive(Default)]
pub struct CommitBus {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
}

impl CommitBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CommitEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes one subscriber; returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Delivers `event` to every current subscriber, in subscription order.
    ///
    /// Returns the number of subscribers notified.
    pub fn publish(&self, event: &CommitEvent) -> usize {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
