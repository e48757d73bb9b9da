//! Context pool: the interactive context and its worker child.
//!
//! # Responsibility
//! - Identify contexts and expose a cloneable handle to each.
//! - Route every context operation through the context's own lane.
//!
//! # Invariants
//! - Exactly two contexts per stack: interactive (root) and worker (child).
//! - Context state is only reachable through `perform`/`perform_and_wait`,
//!   which execute on the context's lane in submission order.
//!
//! # See also
//! - `crate::save` for the commit pipeline.
//! - `crate::merge` for cross-context propagation.

pub mod change_set;
pub mod lane;
pub mod router;
pub(crate) mod state;

use lane::{LaneError, LaneHandle, LaneId};
use state::ContextState;
use std::cell::RefCell;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique context identity; commit events carry it as origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Role of a context within the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Root context bound to the interactive lane; sole writer of the store.
    Interactive,
    /// Background child of the interactive context.
    Worker,
}

impl ContextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Worker => "worker",
        }
    }
}

/// Cloneable handle to one context and its lane.
#[derive(Clone)]
pub struct ContextHandle {
    id: ContextId,
    kind: ContextKind,
    lane: LaneHandle<ContextState>,
}

impl ContextHandle {
    pub(crate) fn new(id: ContextId, kind: ContextKind, lane: LaneHandle<ContextState>) -> Self {
        Self { id, kind, lane }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Lane this context's queue runs on.
    pub fn lane_id(&self) -> LaneId {
        self.lane.id()
    }

    /// Returns whether the caller is already running on this context's lane.
    pub fn is_current(&self) -> bool {
        self.lane.id().is_current()
    }

    /// Enqueues `job` on this context's queue without waiting.
    pub(crate) fn perform<F>(&self, job: F) -> Result<(), LaneError>
    where
        F: FnOnce(&RefCell<ContextState>) + Send + 'static,
    {
        self.lane.submit(job)
    }

    /// Runs `job` on this context's queue and waits for its result.
    pub(crate) fn perform_and_wait<F, R>(&self, job: F) -> Result<R, LaneError>
    where
        F: FnOnce(&RefCell<ContextState>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.lane.submit_and_wait(job)
    }
}

impl Debug for ContextHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("lane", &self.lane.name())
            .finish()
    }
}
