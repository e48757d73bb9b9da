//! Save coordinator: commit pipeline and commit event broadcast.
//!
//! # Responsibility
//! - Run "pending changes? persist them" on the context's own queue.
//! - Broadcast exactly one `CommitEvent` per successful save.
//!
//! # Invariants
//! - Saves never run inline on a foreign lane; they are queued behind the
//!   context's earlier mutations.
//! - An empty save publishes nothing and touches no store.
//! - Events are published after the context state is released.
//! - Save failures are logged and dropped; they are never retried.

use crate::context::lane::LaneError;
use crate::context::state::ContextState;
use crate::context::ContextHandle;
use crate::events::{CommitBus, CommitEvent};
use crate::model::schema::ValidationError;
use crate::repo::object_repo::RepoError;
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Commit failure for one save attempt.
#[derive(Debug)]
pub enum SaveError {
    /// A pending object violates the model.
    Validation(ValidationError),
    /// The physical store rejected the change set.
    Store(RepoError),
    /// The parent context could not take the change set.
    Upstream(LaneError),
}

impl Display for SaveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Upstream(err) => write!(f, "parent context unavailable: {err}"),
        }
    }
}

impl Error for SaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Upstream(err) => Some(err),
        }
    }
}

impl From<ValidationError> for SaveError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for SaveError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

impl From<LaneError> for SaveError {
    fn from(value: LaneError) -> Self {
        Self::Upstream(value)
    }
}

/// Result of one save attempt, for callers that wait on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    NoChanges,
    Committed { changes: usize },
    Failed,
}

/// Schedules and runs saves; owns the publishing side of the commit bus.
#[derive(Clone)]
pub struct SaveCoordinator {
    bus: Arc<CommitBus>,
}

impl SaveCoordinator {
    pub(crate) fn new(bus: Arc<CommitBus>) -> Self {
        Self { bus }
    }

    /// Queues a save on `context`'s own queue and returns immediately.
    pub fn save(&self, context: &ContextHandle) {
        let saver = self.clone();
        if let Err(err) = context.perform(move |cell| {
            saver.save_on_lane(cell);
        }) {
            error!(
                "event=save module=save status=error context={} error_code=lane_closed error={}",
                context.kind().as_str(),
                err
            );
        }
    }

    /// Queues a save on `context` and waits for its outcome.
    pub fn save_and_wait(&self, context: &ContextHandle) -> SaveOutcome {
        let saver = self.clone();
        match context.perform_and_wait(move |cell| saver.save_on_lane(cell)) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    "event=save module=save status=error context={} error_code=lane_closed error={}",
                    context.kind().as_str(),
                    err
                );
                SaveOutcome::Failed
            }
        }
    }

    /// Runs both commit stages; must be called on the context's own lane.
    pub(crate) fn save_on_lane(&self, cell: &RefCell<ContextState>) -> SaveOutcome {
        let started_at = Instant::now();
        let (origin, origin_kind, committed, pending_kept) = {
            let mut state = cell.borrow_mut();
            let committed = state.commit();
            (state.id(), state.kind(), committed, state.has_changes())
        };

        match committed {
            Ok(None) => {
                debug!(
                    "event=save module=save status=skip context={} reason=no_changes",
                    origin_kind.as_str()
                );
                SaveOutcome::NoChanges
            }
            Ok(Some(changes)) => {
                let count = changes.len();
                info!(
                    "event=save module=save status=ok context={} changes={} held_back={} duration_ms={}",
                    origin_kind.as_str(),
                    count,
                    pending_kept,
                    started_at.elapsed().as_millis()
                );
                let listeners = self
                    .bus
                    .publish(&CommitEvent::new(origin, origin_kind, changes));
                debug!(
                    "event=commit_broadcast module=save status=ok context={} listeners={}",
                    origin_kind.as_str(),
                    listeners
                );
                SaveOutcome::Committed { changes: count }
            }
            Err(err) => {
                warn!(
                    "event=save module=save status=error context={} duration_ms={} pending_kept={} error_code=save_failed error={}",
                    origin_kind.as_str(),
                    started_at.elapsed().as_millis(),
                    pending_kept,
                    err
                );
                SaveOutcome::Failed
            }
        }
    }
}
