//! Change merge listener: keeps the interactive context current.
//!
//! # Responsibility
//! - React to commits of any context other than the interactive one.
//! - Merge those changes into the interactive context on its lane, then
//!   save it so the changes reach the physical store.
//!
//! # Invariants
//! - Events originating from the interactive context are ignored, which
//!   bounds every cascade to one hop.
//! - The hand-off blocks the committing lane until the interactive merge
//!   and its save are done.

use crate::context::ContextHandle;
use crate::events::{CommitBus, CommitEvent, SubscriptionId};
use crate::save::{SaveCoordinator, SaveOutcome};
use log::{debug, error};

pub(crate) struct MergeListener {
    interactive: ContextHandle,
    saver: SaveCoordinator,
}

impl MergeListener {
    /// Subscribes a listener for `interactive` on `bus`.
    pub(crate) fn install(
        bus: &CommitBus,
        interactive: ContextHandle,
        saver: SaveCoordinator,
    ) -> SubscriptionId {
        let listener = Self { interactive, saver };
        bus.subscribe(move |event| listener.on_commit(event))
    }

    fn on_commit(&self, event: &CommitEvent) {
        if event.origin() == self.interactive.id() {
            return;
        }

        let changes = event.shared_changes();
        let saver = self.saver.clone();
        let handed_off = self.interactive.perform_and_wait(move |cell| {
            let summary = cell.borrow_mut().merge_changes(&changes);
            let outcome = saver.save_on_lane(cell);
            let registry_size = cell.borrow().registered_count();
            (summary, outcome, registry_size)
        });

        match handed_off {
            Ok((summary, outcome, registry_size)) => debug!(
                "event=merge module=merge status=ok origin={} registered={} refreshed={} evicted={} registry_size={} saved={}",
                event.origin_kind().as_str(),
                summary.registered,
                summary.refreshed,
                summary.evicted,
                registry_size,
                matches!(outcome, SaveOutcome::Committed { .. })
            ),
            Err(err) => error!(
                "event=merge module=merge status=error origin={} error_code=interactive_lane_unavailable error={}",
                event.origin_kind().as_str(),
                err
            ),
        }
    }
}
