//! Lane router: picks the context a caller's operation runs against.

use super::lane::{current_lane, LaneId};
use super::ContextHandle;

/// Maps a calling lane to its context.
///
/// The interactive lane gets the interactive context; every other lane,
/// and every thread that is not a lane, gets the worker context.
#[derive(Debug, Clone)]
pub struct LaneRouter {
    interactive: ContextHandle,
    worker: ContextHandle,
}

impl LaneRouter {
    pub(crate) fn new(interactive: ContextHandle, worker: ContextHandle) -> Self {
        Self {
            interactive,
            worker,
        }
    }

    pub fn route(&self, calling_lane: Option<LaneId>) -> &ContextHandle {
        if calling_lane == Some(self.interactive.lane_id()) {
            &self.interactive
        } else {
            &self.worker
        }
    }

    /// Routes the calling thread.
    pub fn route_current(&self) -> &ContextHandle {
        self.route(current_lane())
    }

    pub fn interactive(&self) -> &ContextHandle {
        &self.interactive
    }

    pub fn worker(&self) -> &ContextHandle {
        &self.worker
    }
}
