//! Execution lanes: one OS thread per context, owning that context's state.
//!
//! # Responsibility
//! - Run submitted jobs strictly in submission order (FIFO).
//! - Give every lane an explicit identity token for routing decisions.
//! - Offer a blocking hand-off that is re-entrant on the lane itself.
//!
//! # Invariants
//! - Lane state is only ever touched from the lane thread.
//! - A blocking wait issued from the target lane runs inline, never
//!   through the queue, so a lane cannot deadlock on itself.
//! - A panicking job is contained; later jobs still run.

use log::{debug, error, warn};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static NEXT_LANE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_LANE: Cell<Option<LaneId>> = const { Cell::new(None) };
    static LANE_STATE: RefCell<Option<Rc<dyn Any>>> = const { RefCell::new(None) };
}

/// Identity token of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneId(u64);

impl LaneId {
    fn next() -> Self {
        Self(NEXT_LANE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns whether the calling thread is this lane.
    pub fn is_current(self) -> bool {
        current_lane() == Some(self)
    }
}

impl Display for LaneId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "lane-{}", self.0)
    }
}

/// Returns the lane the calling thread runs, `None` for non-lane threads.
pub fn current_lane() -> Option<LaneId> {
    CURRENT_LANE.with(Cell::get)
}

/// Lane submission failure.
#[derive(Debug)]
pub enum LaneError {
    /// The lane thread has stopped; the job was dropped.
    Closed { lane: String },
    /// The job was accepted but never produced a result (it panicked).
    Interrupted { lane: String },
    Spawn(std::io::Error),
}

impl Display for LaneError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed { lane } => write!(f, "lane `{lane}` is closed"),
            Self::Interrupted { lane } => write!(f, "job on lane `{lane}` did not complete"),
            Self::Spawn(err) => write!(f, "failed to spawn lane thread: {err}"),
        }
    }
}

impl Error for LaneError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

pub(crate) type Job<S> = Box<dyn FnOnce(&RefCell<S>) + Send>;

enum LaneMessage<S> {
    Run(Job<S>),
    Shutdown,
}

/// Cloneable submission handle for one lane.
pub(crate) struct LaneHandle<S> {
    id: LaneId,
    name: Arc<str>,
    sender: Sender<LaneMessage<S>>,
}

impl<S> Clone for LaneHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            sender: self.sender.clone(),
        }
    }
}

impl<S: 'static> LaneHandle<S> {
    pub(crate) fn id(&self) -> LaneId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `job` behind everything already submitted.
    pub(crate) fn submit<F>(&self, job: F) -> Result<(), LaneError>
    where
        F: FnOnce(&RefCell<S>) + Send + 'static,
    {
        self.sender
            .send(LaneMessage::Run(Box::new(job)))
            .map_err(|_| LaneError::Closed {
                lane: self.name.to_string(),
            })
    }

    /// Runs `job` on this lane and blocks until it returns.
    ///
    /// Called from the lane itself, the job runs inline.
    pub(crate) fn submit_and_wait<F, R>(&self, job: F) -> Result<R, LaneError>
    where
        F: FnOnce(&RefCell<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.id.is_current() {
            return with_lane_state(job).ok_or_else(|| LaneError::Closed {
                lane: self.name.to_string(),
            });
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.submit(move |state| {
            let _ = reply_tx.send(job(state));
        })?;
        reply_rx.recv().map_err(|_| LaneError::Interrupted {
            lane: self.name.to_string(),
        })
    }

    /// Asks the lane to stop once the jobs queued before this call ran.
    pub(crate) fn request_shutdown(&self) {
        if self.sender.send(LaneMessage::Shutdown).is_err() {
            debug!(
                "event=lane_shutdown module=lane status=skip lane={} reason=already_closed",
                self.name
            );
        }
    }
}

/// Owner of a running lane thread.
pub(crate) struct LaneThread<S> {
    handle: LaneHandle<S>,
    join: Option<JoinHandle<()>>,
}

impl<S: 'static> LaneThread<S> {
    pub(crate) fn handle(&self) -> &LaneHandle<S> {
        &self.handle
    }

    /// Requests shutdown and waits for the thread to drain and exit.
    ///
    /// Skips the join when called from the lane itself.
    pub(crate) fn shutdown(mut self) {
        self.handle.request_shutdown();
        let Some(join) = self.join.take() else {
            return;
        };
        if self.handle.id.is_current() {
            warn!(
                "event=lane_shutdown module=lane status=skip lane={} reason=dropped_on_own_lane",
                self.handle.name
            );
            return;
        }
        if join.join().is_err() {
            error!(
                "event=lane_shutdown module=lane status=error lane={} error_code=lane_thread_panicked",
                self.handle.name
            );
        }
    }

    /// Requests shutdown without waiting; the thread exits after draining.
    pub(crate) fn detach(mut self) {
        self.handle.request_shutdown();
        self.join.take();
    }
}

/// Spawns a lane thread whose state is built by `init` on that thread.
pub(crate) fn spawn_lane<S, F>(name: &str, init: F) -> Result<LaneThread<S>, LaneError>
where
    S: 'static,
    F: FnOnce() -> S + Send + 'static,
{
    let id = LaneId::next();
    let name: Arc<str> = Arc::from(name);
    let (sender, receiver) = mpsc::channel::<LaneMessage<S>>();
    let thread_name = name.to_string();
    let lane_name = Arc::clone(&name);

    let join = thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            CURRENT_LANE.with(|lane| lane.set(Some(id)));
            let state: Rc<RefCell<S>> = Rc::new(RefCell::new(init()));
            let shared: Rc<dyn Any> = state.clone();
            LANE_STATE.with(|slot| *slot.borrow_mut() = Some(shared));
            debug!("event=lane_start module=lane status=ok lane={lane_name} id={id}");

            while let Ok(message) = receiver.recv() {
                match message {
                    LaneMessage::Run(job) => {
                        if panic::catch_unwind(AssertUnwindSafe(|| job(&state))).is_err() {
                            error!(
                                "event=lane_job module=lane status=error lane={lane_name} error_code=job_panicked"
                            );
                        }
                    }
                    LaneMessage::Shutdown => break,
                }
            }

            LANE_STATE.with(|slot| slot.borrow_mut().take());
            debug!("event=lane_stop module=lane status=ok lane={lane_name} id={id}");
        })
        .map_err(LaneError::Spawn)?;

    Ok(LaneThread {
        handle: LaneHandle { id, name, sender },
        join: Some(join),
    })
}

fn with_lane_state<S: 'static, R>(job: impl FnOnce(&RefCell<S>) -> R) -> Option<R> {
    let shared = LANE_STATE.with(|slot| slot.borrow().clone())?;
    let state = shared.downcast::<RefCell<S>>().ok()?;
    Some(job(&state))
}
