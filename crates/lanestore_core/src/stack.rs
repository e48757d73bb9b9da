//! Persistence stack facade: object lifecycle API over two contexts.
//!
//! # Responsibility
//! - Build the store, the interactive and worker contexts, and wire the
//!   merge listener onto this stack's commit bus.
//! - Route every lifecycle operation to the caller's context and run it on
//!   that context's queue.
//!
//! # Invariants
//! - Construction either yields a fully wired stack or a fatal `StackError`.
//! - Lifecycle operations never return errors; failures are logged and
//!   surface as `None` or as a no-op.
//! - Completion callbacks run on the routed context's lane, after the
//!   context state is released.

use crate::context::lane::{spawn_lane, LaneError, LaneId, LaneThread};
use crate::context::router::LaneRouter;
use crate::context::state::ContextState;
use crate::context::{ContextHandle, ContextId, ContextKind};
use crate::db::{open_store, DbError, StoreLocation, StoreOptions};
use crate::events::{CommitBus, CommitEvent, SubscriptionId};
use crate::location::{LocationError, LocationResolver};
use crate::merge::MergeListener;
use crate::model::object::{Entity, ManagedObject, ObjectId};
use crate::model::provider::{SchemaError, SchemaProvider};
use crate::model::schema::Model;
use crate::query::Filter;
use crate::repo::object_repo::{ObjectRepository, SqliteObjectRepository};
use crate::save::{SaveCoordinator, SaveOutcome};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub const INTERACTIVE_LANE_NAME: &str = "lanestore-interactive";
pub const WORKER_LANE_NAME: &str = "lanestore-worker";

pub type StackResult<T> = Result<T, StackError>;

/// Fatal stack initialization failure.
#[derive(Debug)]
pub enum StackError {
    Schema(SchemaError),
    Location(LocationError),
    Db(DbError),
    Lane(LaneError),
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema(err) => write!(f, "model unavailable: {err}"),
            Self::Location(err) => write!(f, "store location unavailable: {err}"),
            Self::Db(err) => write!(f, "store unavailable: {err}"),
            Self::Lane(err) => write!(f, "context lane unavailable: {err}"),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Location(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Lane(err) => Some(err),
        }
    }
}

impl From<SchemaError> for StackError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<LocationError> for StackError {
    fn from(value: LocationError) -> Self {
        Self::Location(value)
    }
}

impl From<DbError> for StackError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<LaneError> for StackError {
    fn from(value: LaneError) -> Self {
        Self::Lane(value)
    }
}

/// One persistence stack: a store, an interactive context and a worker.
pub struct PersistenceStack {
    model: Arc<Model>,
    router: LaneRouter,
    bus: Arc<CommitBus>,
    saver: SaveCoordinator,
    merge_subscription: Option<SubscriptionId>,
    worker_lane: Option<LaneThread<ContextState>>,
    interactive_lane: Option<LaneThread<ContextState>>,
}

impl PersistenceStack {
    /// Loads the model, resolves the store file and opens the stack.
    ///
    /// # Errors
    /// Every error is fatal; the caller must abort startup.
    pub fn bootstrap(
        schema: &dyn SchemaProvider,
        model_location: &str,
        resolver: &dyn LocationResolver,
        file_name: &str,
        options: StoreOptions,
    ) -> StackResult<Self> {
        let model = schema.load_model(model_location).map_err(|err| {
            error!(
                "event=stack_init module=stack status=error stage=model error={}",
                err
            );
            err
        })?;
        if let Err(reason) = model.check() {
            error!("event=stack_init module=stack status=error stage=model error={reason}");
            return Err(StackError::Schema(SchemaError::Invalid {
                location: model_location.to_string(),
                reason,
            }));
        }
        let location = resolver.resolve(file_name).map_err(|err| {
            error!(
                "event=stack_init module=stack status=error stage=location error={}",
                err
            );
            err
        })?;
        Self::open(model, &location, options)
    }

    /// Opens the SQLite store at `location` and starts both contexts.
    pub fn open(model: Model, location: &StoreLocation, options: StoreOptions) -> StackResult<Self> {
        let conn = open_store(&model, location, options)?;
        Self::with_repository(model, Box::new(SqliteObjectRepository::new(conn)))
    }

    /// Starts both contexts over an already opened repository.
    pub fn with_repository(
        model: Model,
        store: Box<dyn ObjectRepository + Send>,
    ) -> StackResult<Self> {
        let model = Arc::new(model);
        let bus = Arc::new(CommitBus::new());
        let saver = SaveCoordinator::new(Arc::clone(&bus));

        let interactive_id = ContextId::next();
        let interactive_lane = {
            let model = Arc::clone(&model);
            spawn_lane(INTERACTIVE_LANE_NAME, move || {
                ContextState::root(interactive_id, model, store)
            })?
        };
        let interactive = ContextHandle::new(
            interactive_id,
            ContextKind::Interactive,
            interactive_lane.handle().clone(),
        );

        let worker_id = ContextId::next();
        let spawned = {
            let model = Arc::clone(&model);
            let parent = interactive.clone();
            spawn_lane(WORKER_LANE_NAME, move || {
                ContextState::child(worker_id, model, parent)
            })
        };
        let worker_lane = match spawned {
            Ok(lane) => lane,
            Err(err) => {
                error!(
                    "event=stack_init module=stack status=error stage=worker_lane error={}",
                    err
                );
                interactive_lane.shutdown();
                return Err(err.into());
            }
        };
        let worker = ContextHandle::new(
            worker_id,
            ContextKind::Worker,
            worker_lane.handle().clone(),
        );

        let merge_subscription = MergeListener::install(&bus, interactive.clone(), saver.clone());
        info!(
            "event=stack_init module=stack status=ok entities={} interactive={} worker={}",
            model.entities().len(),
            interactive.lane_id(),
            worker.lane_id()
        );

        Ok(Self {
            model,
            router: LaneRouter::new(interactive, worker),
            bus,
            saver,
            merge_subscription: Some(merge_subscription),
            worker_lane: Some(worker_lane),
            interactive_lane: Some(interactive_lane),
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Context an operation issued from `calling_lane` runs against.
    pub fn context_for(&self, calling_lane: Option<LaneId>) -> &ContextHandle {
        self.router.route(calling_lane)
    }

    /// Context an operation issued from the calling thread runs against.
    pub fn current_context(&self) -> &ContextHandle {
        self.router.route_current()
    }

    pub fn interactive_context(&self) -> &ContextHandle {
        self.router.interactive()
    }

    pub fn worker_context(&self) -> &ContextHandle {
        self.router.worker()
    }

    pub fn interactive_lane(&self) -> LaneId {
        self.router.interactive().lane_id()
    }

    /// Creates, configures and saves one object; blocks until done.
    ///
    /// Returns `None` for an unknown entity or when the new object does not
    /// cast to `T`; nothing is inserted then. A failed save still returns the
    /// configured value, which stays pending in the context.
    pub fn create<T, F>(&self, entity_name: &str, configure: F) -> Option<T>
    where
        T: Entity,
        F: FnOnce(&mut T) + Send + 'static,
    {
        let context = self.router.route_current();
        let entity = entity_name.to_string();
        let saver = self.saver.clone();
        let kind = context.kind();

        let created = context.perform_and_wait(move |cell| {
            let instantiated = cell.borrow().instantiate(&entity);
            let mut object = match instantiated {
                Ok(object) => object,
                Err(err) => {
                    warn!(
                        "event=create module=stack status=error context={} error_code=unknown_entity error={}",
                        kind.as_str(),
                        err
                    );
                    return None;
                }
            };
            let Some(mut typed) = T::from_object(&object) else {
                warn!(
                    "event=create module=stack status=error context={} entity={} error_code=type_mismatch",
                    kind.as_str(),
                    entity
                );
                return None;
            };

            configure(&mut typed);
            typed.write_to(&mut object);
            cell.borrow_mut().insert(object);
            saver.save_on_lane(cell);
            Some(typed)
        });

        match created {
            Ok(created) => created,
            Err(err) => {
                error!(
                    "event=create module=stack status=error context={} error_code=lane_unavailable error={}",
                    kind.as_str(),
                    err
                );
                None
            }
        }
    }

    /// Delivers every object of `entity_name` in store order, or `None` on
    /// query failure or when any object does not cast to `T`.
    pub fn fetch_all<T, F>(&self, entity_name: &str, completion: F)
    where
        T: Entity,
        F: FnOnce(Option<Vec<T>>) + Send + 'static,
    {
        let context = self.router.route_current();
        let entity = entity_name.to_string();
        let kind = context.kind();
        self.enqueue(context, "fetch_all", move |cell| {
            let fetched = cell.borrow_mut().fetch(&entity, None);
            let typed = match fetched {
                Ok(objects) => cast_all::<T>(&objects),
                Err(err) => {
                    warn!(
                        "event=fetch module=stack status=error context={} op=fetch_all error={}",
                        kind.as_str(),
                        err
                    );
                    None
                }
            };
            if typed.is_none() {
                debug!(
                    "event=fetch module=stack status=skip context={} op=fetch_all entity={} reason=no_result",
                    kind.as_str(),
                    entity
                );
            }
            completion(typed);
        });
    }

    /// Delivers the first object of `entity_name` matching `filter`.
    pub fn fetch_one<T, F>(&self, entity_name: &str, filter: Filter, completion: F)
    where
        T: Entity,
        F: FnOnce(Option<T>) + Send + 'static,
    {
        let context = self.router.route_current();
        let entity = entity_name.to_string();
        let kind = context.kind();
        self.enqueue(context, "fetch_one", move |cell| {
            let fetched = cell.borrow_mut().fetch(&entity, Some(&filter));
            let first = match fetched {
                Ok(objects) => objects.first().and_then(T::from_object),
                Err(err) => {
                    warn!(
                        "event=fetch module=stack status=error context={} op=fetch_one filter={} error={}",
                        kind.as_str(),
                        filter.description(),
                        err
                    );
                    None
                }
            };
            completion(first);
        });
    }

    /// Delivers the object with identity `id`, if it exists and casts to `T`.
    pub fn fetch_by_id<T, F>(&self, id: ObjectId, completion: F)
    where
        T: Entity,
        F: FnOnce(Option<T>) + Send + 'static,
    {
        let context = self.router.route_current();
        let kind = context.kind();
        self.enqueue(context, "fetch_by_id", move |cell| {
            let looked_up = cell.borrow_mut().lookup(id);
            let found = match looked_up {
                Ok(object) => object.as_ref().and_then(T::from_object),
                Err(err) => {
                    warn!(
                        "event=fetch module=stack status=error context={} op=fetch_by_id error={}",
                        kind.as_str(),
                        err
                    );
                    None
                }
            };
            completion(found);
        });
    }

    /// Deletes every object of `entity_name`, then saves.
    pub fn delete_all(&self, entity_name: &str) {
        let context = self.router.route_current();
        let entity = entity_name.to_string();
        let saver = self.saver.clone();
        let kind = context.kind();
        self.enqueue(context, "delete_all", move |cell| {
            let fetched = cell.borrow_mut().fetch(&entity, None);
            let objects = match fetched {
                Ok(objects) => objects,
                Err(err) => {
                    warn!(
                        "event=delete_all module=stack status=error context={} error={}",
                        kind.as_str(),
                        err
                    );
                    return;
                }
            };
            {
                let mut state = cell.borrow_mut();
                for object in &objects {
                    state.delete(object);
                }
            }
            debug!(
                "event=delete_all module=stack status=ok context={} deleted={}",
                kind.as_str(),
                objects.len()
            );
            saver.save_on_lane(cell);
        });
    }

    /// Applies `configure` to every object matching `filter`, then saves.
    ///
    /// Nothing is updated when any match does not cast to `T`.
    pub fn update_matching<T, F>(&self, entity_name: &str, filter: Filter, mut configure: F)
    where
        T: Entity,
        F: FnMut(&mut T) + Send + 'static,
    {
        let context = self.router.route_current();
        let entity = entity_name.to_string();
        let saver = self.saver.clone();
        let kind = context.kind();
        self.enqueue(context, "update_matching", move |cell| {
            let fetched = cell.borrow_mut().fetch(&entity, Some(&filter));
            let objects = match fetched {
                Ok(objects) => objects,
                Err(err) => {
                    warn!(
                        "event=update module=stack status=error context={} error={}",
                        kind.as_str(),
                        err
                    );
                    return;
                }
            };
            let Some(typed) = cast_all::<T>(&objects) else {
                warn!(
                    "event=update module=stack status=error context={} entity={} error_code=type_mismatch",
                    kind.as_str(),
                    entity
                );
                return;
            };

            let mut updated = Vec::with_capacity(objects.len());
            for (mut object, mut value) in objects.into_iter().zip(typed) {
                configure(&mut value);
                value.write_to(&mut object);
                updated.push(object);
            }
            let count = updated.len();
            {
                let mut state = cell.borrow_mut();
                for object in updated {
                    state.update(object);
                }
            }
            debug!(
                "event=update module=stack status=ok context={} updated={}",
                kind.as_str(),
                count
            );
            if count > 0 {
                saver.save_on_lane(cell);
            }
        });
    }

    /// Queues a save of the caller's context.
    pub fn save(&self) {
        self.saver.save(self.router.route_current());
    }

    /// Saves the caller's context and waits for the outcome.
    pub fn save_and_wait(&self) -> SaveOutcome {
        self.saver.save_and_wait(self.router.route_current())
    }

    /// Blocks until everything queued on the caller's context before this
    /// call has run. A no-op when called from that context's own lane.
    pub fn wait_for_pending_work(&self) {
        let context = self.router.route_current();
        if let Err(err) = context.perform_and_wait(|_| ()) {
            error!(
                "event=barrier module=stack status=error context={} error={}",
                context.kind().as_str(),
                err
            );
        }
    }

    /// Runs `job` on the interactive lane and waits for its result.
    pub fn run_on_interactive_lane<F, R>(&self, job: F) -> Result<R, LaneError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.router.interactive().perform_and_wait(move |_| job())
    }

    /// Observes every commit event of this stack.
    ///
    /// Listeners run on the committing lane; they must not block on it.
    pub fn subscribe_commits<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&CommitEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub fn unsubscribe_commits(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    fn enqueue<F>(&self, context: &ContextHandle, op: &'static str, job: F)
    where
        F: FnOnce(&std::cell::RefCell<ContextState>) + Send + 'static,
    {
        if let Err(err) = context.perform(job) {
            error!(
                "event={op} module=stack status=error context={} error_code=lane_unavailable error={}",
                context.kind().as_str(),
                err
            );
        }
    }
}

impl Drop for PersistenceStack {
    fn drop(&mut self) {
        let on_own_lane = self.router.interactive().is_current() || self.router.worker().is_current();
        let stop = |lane: LaneThread<ContextState>| {
            if on_own_lane {
                lane.detach();
            } else {
                lane.shutdown();
            }
        };

        if let Some(worker) = self.worker_lane.take() {
            stop(worker);
        }
        if let Some(id) = self.merge_subscription.take() {
            self.bus.unsubscribe(id);
        }
        self.bus.clear();
        if let Some(interactive) = self.interactive_lane.take() {
            stop(interactive);
        }
        info!("event=stack_close module=stack status=ok joined={}", !on_own_lane);
    }
}

fn cast_all<T: Entity>(objects: &[ManagedObject]) -> Option<Vec<T>> {
    objects.iter().map(T::from_object).collect()
}
