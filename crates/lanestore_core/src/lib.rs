//! Core of lanestore: an object persistence stack with an interactive
//! context, a background worker context, and change propagation between them.
//! This crate is the single source of truth for persistence invariants.

pub mod context;
pub mod db;
pub mod events;
pub mod location;
pub mod logging;
mod merge;
pub mod model;
pub mod query;
pub mod repo;
pub mod save;
pub mod stack;

pub use context::lane::{current_lane, LaneError, LaneId};
pub use context::router::LaneRouter;
pub use context::{change_set::ChangeSet, ContextHandle, ContextId, ContextKind};
pub use db::{open_store, DbError, DbResult, StoreLocation, StoreOptions};
pub use events::{CommitBus, CommitEvent, SubscriptionId};
pub use location::{
    DirectoryLocationResolver, InMemoryLocationResolver, LocationError, LocationResolver,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use model::object::{Attributes, Entity, ManagedObject, ObjectId};
pub use model::provider::{JsonFileSchemaProvider, SchemaError, SchemaProvider, StaticSchemaProvider};
pub use model::schema::{
    AttributeDescription, AttributeKind, EntityDescription, Model, ValidationError,
};
pub use query::{FetchError, Filter};
pub use repo::object_repo::{ObjectRepository, RepoError, RepoResult, SqliteObjectRepository};
pub use save::{SaveCoordinator, SaveError, SaveOutcome};
pub use stack::{PersistenceStack, StackError, StackResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
