//! Store coordinator: SQLite bootstrap, table migrations, model reconciliation.
//!
//! # Responsibility
//! - Open and configure the SQLite connection behind the interactive context.
//! - Apply internal table migrations in deterministic order.
//! - Reconcile the model stored with the data against the current model.
//!
//! # Invariants
//! - Table version is tracked via `PRAGMA user_version`.
//! - No object data is read or written before migrations and model
//!   reconciliation succeed.
//! - Any error returned here is fatal to stack initialization.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod migrations;
mod model_mapping;
mod open;

pub use model_mapping::{stored_model, MappingPlan, ModelReconciliation};
pub use open::open_store;

pub type DbResult<T> = Result<T, DbError>;

/// Where the physical store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

impl StoreLocation {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::InMemory => "memory",
        }
    }
}

/// Options applied when adding the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Allow opening a store whose model differs from the current one.
    pub migrate_automatically: bool,
    /// Derive the model mapping instead of requiring an explicit one.
    pub infer_mapping: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            migrate_automatically: true,
            infer_mapping: true,
        }
    }
}

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The stored model differs and cannot be migrated with the given options.
    IncompatibleModel(String),
    CorruptMetadata(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::IncompatibleModel(reason) => {
                write!(f, "store model is incompatible with current model: {reason}")
            }
            Self::CorruptMetadata(reason) => write!(f, "store metadata is corrupt: {reason}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
