//! Store location resolution.
//!
//! # Responsibility
//! - Turn a caller-provided store file name into a `StoreLocation`.
//!
//! # Invariants
//! - File names never escape the resolver's directory.

use crate::db::StoreLocation;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum LocationError {
    InvalidFileName(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for LocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFileName(name) => write!(f, "invalid store file name `{name}`"),
            Self::Io { path, source } => {
                write!(f, "cannot prepare store directory `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for LocationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidFileName(_) => None,
            Self::Io { source, .. } => Some(source),
        }
    }
}

/// Supplies the location of the persisted store for a file name.
pub trait LocationResolver {
    fn resolve(&self, file_name: &str) -> Result<StoreLocation, LocationError>;
}

/// Places store files inside one directory, creating it on demand.
#[derive(Debug, Clone)]
pub struct DirectoryLocationResolver {
    base_dir: PathBuf,
}

impl DirectoryLocationResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl LocationResolver for DirectoryLocationResolver {
    fn resolve(&self, file_name: &str) -> Result<StoreLocation, LocationError> {
        let trimmed = file_name.trim();
        let is_plain_name = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed.contains(['/', '\\']);
        if !is_plain_name {
            return Err(LocationError::InvalidFileName(file_name.to_string()));
        }

        std::fs::create_dir_all(&self.base_dir).map_err(|source| {
            error!(
                "event=store_locate module=location status=error dir={} error={}",
                self.base_dir.display(),
                source
            );
            LocationError::Io {
                path: self.base_dir.clone(),
                source,
            }
        })?;

        let path = self.base_dir.join(trimmed);
        info!(
            "event=store_locate module=location status=ok path={}",
            path.display()
        );
        Ok(StoreLocation::File(path))
    }
}

/// Ignores the file name and keeps the store in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryLocationResolver;

impl LocationResolver for InMemoryLocationResolver {
    fn resolve(&self, _file_name: &str) -> Result<StoreLocation, LocationError> {
        Ok(StoreLocation::InMemory)
    }
}
