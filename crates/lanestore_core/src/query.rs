//! Caller-supplied filters and fetch failures.
//!
//! # Responsibility
//! - Wrap opaque caller predicates so they can cross lanes.
//! - Describe why a fetch produced nothing.
//!
//! # Invariants
//! - Filters are passed to the query path unmodified.

use crate::context::lane::LaneError;
use crate::model::object::ManagedObject;
use crate::repo::object_repo::RepoError;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

type Predicate = dyn Fn(&ManagedObject) -> bool + Send + Sync;

/// Opaque predicate over managed objects.
#[derive(Clone)]
pub struct Filter {
    description: String,
    predicate: Arc<Predicate>,
}

impl Filter {
    /// Wraps an arbitrary predicate; `description` is only used in logs.
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ManagedObject) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Matches objects whose attribute `key` equals `value`.
    pub fn attribute_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        let description = format!("{key} == {value}");
        Self::new(description, move |object| object.get(&key) == Some(&value))
    }

    /// Matches objects accepted by both filters.
    pub fn and(self, other: Filter) -> Self {
        let description = format!("({}) && ({})", self.description, other.description);
        Self::new(description, move |object| {
            self.matches(object) && other.matches(object)
        })
    }

    pub fn matches(&self, object: &ManagedObject) -> bool {
        (self.predicate)(object)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Debug for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Filter").field(&self.description).finish()
    }
}

/// Fetch failure; callers only ever observe it as an absent result.
#[derive(Debug)]
pub enum FetchError {
    UnknownEntity(String),
    Store(RepoError),
    Upstream(LaneError),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(name) => write!(f, "unknown entity `{name}`"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Upstream(err) => write!(f, "parent context unavailable: {err}"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownEntity(_) => None,
            Self::Store(err) => Some(err),
            Self::Upstream(err) => Some(err),
        }
    }
}

impl From<RepoError> for FetchError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

impl From<LaneError> for FetchError {
    fn from(value: LaneError) -> Self {
        Self::Upstream(value)
    }
}
