//! Object model: managed objects, entity descriptions, schema providers.
//!
//! # Responsibility
//! - Define the records contexts operate on.
//! - Define which entity names are valid and what their attributes look like.
//!
//! # Invariants
//! - Every managed object is identified by a stable `ObjectId`.
//! - Objects are validated against the model before they are committed.

pub mod object;
pub mod provider;
pub mod schema;
