//! Repository layer over the physical store.
//!
//! # Responsibility
//! - Keep SQL details inside the persistence boundary.
//! - Give the interactive context a replaceable storage seam.
//!
//! # Invariants
//! - Only the interactive context owns a repository.

pub mod object_repo;
