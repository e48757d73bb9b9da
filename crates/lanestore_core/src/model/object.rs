//! Managed object representation.
//!
//! # Responsibility
//! - Define the in-memory record every context works with.
//! - Define the `Entity` cast used by typed lifecycle operations.
//!
//! # Invariants
//! - `id` is stable and never reused for another object.
//! - `entity` never changes after instantiation.

use serde_json::{Map, Value};
use uuid::Uuid;

/// Stable identity of one managed object across all contexts.
pub type ObjectId = Uuid;

/// Attribute storage keyed by attribute name.
pub type Attributes = Map<String, Value>;

/// In-memory representation of one persisted record.
///
/// Each context owns its own copy; two contexts may hold independent
/// copies of the same row at the same time.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedObject {
    id: ObjectId,
    entity: String,
    attributes: Attributes,
}

impl ManagedObject {
    /// Creates a new object with a generated stable ID.
    pub fn new(entity: impl Into<String>, attributes: Attributes) -> Self {
        Self::with_id(Uuid::new_v4(), entity, attributes)
    }

    /// Creates an object with a caller-provided stable ID.
    ///
    /// Used when materializing rows that already have an identity.
    pub fn with_id(id: ObjectId, entity: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id,
            entity: entity.into(),
            attributes,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Entity name this object belongs to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Returns a text attribute, `None` when absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Returns an integer attribute, `None` when absent or not an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(Value::as_bool)
    }

    /// Sets one attribute, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Removes one attribute and returns its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub(crate) fn replace_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }
}

/// Typed view over a managed object.
///
/// `from_object` is the cast: it returns `None` when the object does not
/// belong to the implementing type, which lifecycle operations report as a
/// plain "nothing" result.
pub trait Entity: Sized + Send + 'static {
    /// Builds the typed value from an object, or `None` on type mismatch.
    fn from_object(object: &ManagedObject) -> Option<Self>;

    /// Writes the typed value back into the object's attributes.
    ///
    /// Identity and entity name of `object` must be left untouched.
    fn write_to(&self, object: &mut ManagedObject);
}

/// Untyped access: every object casts to itself.
impl Entity for ManagedObject {
    fn from_object(object: &ManagedObject) -> Option<Self> {
        Some(object.clone())
    }

    fn write_to(&self, object: &mut ManagedObject) {
        object.replace_attributes(self.attributes.clone());
    }
}
