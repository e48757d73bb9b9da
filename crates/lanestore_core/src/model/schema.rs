//! Entity model definitions and object validation.
//!
//! # Responsibility
//! - Describe the valid entity names and their typed attributes.
//! - Instantiate new objects with model defaults.
//! - Validate objects before any context commits them.
//!
//! # Invariants
//! - Entity names are unique within one model.
//! - Attribute names are unique within one entity.
//! - A default value, when present, matches its attribute kind.

use super::object::{Attributes, ManagedObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Value kind accepted by one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Unix epoch milliseconds.
    Timestamp,
}

impl AttributeKind {
    /// Returns whether `value` is acceptable for this kind.
    ///
    /// `null` is never accepted here; optionality is checked by the caller.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Text => value.is_string(),
            Self::Integer | Self::Timestamp => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
        }
    }
}

/// One typed attribute of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl AttributeDescription {
    pub fn required(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            optional: true,
            ..Self::required(name, kind)
        }
    }

    /// Sets the value new objects start with.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Definition of one entity (logical table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style attribute registration.
    pub fn attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn attribute_named(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    /// Returns the attribute map a freshly instantiated object starts with.
    pub fn default_attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .filter_map(|attribute| {
                attribute
                    .default
                    .clone()
                    .map(|value| (attribute.name.clone(), value))
            })
            .collect()
    }

    /// Validates one object against this entity.
    pub fn validate(&self, object: &ManagedObject) -> Result<(), ValidationError> {
        for (key, value) in object.attributes() {
            let attribute =
                self.attribute_named(key)
                    .ok_or_else(|| ValidationError::UnknownAttribute {
                        entity: self.name.clone(),
                        attribute: key.clone(),
                    })?;
            if value.is_null() {
                continue;
            }
            if !attribute.kind.accepts(value) {
                return Err(ValidationError::KindMismatch {
                    entity: self.name.clone(),
                    attribute: key.clone(),
                    expected: attribute.kind,
                });
            }
        }

        for attribute in self.attributes.iter().filter(|attribute| !attribute.optional) {
            let present = object
                .get(&attribute.name)
                .is_some_and(|value| !value.is_null());
            if !present {
                return Err(ValidationError::MissingAttribute {
                    entity: self.name.clone(),
                    attribute: attribute.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Full set of entities known to one store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    entities: Vec<EntityDescription>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style entity registration.
    pub fn entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entities(&self) -> &[EntityDescription] {
        &self.entities
    }

    pub fn entity_named(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    /// Instantiates a new object of `entity_name` with default attributes.
    pub fn instantiate(&self, entity_name: &str) -> Result<ManagedObject, ValidationError> {
        let entity = self
            .entity_named(entity_name)
            .ok_or_else(|| ValidationError::UnknownEntity(entity_name.to_string()))?;
        Ok(ManagedObject::new(
            entity.name.clone(),
            entity.default_attributes(),
        ))
    }

    /// Validates one object against its entity description.
    pub fn validate(&self, object: &ManagedObject) -> Result<(), ValidationError> {
        self.entity_named(object.entity())
            .ok_or_else(|| ValidationError::UnknownEntity(object.entity().to_string()))?
            .validate(object)
    }

    /// Checks structural consistency of the model itself.
    pub fn check(&self) -> Result<(), String> {
        for (index, entity) in self.entities.iter().enumerate() {
            if entity.name.trim().is_empty() {
                return Err("entity name cannot be empty".to_string());
            }
            if self.entities[..index]
                .iter()
                .any(|other| other.name == entity.name)
            {
                return Err(format!("duplicate entity `{}`", entity.name));
            }
            for (attr_index, attribute) in entity.attributes.iter().enumerate() {
                if entity.attributes[..attr_index]
                    .iter()
                    .any(|other| other.name == attribute.name)
                {
                    return Err(format!(
                        "duplicate attribute `{}.{}`",
                        entity.name, attribute.name
                    ));
                }
                if let Some(default) = &attribute.default {
                    if !attribute.kind.accepts(default) {
                        return Err(format!(
                            "default of `{}.{}` is not a {} value",
                            entity.name,
                            attribute.name,
                            attribute.kind.as_str()
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Object-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownEntity(String),
    UnknownAttribute {
        entity: String,
        attribute: String,
    },
    MissingAttribute {
        entity: String,
        attribute: String,
    },
    KindMismatch {
        entity: String,
        attribute: String,
        expected: AttributeKind,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(name) => write!(f, "unknown entity `{name}`"),
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "unknown attribute `{entity}.{attribute}`")
            }
            Self::MissingAttribute { entity, attribute } => {
                write!(f, "required attribute `{entity}.{attribute}` is missing")
            }
            Self::KindMismatch {
                entity,
                attribute,
                expected,
            } => write!(
                f,
                "attribute `{entity}.{attribute}` expects a {} value",
                expected.as_str()
            ),
        }
    }
}

impl Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::{AttributeDescription, AttributeKind, EntityDescription, Model, ValidationError};
    use serde_json::json;

    fn note_model() -> Model {
        Model::new().entity(
            EntityDescription::new("Note")
                .attribute(AttributeDescription::required("title", AttributeKind::Text))
                .attribute(
                    AttributeDescription::required("pinned", AttributeKind::Boolean)
                        .with_default(false),
                )
                .attribute(AttributeDescription::optional("rank", AttributeKind::Integer)),
        )
    }

    #[test]
    fn instantiate_applies_defaults_and_rejects_unknown_entity() {
        let model = note_model();
        let note = model.instantiate("Note").unwrap();
        assert_eq!(note.get_bool("pinned"), Some(false));
        assert!(note.get("title").is_none());

        let err = model.instantiate("Missing").unwrap_err();
        assert_eq!(err, ValidationError::UnknownEntity("Missing".to_string()));
    }

    #[test]
    fn validate_reports_missing_required_attribute() {
        let model = note_model();
        let note = model.instantiate("Note").unwrap();
        let err = model.validate(&note).unwrap_err();
        assert!(matches!(err, ValidationError::MissingAttribute { attribute, .. } if attribute == "title"));
    }

    #[test]
    fn validate_rejects_kind_mismatch_and_unknown_attribute() {
        let model = note_model();
        let mut note = model.instantiate("Note").unwrap();
        note.set("title", "ok");
        note.set("rank", "high");
        assert!(matches!(
            model.validate(&note).unwrap_err(),
            ValidationError::KindMismatch { .. }
        ));

        note.set("rank", json!(null));
        note.set("color", "red");
        assert!(matches!(
            model.validate(&note).unwrap_err(),
            ValidationError::UnknownAttribute { .. }
        ));

        note.remove("color");
        model.validate(&note).unwrap();
    }

    #[test]
    fn check_rejects_duplicates_and_bad_defaults() {
        let duplicated = note_model().entity(EntityDescription::new("Note"));
        assert!(duplicated.check().unwrap_err().contains("duplicate entity"));

        let bad_default = Model::new().entity(
            EntityDescription::new("Task").attribute(
                AttributeDescription::required("done", AttributeKind::Boolean).with_default(1),
            ),
        );
        assert!(bad_default.check().is_err());
        note_model().check().unwrap();
    }

    #[test]
    fn model_json_shape_is_stable() {
        let json = serde_json::to_value(note_model()).unwrap();
        assert_eq!(json["entities"][0]["name"], "Note");
        assert_eq!(json["entities"][0]["attributes"][0]["kind"], "text");
    }
}
