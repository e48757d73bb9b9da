//! Schema providers: where a `Model` comes from.
//!
//! # Responsibility
//! - Define the `SchemaProvider` contract consumed by stack bootstrap.
//! - Ship a JSON file provider and a static in-code provider.
//!
//! # Invariants
//! - Every returned model passed `Model::check()`.

use super::schema::Model;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Model loading failure. Always fatal to stack initialization.
#[derive(Debug)]
pub enum SchemaError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        location: String,
        source: serde_json::Error,
    },
    Invalid {
        location: String,
        reason: String,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read model `{}`: {source}", path.display())
            }
            Self::Parse { location, source } => {
                write!(f, "failed to parse model `{location}`: {source}")
            }
            Self::Invalid { location, reason } => write!(f, "invalid model `{location}`: {reason}"),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid { .. } => None,
        }
    }
}

/// Supplies entity definitions for a model location identifier.
pub trait SchemaProvider {
    fn load_model(&self, location: &str) -> Result<Model, SchemaError>;
}

/// Loads `<base_dir>/<location>.json` model files.
pub struct JsonFileSchemaProvider {
    base_dir: PathBuf,
}

impl JsonFileSchemaProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn model_path(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.extension().is_some() {
            self.base_dir.join(path)
        } else {
            self.base_dir.join(format!("{location}.json"))
        }
    }
}

impl SchemaProvider for JsonFileSchemaProvider {
    fn load_model(&self, location: &str) -> Result<Model, SchemaError> {
        let path = self.model_path(location);
        let raw = std::fs::read_to_string(&path).map_err(|source| {
            error!(
                "event=model_load module=model status=error path={} error={}",
                path.display(),
                source
            );
            SchemaError::Io {
                path: path.clone(),
                source,
            }
        })?;
        let model = parse_model(location, &raw)?;
        info!(
            "event=model_load module=model status=ok path={} entities={}",
            path.display(),
            model.entities().len()
        );
        Ok(model)
    }
}

/// Serves one model built in code, regardless of location.
pub struct StaticSchemaProvider {
    model: Model,
}

impl StaticSchemaProvider {
    pub fn new(model: Model) -> Self {
        Self { model }
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn load_model(&self, location: &str) -> Result<Model, SchemaError> {
        self.model
            .check()
            .map_err(|reason| SchemaError::Invalid {
                location: location.to_string(),
                reason,
            })?;
        Ok(self.model.clone())
    }
}

/// Parses and checks a JSON model document.
pub fn parse_model(location: &str, raw: &str) -> Result<Model, SchemaError> {
    let model: Model = serde_json::from_str(raw).map_err(|source| SchemaError::Parse {
        location: location.to_string(),
        source,
    })?;
    model.check().map_err(|reason| SchemaError::Invalid {
        location: location.to_string(),
        reason,
    })?;
    Ok(model)
}
