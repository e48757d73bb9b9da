//! Stored model reconciliation and inferred (lightweight) migration.
//!
//! # Responsibility
//! - Persist the model a store was last opened with.
//! - Decide whether a changed model may be opened, per `StoreOptions`.
//! - Infer and apply a mapping for compatible model changes.
//!
//! # Invariants
//! - Mapping is applied in one transaction together with the new model.
//! - Only changes with an unambiguous mapping are inferred: dropped
//!   entities, dropped attributes, and added or tightened attributes that
//!   have a default value.

use super::{DbError, DbResult, StoreOptions};
use crate::model::object::Attributes;
use crate::model::schema::Model;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

const MODEL_KEY: &str = "model";

/// What happened to the stored model while opening the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReconciliation {
    /// No model was stored yet; the current one was recorded.
    Fresh,
    Unchanged,
    Migrated {
        dropped_entities: usize,
        rewritten_objects: usize,
    },
}

impl ModelReconciliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Unchanged => "unchanged",
            Self::Migrated { .. } => "migrated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EntityMapping {
    entity: String,
    removed: Vec<String>,
    /// Attributes whose missing or null values take the given default.
    filled: Vec<(String, Value)>,
}

/// Mapping from a stored model to the current model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingPlan {
    dropped_entities: Vec<String>,
    entities: Vec<EntityMapping>,
}

impl MappingPlan {
    /// Infers the mapping, or explains why no mapping can be inferred.
    pub fn infer(stored: &Model, current: &Model) -> Result<Self, String> {
        let mut plan = Self::default();

        for old_entity in stored.entities() {
            let Some(new_entity) = current.entity_named(&old_entity.name) else {
                plan.dropped_entities.push(old_entity.name.clone());
                continue;
            };

            let removed: Vec<String> = old_entity
                .attributes
                .iter()
                .filter(|attribute| new_entity.attribute_named(&attribute.name).is_none())
                .map(|attribute| attribute.name.clone())
                .collect();

            let mut filled = Vec::new();
            for attribute in &new_entity.attributes {
                let needs_value = match old_entity.attribute_named(&attribute.name) {
                    Some(old) if old.kind != attribute.kind => {
                        return Err(format!(
                            "attribute `{}.{}` changed kind from {} to {}",
                            new_entity.name,
                            attribute.name,
                            old.kind.as_str(),
                            attribute.kind.as_str()
                        ));
                    }
                    Some(old) => old.optional && !attribute.optional,
                    None => !attribute.optional || attribute.default.is_some(),
                };
                if !needs_value {
                    continue;
                }
                match &attribute.default {
                    Some(default) => filled.push((attribute.name.clone(), default.clone())),
                    None => {
                        return Err(format!(
                            "required attribute `{}.{}` has no default value",
                            new_entity.name, attribute.name
                        ));
                    }
                }
            }

            if !removed.is_empty() || !filled.is_empty() {
                plan.entities.push(EntityMapping {
                    entity: new_entity.name.clone(),
                    removed,
                    filled,
                });
            }
        }

        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.dropped_entities.is_empty() && self.entities.is_empty()
    }

    pub fn dropped_entities(&self) -> &[String] {
        &self.dropped_entities
    }

    /// Rewrites stored rows; returns the number of rewritten objects.
    fn apply(&self, conn: &Connection) -> DbResult<usize> {
        for entity in &self.dropped_entities {
            conn.execute("DELETE FROM managed_objects WHERE entity = ?1;", [entity])?;
        }

        let mut rewritten = 0;
        for mapping in &self.entities {
            let rows: Vec<(i64, String)> = {
                let mut stmt =
                    conn.prepare("SELECT seq, attributes FROM managed_objects WHERE entity = ?1;")?;
                let mapped = stmt.query_map([&mapping.entity], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let collected = mapped.collect::<Result<Vec<_>, _>>()?;
                collected
            };

            for (seq, raw) in rows {
                let mut attributes: Attributes = serde_json::from_str(&raw).map_err(|err| {
                    DbError::CorruptMetadata(format!(
                        "row {seq} of `{}` has invalid attributes: {err}",
                        mapping.entity
                    ))
                })?;
                for name in &mapping.removed {
                    attributes.remove(name);
                }
                for (name, default) in &mapping.filled {
                    let missing = attributes.get(name).map_or(true, Value::is_null);
                    if missing {
                        attributes.insert(name.clone(), default.clone());
                    }
                }
                let encoded = Value::Object(attributes).to_string();
                conn.execute(
                    "UPDATE managed_objects SET attributes = ?1 WHERE seq = ?2;",
                    params![encoded, seq],
                )?;
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }
}

/// Returns the model the store was last opened with.
pub fn stored_model(conn: &Connection) -> DbResult<Option<Model>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM store_metadata WHERE key = ?1;",
            [MODEL_KEY],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|err| DbError::CorruptMetadata(format!("stored model is not valid: {err}")))
    })
    .transpose()
}

pub(super) fn reconcile_model(
    conn: &mut Connection,
    model: &Model,
    options: StoreOptions,
) -> DbResult<ModelReconciliation> {
    let encoded = serde_json::to_string(model)
        .map_err(|err| DbError::IncompatibleModel(format!("model cannot be encoded: {err}")))?;

    let Some(stored) = stored_model(conn)? else {
        write_model(conn, &encoded)?;
        return Ok(ModelReconciliation::Fresh);
    };
    if &stored == model {
        return Ok(ModelReconciliation::Unchanged);
    }
    if !options.migrate_automatically {
        return Err(DbError::IncompatibleModel(
            "model changed and automatic migration is disabled".to_string(),
        ));
    }
    if !options.infer_mapping {
        return Err(DbError::IncompatibleModel(
            "model changed and mapping inference is disabled".to_string(),
        ));
    }

    let plan = MappingPlan::infer(&stored, model).map_err(DbError::IncompatibleModel)?;
    let tx = conn.transaction()?;
    let rewritten_objects = plan.apply(&tx)?;
    write_model(&tx, &encoded)?;
    tx.commit()?;

    info!(
        "event=model_migrate module=db status=ok dropped_entities={} rewritten_objects={}",
        plan.dropped_entities().len(),
        rewritten_objects
    );
    Ok(ModelReconciliation::Migrated {
        dropped_entities: plan.dropped_entities().len(),
        rewritten_objects,
    })
}

fn write_model(conn: &Connection, encoded: &str) -> DbResult<()> {
    conn.execute(
        "INSERT INTO store_metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![MODEL_KEY, encoded],
    )?;
    Ok(())
}
