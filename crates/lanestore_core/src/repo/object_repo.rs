//! Managed object repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Read managed objects of one entity in store order.
//! - Apply a committed change set to durable storage atomically.
//!
//! # Invariants
//! - Store order is insertion order (`seq ASC`).
//! - `apply_changes` writes all operations of a change set or none.
//! - An update of a row that an earlier commit deleted is skipped; the
//!   delete stands.
//! - Read paths reject malformed persisted rows instead of masking them.

use crate::context::change_set::ChangeSet;
use crate::db::DbError;
use crate::model::object::{Attributes, ManagedObject, ObjectId};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const OBJECT_SELECT_SQL: &str = "SELECT
    uuid,
    entity,
    attributes
FROM managed_objects";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for managed object persistence.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted object data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Physical storage behind the interactive context.
pub trait ObjectRepository {
    /// Lists every object of `entity` in store order.
    fn list_entity(&self, entity: &str) -> RepoResult<Vec<ManagedObject>>;
    fn get(&self, id: ObjectId) -> RepoResult<Option<ManagedObject>>;
    /// Applies inserts, updates and deletes in one transaction.
    ///
    /// Updates of identities no longer stored are skipped, not failed.
    fn apply_changes(&mut self, changes: &ChangeSet) -> RepoResult<()>;
}

/// SQLite-backed object repository owning its connection.
pub struct SqliteObjectRepository {
    conn: Connection,
}

impl SqliteObjectRepository {
    /// Wraps a connection returned by `db::open_store`.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl ObjectRepository for SqliteObjectRepository {
    fn list_entity(&self, entity: &str) -> RepoResult<Vec<ManagedObject>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{OBJECT_SELECT_SQL}
             WHERE entity = ?1
             ORDER BY seq ASC;"
        ))?;
        let mut rows = stmt.query([entity])?;
        let mut objects = Vec::new();
        while let Some(row) = rows.next()? {
            objects.push(parse_object_row(row)?);
        }
        Ok(objects)
    }

    fn get(&self, id: ObjectId) -> RepoResult<Option<ManagedObject>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{OBJECT_SELECT_SQL} WHERE uuid = ?1;"))?;
        let row = stmt
            .query_row([id.to_string()], |row| {
                Ok((
                    row.get::<_, String>("uuid")?,
                    row.get::<_, String>("entity")?,
                    row.get::<_, String>("attributes")?,
                ))
            })
            .optional()?;

        row.map(|(uuid, entity, attributes)| build_object(&uuid, entity, &attributes))
            .transpose()
    }

    fn apply_changes(&mut self, changes: &ChangeSet) -> RepoResult<()> {
        let tx = self.conn.transaction()?;

        for object in changes.inserted() {
            tx.execute(
                "INSERT INTO managed_objects (uuid, entity, attributes)
                 VALUES (?1, ?2, ?3);",
                params![
                    object.id().to_string(),
                    object.entity(),
                    attributes_to_db(object)?,
                ],
            )?;
        }

        let mut skipped = 0;
        for object in changes.updated() {
            let changed = tx.execute(
                "UPDATE managed_objects
                 SET
                    attributes = ?1,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE uuid = ?2 AND entity = ?3;",
                params![
                    attributes_to_db(object)?,
                    object.id().to_string(),
                    object.entity(),
                ],
            )?;
            if changed == 0 {
                warn!(
                    "event=store_apply module=repo status=skip entity={} reason=row_deleted",
                    object.entity()
                );
                skipped += 1;
            }
        }

        for (id, _) in changes.deleted() {
            tx.execute(
                "DELETE FROM managed_objects WHERE uuid = ?1;",
                [id.to_string()],
            )?;
        }

        tx.commit()?;
        debug!(
            "event=store_apply module=repo status=ok inserted={} updated={} skipped={} deleted={}",
            changes.inserted().count(),
            changes.updated().count() - skipped,
            skipped,
            changes.deleted().count()
        );
        Ok(())
    }
}

fn parse_object_row(row: &Row<'_>) -> RepoResult<ManagedObject> {
    let uuid_text: String = row.get("uuid")?;
    let entity: String = row.get("entity")?;
    let attributes_text: String = row.get("attributes")?;
    build_object(&uuid_text, entity, &attributes_text)
}

fn build_object(uuid_text: &str, entity: String, attributes_text: &str) -> RepoResult<ManagedObject> {
    let id = Uuid::parse_str(uuid_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid uuid value `{uuid_text}` in managed_objects.uuid"
        ))
    })?;
    let attributes: Attributes = serde_json::from_str(attributes_text).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid attributes json for {id} in managed_objects.attributes: {err}"
        ))
    })?;
    Ok(ManagedObject::with_id(id, entity, attributes))
}

fn attributes_to_db(object: &ManagedObject) -> RepoResult<String> {
    serde_json::to_string(object.attributes()).map_err(|err| {
        RepoError::InvalidData(format!(
            "attributes of {} cannot be encoded: {err}",
            object.id()
        ))
    })
}
