//! Store-internal table layout, versioned through `PRAGMA user_version`.
//!
//! Entity model changes are not handled here; see model reconciliation.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// `(table version, DDL)` pairs in ascending version order.
const STEPS: [(u32, &str); 2] = [
    (1, include_str!("0001_init.sql")),
    (2, include_str!("0002_metadata.sql")),
];

/// Table version this build writes.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |(version, _)| *version)
}

/// Brings the store tables up to [`latest_version`] in one transaction.
///
/// A store written by a newer build is rejected untouched.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = latest_version();
    if found > target {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: found,
            latest_supported: target,
        });
    }

    let outstanding = &STEPS[STEPS.partition_point(|(version, _)| *version <= found)..];
    if outstanding.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, ddl) in outstanding {
        tx.execute_batch(ddl)?;
        tx.pragma_update(None, "user_version", version)?;
    }
    tx.commit()?;

    info!(
        "event=table_migrate module=db status=ok from_version={} to_version={} applied={}",
        found,
        target,
        outstanding.len()
    );
    Ok(())
}
