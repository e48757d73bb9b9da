//! Connection bootstrap for the physical store.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas, run table migrations, reconcile the model.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and WAL journaling for files.
//! - Returned connections have migrations applied and the current model stored.

use super::migrations::apply_migrations;
use super::model_mapping::reconcile_model;
use super::{DbResult, StoreLocation, StoreOptions};
use crate::model::schema::Model;
use log::{error, info};
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Opens the store at `location` for `model`.
///
/// # Side effects
/// - May create the database file.
/// - May migrate stored objects to the current model (see `StoreOptions`).
/// - Emits `store_open` logging events with duration and status.
///
/// # Errors
/// Every error is fatal: the caller must not continue without a store.
pub fn open_store(
    model: &Model,
    location: &StoreLocation,
    options: StoreOptions,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = location.mode();
    info!("event=store_open module=db status=start mode={mode}");

    let opened = match location {
        StoreLocation::File(path) => Connection::open(path),
        StoreLocation::InMemory => Connection::open_in_memory(),
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=store_open module=db status=error mode={mode} duration_ms={} error_code=store_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, model, location, options) {
        Ok(reconciliation) => {
            info!(
                "event=store_open module=db status=ok mode={mode} model={} duration_ms={}",
                reconciliation.as_str(),
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=store_open module=db status=error mode={mode} duration_ms={} error_code=store_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    model: &Model,
    location: &StoreLocation,
    options: StoreOptions,
) -> DbResult<super::ModelReconciliation> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if matches!(location, StoreLocation::File(_)) {
        conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get::<_, String>(0))?;
    }
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    reconcile_model(conn, model, options)
}
