mod common;

use common::{create_note, fetch_all, file_stack, note_model, Note};
use lanestore_core::db::migrations::latest_version;
use lanestore_core::{
    AttributeDescription, AttributeKind, DbError, DirectoryLocationResolver, EntityDescription,
    JsonFileSchemaProvider, ManagedObject, Model, PersistenceStack, StackError,
    StaticSchemaProvider, StoreLocation, StoreOptions,
};
use rusqlite::Connection;

fn store_in(dir: &tempfile::TempDir) -> StoreLocation {
    StoreLocation::File(dir.path().join("notes.sqlite3"))
}

fn note_model_v2() -> Model {
    Model::new().entity(
        EntityDescription::new("Note")
            .attribute(AttributeDescription::required("title", AttributeKind::Text))
            .attribute(
                AttributeDescription::required("pinned", AttributeKind::Boolean)
                    .with_default(false),
            )
            .attribute(
                AttributeDescription::required("rank", AttributeKind::Integer).with_default(0),
            )
            .attribute(
                AttributeDescription::required("color", AttributeKind::Text)
                    .with_default("yellow"),
            ),
    )
}

#[test]
fn objects_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let location = store_in(&dir);

    let created = {
        let stack = file_stack(&location);
        create_note(&stack, "durable")
    };

    let reopened = file_stack(&location);
    assert_eq!(fetch_all::<Note>(&reopened, "Note"), Some(vec![created]));
}

#[test]
fn queued_work_is_drained_before_close() {
    let dir = tempfile::tempdir().unwrap();
    let location = store_in(&dir);

    {
        let stack = file_stack(&location);
        create_note(&stack, "a");
        create_note(&stack, "b");
        stack.delete_all("Note");
    }

    let reopened = file_stack(&location);
    assert_eq!(fetch_all::<Note>(&reopened, "Note"), Some(Vec::new()));
}

#[test]
fn store_tables_are_migrated_to_latest_version() {
    let dir = tempfile::tempdir().unwrap();
    let location = store_in(&dir);
    drop(file_stack(&location));

    let conn = Connection::open(dir.path().join("notes.sqlite3")).unwrap();
    let version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, latest_version());
    let stored: String = conn
        .query_row(
            "SELECT value FROM store_metadata WHERE key = 'model';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    let stored: Model = serde_json::from_str(&stored).unwrap();
    assert_eq!(stored, note_model());
}

#[test]
fn newer_table_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let location = store_in(&dir);
    let conn = Connection::open(dir.path().join("notes.sqlite3")).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = PersistenceStack::open(note_model(), &location, StoreOptions::default())
        .err()
        .unwrap();
    match err {
        StackError::Db(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        }) => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn changed_model_is_migrated_with_inferred_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let location = store_in(&dir);
    {
        let stack = file_stack(&location);
        create_note(&stack, "legacy");
    }

    let stack = PersistenceStack::open(note_model_v2(), &location, StoreOptions::default()).unwrap();
    let objects = fetch_all::<ManagedObject>(&stack, "Note").unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].get_str("title"), Some("legacy"));
    assert_eq!(objects[0].get_str("color"), Some("yellow"));
}

#[test]
fn changed_model_is_rejected_without_migration_options() {
    let dir = tempfile::tempdir().unwrap();
    let location = store_in(&dir);
    drop(file_stack(&location));

    for options in [
        StoreOptions {
            migrate_automatically: false,
            infer_mapping: true,
        },
        StoreOptions {
            migrate_automatically: true,
            infer_mapping: false,
        },
    ] {
        let err = PersistenceStack::open(note_model_v2(), &location, options)
            .err()
            .unwrap();
        assert!(
            matches!(err, StackError::Db(DbError::IncompatibleModel(_))),
            "unexpected error: {err}"
        );
    }

    // Unchanged models open regardless of the options.
    let strict = StoreOptions {
        migrate_automatically: false,
        infer_mapping: false,
    };
    assert!(PersistenceStack::open(note_model(), &location, strict).is_ok());
}

#[test]
fn corrupt_store_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.sqlite3");
    std::fs::write(&path, "this is not a sqlite database ".repeat(64)).unwrap();

    let err = PersistenceStack::open(note_model(), &StoreLocation::File(path), StoreOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, StackError::Db(_)), "unexpected error: {err}");
}

#[test]
fn bootstrap_loads_model_file_and_resolves_location() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::write(
        models.join("notes.json"),
        serde_json::to_string_pretty(&note_model()).unwrap(),
    )
    .unwrap();

    let schema = JsonFileSchemaProvider::new(&models);
    let resolver = DirectoryLocationResolver::new(dir.path().join("stores"));
    let stack = PersistenceStack::bootstrap(
        &schema,
        "notes",
        &resolver,
        "notes.sqlite3",
        StoreOptions::default(),
    )
    .unwrap();

    assert_eq!(stack.model(), &note_model());
    create_note(&stack, "booted");
    assert!(dir.path().join("stores").join("notes.sqlite3").is_file());
}

#[test]
fn bootstrap_failures_are_reported_by_stage() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = DirectoryLocationResolver::new(dir.path());

    let missing = JsonFileSchemaProvider::new(dir.path().join("absent"));
    let err = PersistenceStack::bootstrap(
        &missing,
        "notes",
        &resolver,
        "notes.sqlite3",
        StoreOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, StackError::Schema(_)), "unexpected error: {err}");

    let schema = StaticSchemaProvider::new(note_model());
    let err = PersistenceStack::bootstrap(
        &schema,
        "notes",
        &resolver,
        "../escape.sqlite3",
        StoreOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, StackError::Location(_)), "unexpected error: {err}");
}
