mod common;

use common::{
    create_note, fetch_all, fetch_all_interactive, file_stack, memory_stack, note_model,
    on_interactive, titles, EventLog, Note,
};
use lanestore_core::{
    ChangeSet, ContextKind, Filter, ManagedObject, ObjectId, ObjectRepository, PersistenceStack,
    RepoError, RepoResult, SaveOutcome, StoreLocation,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

/// Store whose writes always fail; counts write attempts.
#[derive(Clone, Default)]
struct RejectingStore {
    writes: Arc<AtomicUsize>,
}

impl ObjectRepository for RejectingStore {
    fn list_entity(&self, _entity: &str) -> RepoResult<Vec<ManagedObject>> {
        Ok(Vec::new())
    }

    fn get(&self, _id: ObjectId) -> RepoResult<Option<ManagedObject>> {
        Ok(None)
    }

    fn apply_changes(&mut self, _changes: &ChangeSet) -> RepoResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(RepoError::InvalidData("read-only volume".to_string()))
    }
}

#[test]
fn empty_save_emits_no_event_and_writes_nothing() {
    let store = RejectingStore::default();
    let stack = Arc::new(
        PersistenceStack::with_repository(note_model(), Box::new(store.clone())).unwrap(),
    );
    let events = EventLog::attach(&stack);

    assert_eq!(stack.save_and_wait(), SaveOutcome::NoChanges);
    let interactive = on_interactive(&stack, |stack| stack.save_and_wait());
    assert_eq!(interactive, SaveOutcome::NoChanges);

    stack.save();
    stack.wait_for_pending_work();
    assert_eq!(events.len(), 0);
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[test]
fn worker_commit_cascades_exactly_one_hop() {
    let stack = memory_stack();
    let events = EventLog::attach(&stack);

    create_note(&stack, "from worker");

    assert_eq!(events.len(), 2);
    assert_eq!(events.count(ContextKind::Worker), 1);
    assert_eq!(events.count(ContextKind::Interactive), 1);
}

#[test]
fn interactive_commit_is_not_merged_back() {
    let stack = memory_stack();
    let events = EventLog::attach(&stack);

    on_interactive(&stack, |stack| {
        stack.create::<Note, _>("Note", |note| note.title = "local".to_string())
    });
    on_interactive(&stack, |stack| stack.save_and_wait());

    assert_eq!(events.kinds(), vec![ContextKind::Interactive]);
}

#[test]
fn invalid_object_fails_save_and_stays_pending() {
    let stack = memory_stack();
    let events = EventLog::attach(&stack);

    // Missing the required `title`.
    let created = stack.create::<ManagedObject, _>("Note", |_| {});
    assert!(created.is_some());
    assert_eq!(events.len(), 0);

    assert_eq!(stack.save_and_wait(), SaveOutcome::Failed);
    assert_eq!(fetch_all::<ManagedObject>(&stack, "Note").map(|all| all.len()), Some(1));
    assert_eq!(fetch_all_interactive::<Note>(&stack, "Note"), Some(Vec::new()));
}

#[test]
fn store_failure_keeps_changes_pending_on_interactive_context() {
    let store = RejectingStore::default();
    let stack = Arc::new(
        PersistenceStack::with_repository(note_model(), Box::new(store.clone())).unwrap(),
    );
    let events = EventLog::attach(&stack);

    let created = create_note(&stack, "unpersisted");

    assert_eq!(events.kinds(), vec![ContextKind::Worker]);
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);

    let visible = fetch_all_interactive::<Note>(&stack, "Note").unwrap();
    assert_eq!(visible, vec![created]);

    let retried = on_interactive(&stack, |stack| stack.save_and_wait());
    assert_eq!(retried, SaveOutcome::Failed);
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
}

#[test]
fn unsubscribed_listener_sees_no_more_events() {
    let stack = memory_stack();
    let seen = Arc::new(AtomicUsize::new(0));
    let subscription = {
        let seen = Arc::clone(&seen);
        stack.subscribe_commits(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };

    create_note(&stack, "one");
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    assert!(stack.unsubscribe_commits(subscription));
    assert!(!stack.unsubscribe_commits(subscription));

    create_note(&stack, "two");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn committed_event_carries_the_change_set() {
    let stack = memory_stack();
    let committed = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let committed = Arc::clone(&committed);
        stack.subscribe_commits(move |event| {
            if event.origin_kind() == ContextKind::Worker {
                let ids: Vec<ObjectId> = event.changes().inserted().map(|o| o.id()).collect();
                committed.lock().unwrap().extend(ids);
            }
        });
    }

    let note = create_note(&stack, "tracked");
    assert_eq!(committed.lock().unwrap().as_slice(), &[note.id]);
}

fn persisted_titles(location: &StoreLocation) -> Vec<String> {
    let reopened = file_stack(location);
    let notes = fetch_all::<Note>(&reopened, "Note").unwrap();
    titles(&notes).into_iter().map(str::to_string).collect()
}

#[test]
fn worker_update_of_note_deleted_meanwhile_does_not_block_later_saves() {
    let dir = tempfile::tempdir().unwrap();
    let location = StoreLocation::File(dir.path().join("notes.sqlite3"));
    let stack = Arc::new(file_stack(&location));
    create_note(&stack, "doomed");

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let held = Filter::new("held", move |_| {
        entered_tx.lock().unwrap().send(()).ok();
        let _ = release_rx.lock().unwrap().recv();
        true
    });

    // The worker has read the note and is parked inside the filter.
    stack.update_matching::<Note, _>("Note", held, |note| note.rank = 7);
    entered_rx.recv().unwrap();

    on_interactive(&stack, |stack| stack.delete_all("Note"));
    on_interactive(&stack, |_| ());

    drop(release_tx);
    stack.wait_for_pending_work();

    create_note(&stack, "later");
    assert_eq!(
        on_interactive(&stack, |stack| stack.save_and_wait()),
        SaveOutcome::NoChanges
    );
    let visible = fetch_all_interactive::<Note>(&stack, "Note").unwrap();
    assert_eq!(titles(&visible), vec!["later"]);

    drop(stack);
    assert_eq!(persisted_titles(&location), vec!["later"]);
}

#[test]
fn invalid_interactive_object_does_not_hold_back_unrelated_worker_save() {
    let dir = tempfile::tempdir().unwrap();
    let location = StoreLocation::File(dir.path().join("notes.sqlite3"));
    let stack = Arc::new(file_stack(&location));
    let events = EventLog::attach(&stack);

    // Missing the required `title`.
    let invalid = on_interactive(&stack, |stack| {
        stack.create::<ManagedObject, _>("Note", |_| {})
    });
    assert!(invalid.is_some());
    assert_eq!(events.len(), 0);

    create_note(&stack, "later");
    assert_eq!(
        events.kinds(),
        vec![ContextKind::Worker, ContextKind::Interactive]
    );

    // Only the invalid object is left pending.
    assert_eq!(
        on_interactive(&stack, |stack| stack.save_and_wait()),
        SaveOutcome::Failed
    );
    drop(stack);
    assert_eq!(persisted_titles(&location), vec!["later"]);
}

#[test]
fn invalid_worker_object_does_not_hold_back_later_worker_saves() {
    let dir = tempfile::tempdir().unwrap();
    let location = StoreLocation::File(dir.path().join("notes.sqlite3"));
    let stack = file_stack(&location);

    assert!(stack.create::<ManagedObject, _>("Note", |_| {}).is_some());
    assert_eq!(stack.save_and_wait(), SaveOutcome::Failed);

    create_note(&stack, "later");
    assert_eq!(stack.save_and_wait(), SaveOutcome::Failed);

    drop(stack);
    assert_eq!(persisted_titles(&location), vec!["later"]);
}
