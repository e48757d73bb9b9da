mod common;

use common::{create_note, fetch_all_interactive, memory_stack, on_interactive, Note};
use lanestore_core::Filter;
use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

#[test]
fn concurrent_creates_from_many_threads_are_all_persisted() {
    let stack = memory_stack();

    let workers: Vec<_> = (0..8)
        .map(|thread_index| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                (0..10)
                    .map(|i| create_note(&stack, &format!("t{thread_index}-n{i}")).id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut created = HashSet::new();
    for worker in workers {
        created.extend(worker.join().unwrap());
    }
    assert_eq!(created.len(), 80);

    let notes = fetch_all_interactive::<Note>(&stack, "Note").unwrap();
    let persisted: HashSet<_> = notes.iter().map(|note| note.id).collect();
    assert_eq!(persisted, created);
}

#[test]
fn queued_updates_apply_in_submission_order_without_lost_writes() {
    let stack = memory_stack();
    create_note(&stack, "counter");

    for _ in 0..50 {
        stack.update_matching::<Note, _>(
            "Note",
            Filter::attribute_equals("title", "counter"),
            |note| note.rank += 1,
        );
    }
    stack.wait_for_pending_work();

    let notes = fetch_all_interactive::<Note>(&stack, "Note").unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].rank, 50);
}

#[test]
fn completions_arrive_in_submission_order() {
    let stack = memory_stack();
    create_note(&stack, "ordered");

    let (tx, rx) = mpsc::channel();
    for sequence in 0..20 {
        let tx = tx.clone();
        stack.fetch_all::<Note, _>("Note", move |_| tx.send(sequence).unwrap());
    }
    drop(tx);

    let received: Vec<i32> = rx.iter().collect();
    assert_eq!(received, (0..20).collect::<Vec<_>>());
}

#[test]
fn interactive_and_worker_traffic_interleave_safely() {
    let stack = memory_stack();

    let background = {
        let stack = Arc::clone(&stack);
        thread::spawn(move || {
            for i in 0..20 {
                create_note(&stack, &format!("worker-{i}"));
            }
        })
    };
    for i in 0..20 {
        let title = format!("ui-{i}");
        on_interactive(&stack, move |stack| {
            stack.create::<Note, _>("Note", move |note| note.title = title)
        })
        .unwrap();
    }
    background.join().unwrap();

    let notes = fetch_all_interactive::<Note>(&stack, "Note").unwrap();
    assert_eq!(notes.len(), 40);
    let worker_titles = notes
        .iter()
        .filter(|note| note.title.starts_with("worker-"))
        .count();
    assert_eq!(worker_titles, 20);
}
