#![allow(dead_code)]

use lanestore_core::{
    AttributeDescription, AttributeKind, CommitEvent, ContextKind, Entity, EntityDescription,
    ManagedObject, Model, ObjectId, PersistenceStack, StoreLocation, StoreOptions,
};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

pub fn note_model() -> Model {
    Model::new()
        .entity(
            EntityDescription::new("Note")
                .attribute(AttributeDescription::required("title", AttributeKind::Text))
                .attribute(
                    AttributeDescription::required("pinned", AttributeKind::Boolean)
                        .with_default(false),
                )
                .attribute(
                    AttributeDescription::required("rank", AttributeKind::Integer)
                        .with_default(0),
                ),
        )
        .entity(
            EntityDescription::new("Tag")
                .attribute(AttributeDescription::optional("label", AttributeKind::Text)),
        )
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: ObjectId,
    pub title: String,
    pub pinned: bool,
    pub rank: i64,
}

impl Entity for Note {
    fn from_object(object: &ManagedObject) -> Option<Self> {
        if object.entity() != "Note" {
            return None;
        }
        Some(Self {
            id: object.id(),
            title: object.get_str("title").unwrap_or_default().to_string(),
            pinned: object.get_bool("pinned").unwrap_or(false),
            rank: object.get_i64("rank").unwrap_or(0),
        })
    }

    fn write_to(&self, object: &mut ManagedObject) {
        object.set("title", self.title.clone());
        object.set("pinned", self.pinned);
        object.set("rank", self.rank);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub label: Option<String>,
}

impl Entity for Tag {
    fn from_object(object: &ManagedObject) -> Option<Self> {
        if object.entity() != "Tag" {
            return None;
        }
        Some(Self {
            label: object.get_str("label").map(str::to_string),
        })
    }

    fn write_to(&self, object: &mut ManagedObject) {
        match &self.label {
            Some(label) => object.set("label", label.clone()),
            None => {
                object.remove("label");
            }
        }
    }
}

pub fn memory_stack() -> Arc<PersistenceStack> {
    Arc::new(
        PersistenceStack::open(note_model(), &StoreLocation::InMemory, StoreOptions::default())
            .unwrap(),
    )
}

pub fn file_stack(location: &StoreLocation) -> PersistenceStack {
    PersistenceStack::open(note_model(), location, StoreOptions::default()).unwrap()
}

pub fn create_note(stack: &PersistenceStack, title: &str) -> Note {
    let title = title.to_string();
    stack
        .create::<Note, _>("Note", move |note| note.title = title)
        .unwrap()
}

/// Runs `job` on the interactive lane with access to the stack.
pub fn on_interactive<R, F>(stack: &Arc<PersistenceStack>, job: F) -> R
where
    F: FnOnce(&PersistenceStack) -> R + Send + 'static,
    R: Send + 'static,
{
    let inner = Arc::clone(stack);
    stack.run_on_interactive_lane(move || job(&inner)).unwrap()
}

/// Fetches from the calling thread's context and waits for the completion.
pub fn fetch_all<T: Entity>(stack: &PersistenceStack, entity: &str) -> Option<Vec<T>> {
    let (tx, rx) = mpsc::channel();
    stack.fetch_all::<T, _>(entity, move |result| tx.send(result).unwrap());
    rx.recv().unwrap()
}

/// Fetches on the interactive context and waits for the completion.
pub fn fetch_all_interactive<T: Entity>(
    stack: &Arc<PersistenceStack>,
    entity: &'static str,
) -> Option<Vec<T>> {
    let (tx, rx) = mpsc::channel();
    on_interactive(stack, move |stack| {
        stack.fetch_all::<T, _>(entity, move |result| tx.send(result).unwrap());
    });
    rx.recv().unwrap()
}

pub fn titles(notes: &[Note]) -> Vec<&str> {
    notes.iter().map(|note| note.title.as_str()).collect()
}

/// Records the origin kind and size of every commit event.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<(ContextKind, usize)>>>,
}

impl EventLog {
    pub fn attach(stack: &PersistenceStack) -> Self {
        let log = Self::default();
        let sink = log.clone();
        stack.subscribe_commits(move |event: &CommitEvent| {
            sink.events
                .lock()
                .unwrap()
                .push((event.origin_kind(), event.changes().len()));
        });
        log
    }

    pub fn kinds(&self) -> Vec<ContextKind> {
        self.events.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
    }

    pub fn count(&self, kind: ContextKind) -> usize {
        self.kinds().into_iter().filter(|seen| *seen == kind).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}
