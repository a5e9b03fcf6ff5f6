//! Optimistic note store
//!
//! The store is the client's view of the notes. Local changes are visible immediately and turned
//! into [`Command`]s for the service. The outcome of those commands comes back as
//! [`StoreEvent`]s, which either confirm the optimistic state or roll it back.
//!
//! The store never talks to the network itself: [`NoteStore::apply`] takes an event and returns
//! the commands that should be sent next.

use std::collections::HashMap;
use std::mem;

use chrono::NaiveDateTime;
use uuid::Uuid;

use super::ClientError;
use super::api::NoteId;
use super::api::RemoteNote;
use super::queue::OperationKind;
use super::queue::PendingOperation;

/// Version of a note the service never told us about
const DEFAULT_VERSION: i32 = 1;

/// Identifies a command until the matching response is applied
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

/// How far the local state of a note is from the service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Same as the last known state of the service
    Synced,

    /// A request for this note is underway
    InFlight,

    /// Waiting in the offline queue
    Queued,

    /// Replay of an offline change failed, needs attention
    Failed,
}

/// A note as the client shows it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalNote {
    pub id: NoteId,
    pub content: String,
    pub owner_email: Option<String>,

    /// Last version confirmed by the service, `None` for notes not created yet
    pub version: Option<i32>,

    pub being_edited: bool,
    pub created_at: Option<NaiveDateTime>,
    pub sync: SyncState,
}

impl LocalNote {
    fn provisional(local_id: Uuid, content: String, sync: SyncState) -> Self {
        Self {
            id: NoteId::Local(local_id),
            content,
            owner_email: None,
            version: None,
            being_edited: false,
            created_at: None,
            sync,
        }
    }

    fn from_remote(note: RemoteNote) -> Self {
        Self {
            id: NoteId::Remote(note.id),
            content: note.content,
            owner_email: note.owner_email,
            version: Some(note.version),
            being_edited: note.being_edited,
            created_at: Some(note.created_at),
            sync: SyncState::Synced,
        }
    }

    /// Only known to this client so far
    pub fn is_provisional(&self) -> bool {
        self.id.is_local()
    }
}

/// Something to send to the service
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Create {
        request: RequestId,
        local_id: Uuid,
        content: String,
    },
    Update {
        request: RequestId,
        note: NoteId,
        content: String,
        version: i32,
    },
    Delete {
        request: RequestId,
        note: NoteId,
    },

    /// Reload the notes from the service
    Refetch,
}

impl Command {
    pub fn request(&self) -> Option<RequestId> {
        match self {
            Self::Create { request, .. }
            | Self::Update { request, .. }
            | Self::Delete { request, .. } => Some(*request),
            Self::Refetch => None,
        }
    }

    /// The command as it is kept in the offline queue
    pub fn to_operation(&self) -> Option<OperationKind> {
        match self {
            Self::Create {
                local_id, content, ..
            } => Some(OperationKind::Create {
                local_id: *local_id,
                content: content.clone(),
            }),
            Self::Update {
                note,
                content,
                version,
                ..
            } => Some(OperationKind::Update {
                note: *note,
                content: content.clone(),
                version: *version,
            }),
            Self::Delete { note, .. } => Some(OperationKind::Delete { note: *note }),
            Self::Refetch => None,
        }
    }
}

/// Everything that changes the store
#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// The user wrote a new note, known by `local_id` until the service confirms it
    LocalCreate { local_id: Uuid, content: String },

    /// The user changed the content of a note
    LocalUpdate { note: NoteId, content: String },

    /// The user removed a note
    LocalDelete { note: NoteId },

    CreateConfirmed {
        request: RequestId,
        note: RemoteNote,
    },
    UpdateConfirmed {
        request: RequestId,
        note: RemoteNote,
    },
    DeleteConfirmed {
        request: RequestId,
    },

    /// The service refused the command, or could not be reached
    RequestFailed {
        request: RequestId,
        error: ClientError,
    },

    /// The command was put in the offline queue instead of being sent
    RequestQueued {
        request: RequestId,
    },

    /// Fresh state of the service, with the offline changes not replayed yet
    Refetched {
        notes: Vec<RemoteNote>,
        unsynced: Vec<PendingOperation>,
    },

    /// Offline creates got their real ID, as `(local, remote)` pairs
    CreatesReplayed {
        mappings: Vec<(Uuid, Uuid)>,
    },

    /// Show an error not tied to a single command
    ErrorRaised(ClientError),

    /// The user acknowledged the last error
    ErrorDismissed,
}

#[derive(Debug)]
enum RequestKind {
    Create,
    Update { previous_content: String },
    Delete,
}

#[derive(Debug)]
struct InFlight {
    note: NoteId,
    kind: RequestKind,
}

/// Local changes waiting for the in-flight request of the same note
#[derive(Debug, Default)]
struct Held {
    content: Option<String>,
    delete: bool,
}

/// The client's notes, with optimistic local changes
#[derive(Debug, Default)]
pub struct NoteStore {
    notes: Vec<LocalNote>,
    requests: HashMap<RequestId, InFlight>,
    held: HashMap<NoteId, Held>,
    id_mappings: HashMap<Uuid, Uuid>,
    last_error: Option<ClientError>,
    next_request: u64,
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notes, newest first
    pub fn notes(&self) -> &[LocalNote] {
        &self.notes
    }

    pub fn note(&self, id: NoteId) -> Option<&LocalNote> {
        let id = self.resolve(id);

        self.notes.iter().find(|note| note.id == id)
    }

    /// The error the user should see, if any
    pub fn last_error(&self) -> Option<&ClientError> {
        self.last_error.as_ref()
    }

    /// Are there commands without a response?
    pub fn has_in_flight(&self) -> bool {
        !self.requests.is_empty()
    }

    /// The current identity of a note, temporary IDs of confirmed creates become the real one
    pub fn resolve(&self, id: NoteId) -> NoteId {
        match id {
            NoteId::Local(local_id) => self
                .id_mappings
                .get(&local_id)
                .map_or(id, |remote_id| NoteId::Remote(*remote_id)),
            NoteId::Remote(_) => id,
        }
    }

    /// Apply an event, returns the commands to send next
    pub fn apply(&mut self, event: StoreEvent) -> Vec<Command> {
        match event {
            StoreEvent::LocalCreate { local_id, content } => self.local_create(local_id, content),
            StoreEvent::LocalUpdate { note, content } => self.local_update(note, content),
            StoreEvent::LocalDelete { note } => self.local_delete(note),
            StoreEvent::CreateConfirmed { request, note } => self.create_confirmed(request, note),
            StoreEvent::UpdateConfirmed { request, note } => self.update_confirmed(request, note),
            StoreEvent::DeleteConfirmed { request } => self.delete_confirmed(request),
            StoreEvent::RequestFailed { request, error } => self.request_failed(request, error),
            StoreEvent::RequestQueued { request } => self.request_queued(request),
            StoreEvent::Refetched { notes, unsynced } => {
                self.refetched(notes, unsynced);
                Vec::new()
            }
            StoreEvent::CreatesReplayed { mappings } => {
                self.creates_replayed(mappings);
                Vec::new()
            }
            StoreEvent::ErrorRaised(error) => {
                self.last_error = Some(error);
                Vec::new()
            }
            StoreEvent::ErrorDismissed => {
                self.last_error = None;
                Vec::new()
            }
        }
    }

    fn local_create(&mut self, local_id: Uuid, content: String) -> Vec<Command> {
        self.notes.insert(
            0,
            LocalNote::provisional(local_id, content.clone(), SyncState::InFlight),
        );

        let request = self.start(NoteId::Local(local_id), RequestKind::Create);

        vec![Command::Create {
            request,
            local_id,
            content,
        }]
    }

    fn local_update(&mut self, note: NoteId, content: String) -> Vec<Command> {
        let note_id = self.resolve(note);

        let Some(index) = self.position(note_id) else {
            tracing::debug!("Ignoring update of unknown note {note_id}");
            return Vec::new();
        };

        let previous_content = mem::replace(&mut self.notes[index].content, content.clone());
        let version = self.notes[index].version.unwrap_or(DEFAULT_VERSION);

        if self.is_busy(note_id) {
            self.held.entry(note_id).or_default().content = Some(content);
            return Vec::new();
        }

        let request = self.start(note_id, RequestKind::Update { previous_content });

        vec![Command::Update {
            request,
            note: note_id,
            content,
            version,
        }]
    }

    fn local_delete(&mut self, note: NoteId) -> Vec<Command> {
        let note_id = self.resolve(note);

        let Some(index) = self.position(note_id) else {
            tracing::debug!("Ignoring delete of unknown note {note_id}");
            return Vec::new();
        };

        self.notes.remove(index);

        if self.is_busy(note_id) {
            let held = self.held.entry(note_id).or_default();
            held.content = None;
            held.delete = true;

            return Vec::new();
        }

        vec![self.send_delete(note_id)]
    }

    fn create_confirmed(&mut self, request: RequestId, note: RemoteNote) -> Vec<Command> {
        let local = match self.requests.remove(&request) {
            Some(InFlight {
                note,
                kind: RequestKind::Create,
            }) => note,
            other => return self.ignore(request, other),
        };

        let remote = NoteId::Remote(note.id);
        if let NoteId::Local(local_id) = local {
            self.id_mappings.insert(local_id, note.id);
        }

        let held = self.held.remove(&local).unwrap_or_default();

        if held.delete {
            return vec![self.send_delete(remote)];
        }

        let server_content = note.content.clone();
        let version = note.version;
        let confirmed = LocalNote::from_remote(note);

        match (self.position(local), self.position(remote)) {
            (Some(index), None) => self.notes[index] = confirmed,
            // a refetch already brought the real note
            (Some(index), Some(_)) => {
                self.notes.remove(index);
            }
            (None, Some(_)) => {}
            (None, None) => self.notes.insert(0, confirmed),
        }

        let Some(content) = held.content else {
            return Vec::new();
        };

        if let Some(index) = self.position(remote) {
            self.notes[index].content.clone_from(&content);
        }

        let request = self.start(
            remote,
            RequestKind::Update {
                previous_content: server_content,
            },
        );

        vec![Command::Update {
            request,
            note: remote,
            content,
            version,
        }]
    }

    fn update_confirmed(&mut self, request: RequestId, note: RemoteNote) -> Vec<Command> {
        let note_id = match self.requests.remove(&request) {
            Some(InFlight {
                note,
                kind: RequestKind::Update { .. },
            }) => note,
            other => return self.ignore(request, other),
        };

        let held = self.held.remove(&note_id).unwrap_or_default();

        if held.delete {
            return vec![self.send_delete(note_id)];
        }

        let Some(index) = self.position(note_id) else {
            return Vec::new();
        };

        let entry = &mut self.notes[index];
        entry.version = Some(note.version);
        entry.being_edited = note.being_edited;

        match held.content {
            // the local content already is the newer edit
            Some(content) => {
                let request = self.start(
                    note_id,
                    RequestKind::Update {
                        previous_content: note.content,
                    },
                );

                vec![Command::Update {
                    request,
                    note: note_id,
                    content,
                    version: note.version,
                }]
            }
            None => {
                entry.content = note.content;
                entry.sync = SyncState::Synced;

                Vec::new()
            }
        }
    }

    fn delete_confirmed(&mut self, request: RequestId) -> Vec<Command> {
        match self.requests.remove(&request) {
            Some(InFlight {
                note,
                kind: RequestKind::Delete,
            }) => {
                self.held.remove(&note);
                Vec::new()
            }
            other => self.ignore(request, other),
        }
    }

    fn request_failed(&mut self, request: RequestId, error: ClientError) -> Vec<Command> {
        let Some(in_flight) = self.requests.remove(&request) else {
            return self.ignore(request, None);
        };

        let held = self.held.remove(&in_flight.note).unwrap_or_default();

        let commands = match in_flight.kind {
            RequestKind::Create => {
                self.notes.retain(|note| note.id != in_flight.note);
                Vec::new()
            }
            RequestKind::Update { previous_content } => {
                if let Some(index) = self.position(in_flight.note) {
                    let entry = &mut self.notes[index];
                    entry.content = previous_content;
                    entry.sync = SyncState::Synced;
                }

                if held.delete {
                    vec![self.send_delete(in_flight.note)]
                } else {
                    Vec::new()
                }
            }
            RequestKind::Delete => vec![Command::Refetch],
        };

        if error.is_conflict() {
            tracing::info!("Change of note {} was based on an old version", in_flight.note);
        } else {
            tracing::warn!("Change of note {} failed: {error}", in_flight.note);
        }

        self.last_error = Some(error);

        commands
    }

    fn request_queued(&mut self, request: RequestId) -> Vec<Command> {
        let Some(in_flight) = self.requests.remove(&request) else {
            return self.ignore(request, None);
        };

        let note_id = in_flight.note;
        let index = self.position(note_id);

        if let Some(index) = index {
            self.notes[index].sync = SyncState::Queued;
        }

        let held = self.held.remove(&note_id).unwrap_or_default();

        if held.delete {
            return vec![self.send_delete(note_id)];
        }

        let Some(content) = held.content else {
            return Vec::new();
        };

        let version = index
            .and_then(|index| self.notes[index].version)
            .unwrap_or(DEFAULT_VERSION);

        let request = self.start(
            note_id,
            RequestKind::Update {
                previous_content: content.clone(),
            },
        );

        vec![Command::Update {
            request,
            note: note_id,
            content,
            version,
        }]
    }

    fn refetched(&mut self, remote: Vec<RemoteNote>, unsynced: Vec<PendingOperation>) {
        let previous = mem::take(&mut self.notes);
        let mut notes = remote
            .into_iter()
            .map(LocalNote::from_remote)
            .collect::<Vec<LocalNote>>();

        let mut requests = self.requests.iter().collect::<Vec<_>>();
        requests.sort_by_key(|(request, _)| **request);

        for (_, in_flight) in requests {
            let local = previous.iter().find(|note| note.id == in_flight.note);

            match (&in_flight.kind, local) {
                (RequestKind::Create, Some(provisional)) => {
                    notes.insert(0, provisional.clone());
                }
                (RequestKind::Update { .. }, Some(local)) => {
                    if let Some(note) = notes.iter_mut().find(|note| note.id == in_flight.note) {
                        note.content.clone_from(&local.content);
                        note.sync = SyncState::InFlight;
                    }
                }
                (RequestKind::Delete, _) => notes.retain(|note| note.id != in_flight.note),
                _ => {}
            }
        }

        notes.retain(|note| !self.held.get(&note.id).is_some_and(|held| held.delete));

        for operation in unsynced {
            let sync = if operation.is_failed() {
                SyncState::Failed
            } else {
                SyncState::Queued
            };

            match operation.kind {
                OperationKind::Create { local_id, content } => {
                    let id = self.resolve(NoteId::Local(local_id));

                    if let Some(note) = notes.iter_mut().find(|note| note.id == id) {
                        note.sync = sync;
                    } else if id.is_local() {
                        notes.insert(0, LocalNote::provisional(local_id, content, sync));
                    }
                }
                OperationKind::Update { note, content, .. } => {
                    let id = self.resolve(note);

                    if let Some(note) = notes.iter_mut().find(|note| note.id == id) {
                        note.content = content;
                        note.sync = sync;
                    }
                }
                OperationKind::Delete { note } => {
                    let id = self.resolve(note);

                    if sync == SyncState::Failed {
                        if let Some(note) = notes.iter_mut().find(|note| note.id == id) {
                            note.sync = sync;
                        }
                    } else {
                        notes.retain(|note| note.id != id);
                    }
                }
            }
        }

        self.notes = notes;
    }

    fn creates_replayed(&mut self, mappings: Vec<(Uuid, Uuid)>) {
        for (local_id, remote_id) in mappings {
            self.id_mappings.insert(local_id, remote_id);

            let local = NoteId::Local(local_id);
            let remote = NoteId::Remote(remote_id);

            if let Some(index) = self.position(local) {
                self.notes[index].id = remote;
            }

            if let Some(held) = self.held.remove(&local) {
                self.held.insert(remote, held);
            }

            for in_flight in self.requests.values_mut() {
                if in_flight.note == local {
                    in_flight.note = remote;
                }
            }
        }
    }

    fn send_delete(&mut self, note: NoteId) -> Command {
        let request = self.start(note, RequestKind::Delete);

        Command::Delete { request, note }
    }

    fn start(&mut self, note: NoteId, kind: RequestKind) -> RequestId {
        let request = RequestId(self.next_request);
        self.next_request += 1;

        if let Some(index) = self.position(note) {
            self.notes[index].sync = SyncState::InFlight;
        }

        self.requests.insert(request, InFlight { note, kind });

        request
    }

    fn ignore(&mut self, request: RequestId, in_flight: Option<InFlight>) -> Vec<Command> {
        if let Some(in_flight) = in_flight {
            self.requests.insert(request, in_flight);
        }

        tracing::debug!("Ignoring response to unknown request {request:?}");

        Vec::new()
    }

    fn is_busy(&self, note: NoteId) -> bool {
        self.requests.values().any(|in_flight| in_flight.note == note)
    }

    fn position(&self, note: NoteId) -> Option<usize> {
        self.notes.iter().position(|entry| entry.id == note)
    }
}
