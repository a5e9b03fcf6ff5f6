//! In-process notes service for the client tests

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use super::ClientError;
use super::api::ListQuery;
use super::api::NotePage;
use super::api::NotesApi;
use super::api::Pagination;
use super::api::RemoteNote;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    List,
    Create(String),
    Update(Uuid, String, i32),
    Delete(Uuid),
    SetEditing(Uuid, bool),
}

/// Keeps notes in memory with the same version checks as the service, and records every call
#[derive(Debug, Default)]
pub struct FakeNotesApi {
    notes: Mutex<Vec<RemoteNote>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<ClientError>>,
}

impl FakeNotesApi {
    /// Add a note as if someone else created it
    pub fn insert(&self, content: &str, version: i32) -> Uuid {
        let note = new_note(content, version);
        let id = note.id;

        self.notes.lock().unwrap().insert(0, note);

        id
    }

    pub fn note(&self, id: Uuid) -> Option<RemoteNote> {
        self.notes
            .lock()
            .unwrap()
            .iter()
            .find(|note| note.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.notes.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// The next call fails with `error`
    pub fn fail_next(&self, error: ClientError) {
        self.failures.lock().unwrap().push_back(error);
    }

    fn record(&self, call: Call) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(call);

        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn new_note(content: &str, version: i32) -> RemoteNote {
    let now = Utc::now().naive_utc();

    RemoteNote {
        id: Uuid::new_v4(),
        content: content.to_string(),
        version,
        being_edited: false,
        owner_id: Uuid::nil(),
        owner_email: Some("alice@example.com".to_string()),
        created_at: now,
        updated_at: now,
    }
}

fn not_found() -> ClientError {
    ClientError::NotFound("Note not found".to_string())
}

impl NotesApi for FakeNotesApi {
    async fn list_notes(&self, _query: &ListQuery) -> Result<NotePage, ClientError> {
        self.record(Call::List)?;

        let notes = self.notes.lock().unwrap().clone();
        let total_notes = notes.len() as u64;

        Ok(NotePage {
            notes,
            pagination: Pagination {
                current_page: 1,
                total_pages: 1,
                total_notes,
                has_next_page: false,
                has_prev_page: false,
            },
        })
    }

    async fn create_note(&self, content: &str) -> Result<RemoteNote, ClientError> {
        self.record(Call::Create(content.to_string()))?;

        let note = new_note(content, 1);
        self.notes.lock().unwrap().insert(0, note.clone());

        Ok(note)
    }

    async fn update_note(
        &self,
        id: Uuid,
        content: &str,
        version: i32,
    ) -> Result<RemoteNote, ClientError> {
        self.record(Call::Update(id, content.to_string(), version))?;

        let mut notes = self.notes.lock().unwrap();
        let note = notes
            .iter_mut()
            .find(|note| note.id == id)
            .ok_or_else(not_found)?;

        if note.version != version {
            return Err(ClientError::Conflict {
                current_version: Some(note.version),
            });
        }

        note.content = content.to_string();
        note.version += 1;
        note.updated_at = Utc::now().naive_utc();

        Ok(note.clone())
    }

    async fn delete_note(&self, id: Uuid) -> Result<(), ClientError> {
        self.record(Call::Delete(id))?;

        let mut notes = self.notes.lock().unwrap();
        let index = notes
            .iter()
            .position(|note| note.id == id)
            .ok_or_else(not_found)?;

        notes.remove(index);

        Ok(())
    }

    async fn set_editing(&self, id: Uuid, editing: bool) -> Result<RemoteNote, ClientError> {
        self.record(Call::SetEditing(id, editing))?;

        let mut notes = self.notes.lock().unwrap();
        let note = notes
            .iter_mut()
            .find(|note| note.id == id)
            .ok_or_else(not_found)?;

        note.being_edited = editing;

        Ok(note.clone())
    }
}
