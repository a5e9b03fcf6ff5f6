//! Memory storage
//!
//! Will be destroyed on system shutdown

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::notes::AccessGrant;
use crate::notes::AccessGrantWithUser;
use crate::notes::Note;
use crate::notes::NoteWithOwner;
use crate::users::PasswordReset;
use crate::users::User;

use super::ChangePasswordValues;
use super::CreateGrantValues;
use super::CreateNoteValues;
use super::CreatePasswordResetValues;
use super::CreateUserValues;
use super::FindNotesValues;
use super::NotePage;
use super::Result;
use super::Storage;
use super::UpdateNoteValues;
use super::VersionedUpdate;

/// An in-memory storage
///
/// Will be destroyed on system shutdown
#[derive(Clone, Debug, Default)]
pub struct Memory {
    /// All users in storage
    users: Arc<Mutex<HashMap<Uuid, User>>>,

    /// All password resets in storage
    password_resets: Arc<Mutex<HashMap<Uuid, PasswordReset>>>,

    /// All notes in storage, in order of creation
    notes: Arc<Mutex<Vec<Note>>>,

    /// All access grants in storage
    grants: Arc<Mutex<Vec<AccessGrant>>>,
}

impl Memory {
    /// Create a new empty Memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for Memory {
    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(id).cloned())
    }

    async fn create_user(&self, values: &CreateUserValues<'_>) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            session_id: *values.session_id,
            email: values.email.to_string(),
            hashed_password: values.hashed_password.to_string(),
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };

        self.users.lock().await.insert(user.id, user.clone());

        Ok(user)
    }

    async fn change_password(
        &self,
        user: &User,
        values: &ChangePasswordValues<'_>,
    ) -> Result<User> {
        let mut users = self.users.lock().await;

        let stored = users.entry(user.id).or_insert_with(|| user.clone());

        stored.session_id = *values.session_id;
        stored.hashed_password = values.hashed_password.to_string();
        stored.updated_at = Utc::now().naive_utc();

        Ok(stored.clone())
    }

    async fn create_password_reset(
        &self,
        values: &CreatePasswordResetValues<'_>,
    ) -> Result<PasswordReset> {
        let reset = PasswordReset {
            id: *values.id,
            user_id: values.user.id,
            hashed_secret: values.hashed_secret.to_string(),
            expires_at: values.expires_at,
            used_at: None,
            created_at: Utc::now().naive_utc(),
        };

        self.password_resets
            .lock()
            .await
            .insert(reset.id, reset.clone());

        Ok(reset)
    }

    async fn find_single_password_reset_by_id(&self, id: &Uuid) -> Result<Option<PasswordReset>> {
        Ok(self.password_resets.lock().await.get(id).cloned())
    }

    async fn use_password_reset(&self, reset: &PasswordReset) -> Result<bool> {
        let mut password_resets = self.password_resets.lock().await;

        match password_resets.get_mut(&reset.id) {
            Some(stored) if stored.used_at.is_none() => {
                stored.used_at = Some(Utc::now().naive_utc());

                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_notes_page(&self, values: &FindNotesValues<'_>) -> Result<NotePage> {
        let granted = self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.user_id == values.user.id)
            .map(|grant| grant.note_id)
            .collect::<Vec<Uuid>>();

        let search = values.search.map(str::to_lowercase);

        let mut visible = self
            .notes
            .lock()
            .await
            .iter()
            .filter(|note| note.user_id == values.user.id || granted.contains(&note.id))
            .filter(|note| {
                search
                    .as_ref()
                    .is_none_or(|search| note.content.to_lowercase().contains(search))
            })
            .cloned()
            .collect::<Vec<Note>>();

        // Newest first, later insertions win ties
        visible.reverse();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = visible.len() as u64;

        let users = self.users.lock().await;

        let notes = visible
            .into_iter()
            .skip(usize::try_from(values.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(values.limit).unwrap_or(usize::MAX))
            .map(|note| NoteWithOwner {
                owner_email: users
                    .get(&note.user_id)
                    .map(|owner| owner.email.clone())
                    .unwrap_or_default(),
                note,
            })
            .collect();

        Ok(NotePage { notes, total })
    }

    async fn find_single_note_by_id(&self, id: &Uuid) -> Result<Option<Note>> {
        Ok(self
            .notes
            .lock()
            .await
            .iter()
            .find(|note| &note.id == id)
            .cloned())
    }

    async fn create_note(&self, values: &CreateNoteValues<'_>) -> Result<Note> {
        let note = Note {
            id: Uuid::new_v4(),
            user_id: values.user.id,
            content: values.content.to_string(),
            version: 1,
            being_edited: false,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };

        self.notes.lock().await.push(note.clone());

        Ok(note)
    }

    async fn update_note_content(
        &self,
        note_id: &Uuid,
        values: &UpdateNoteValues<'_>,
    ) -> Result<VersionedUpdate> {
        // The lock is held from the version check up to the increment
        let mut notes = self.notes.lock().await;

        let Some(note) = notes.iter_mut().find(|note| &note.id == note_id) else {
            return Ok(VersionedUpdate::NotFound);
        };

        if note.version != values.expected_version {
            return Ok(VersionedUpdate::Conflict {
                current_version: note.version,
            });
        }

        note.content = values.content.to_string();
        note.version += 1;
        note.updated_at = Utc::now().naive_utc();

        Ok(VersionedUpdate::Updated(note.clone()))
    }

    async fn set_note_being_edited(&self, note_id: &Uuid, being_edited: bool) -> Result<Option<Note>> {
        Ok(self
            .notes
            .lock()
            .await
            .iter_mut()
            .find(|note| &note.id == note_id)
            .map(|note| {
                note.being_edited = being_edited;

                note.clone()
            }))
    }

    async fn delete_note(&self, note: &Note) -> Result<()> {
        self.notes
            .lock()
            .await
            .retain(|stored| stored.id != note.id);

        self.grants
            .lock()
            .await
            .retain(|grant| grant.note_id != note.id);

        Ok(())
    }

    async fn find_all_grants_by_note(&self, note: &Note) -> Result<Vec<AccessGrantWithUser>> {
        let grants = self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| grant.note_id == note.id)
            .cloned()
            .collect::<Vec<AccessGrant>>();

        let users = self.users.lock().await;

        Ok(grants
            .into_iter()
            .map(|grant| AccessGrantWithUser {
                email: users
                    .get(&grant.user_id)
                    .map(|user| user.email.clone())
                    .unwrap_or_default(),
                grant,
            })
            .collect())
    }

    async fn find_single_grant(&self, note_id: &Uuid, user_id: &Uuid) -> Result<Option<AccessGrant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .find(|grant| &grant.note_id == note_id && &grant.user_id == user_id)
            .cloned())
    }

    async fn create_grant(&self, values: &CreateGrantValues<'_>) -> Result<AccessGrant> {
        let grant = AccessGrant {
            note_id: values.note.id,
            user_id: values.user.id,
            granted_by: values.granted_by.id,
            created_at: Utc::now().naive_utc(),
        };

        let mut grants = self.grants.lock().await;

        if let Some(existing) = grants
            .iter()
            .find(|existing| existing.note_id == grant.note_id && existing.user_id == grant.user_id)
        {
            return Ok(existing.clone());
        }

        grants.push(grant.clone());

        Ok(grant)
    }

    async fn delete_grant(&self, grant: &AccessGrant) -> Result<()> {
        self.grants
            .lock()
            .await
            .retain(|stored| !(stored.note_id == grant.note_id && stored.user_id == grant.user_id));

        Ok(())
    }
}
