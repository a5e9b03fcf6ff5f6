use chrono::naive::NaiveDateTime;
use uuid::Uuid;

use crate::users::User;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Note {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub version: i32,
    pub being_edited: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Note {
    /// Is the user the owner of this note?
    pub fn is_owned_by(&self, user: &User) -> bool {
        self.user_id == user.id
    }
}

/// A note with the email address of its owner
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct NoteWithOwner {
    #[sqlx(flatten)]
    pub note: Note,
    pub owner_email: String,
}

/// Permission for a user, other than the owner, to read and edit a note
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AccessGrant {
    pub note_id: Uuid,
    pub user_id: Uuid,
    pub granted_by: Uuid,
    pub created_at: NaiveDateTime,
}

/// An access grant with the email address of the grantee
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AccessGrantWithUser {
    #[sqlx(flatten)]
    pub grant: AccessGrant,
    pub email: String,
}
