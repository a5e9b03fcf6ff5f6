//! All things related to the storage of users, notes and access grants

use std::future::Future;

use chrono::NaiveDateTime;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::notes::AccessGrant;
use crate::notes::AccessGrantWithUser;
use crate::notes::Note;
use crate::notes::NoteWithOwner;
use crate::users::PasswordReset;
use crate::users::User;

pub use memory::Memory;
pub use postgres::Postgres;

mod memory;
mod postgres;

/// Storage configuration
pub enum StorageConfig {
    /// Use Postgres when `DATABASE_URL` is set, memory otherwise
    DetectConfig,

    /// Always use memory, will be destroyed on shutdown
    Memory,

    /// Use existing Postgres connection
    ExistingConnection(PgPool),
}

/// Storage errors
#[derive(Debug, Error)]
pub enum Error {
    /// A connection error with the storage
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migrations could not be applied
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Result type for all storage interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Values to create a User
pub struct CreateUserValues<'a> {
    /// The initial session ID for the user
    pub session_id: &'a Uuid,

    /// The email address, already validated
    pub email: &'a str,

    /// The hashed password
    pub hashed_password: &'a str,
}

/// Values to change a password of a user
pub struct ChangePasswordValues<'a> {
    /// New session ID to invalidate current tokens
    pub session_id: &'a Uuid,

    /// The new hashed password
    pub hashed_password: &'a str,
}

/// Values to create a password reset
pub struct CreatePasswordResetValues<'a> {
    /// ID of the reset, part of the token
    pub id: &'a Uuid,

    /// User requesting the reset
    pub user: &'a User,

    /// Hash of the secret part of the token
    pub hashed_secret: &'a str,

    /// Moment the reset can no longer be used
    pub expires_at: NaiveDateTime,
}

/// Values to find a page of notes visible to a user
pub struct FindNotesValues<'a> {
    /// Notes owned by or shared with this user
    pub user: &'a User,

    /// Optional case-insensitive search in the content
    pub search: Option<&'a str>,

    /// Number of notes to skip
    pub offset: u64,

    /// Maximum number of notes to return
    pub limit: u64,
}

/// A page of notes
#[derive(Debug)]
pub struct NotePage {
    /// Notes on this page, newest first
    pub notes: Vec<NoteWithOwner>,

    /// Total number of notes matching, over all pages
    pub total: u64,
}

/// Values to create a Note
pub struct CreateNoteValues<'a> {
    /// User creating, and owning, the note
    pub user: &'a User,

    /// Content of the note, already validated
    pub content: &'a str,
}

/// Values to update the content of a Note
pub struct UpdateNoteValues<'a> {
    /// New content of the note, already validated
    pub content: &'a str,

    /// The version the client based its change on
    pub expected_version: i32,
}

/// The result of a version-checked update
#[derive(Debug)]
pub enum VersionedUpdate {
    /// The version matched, the note is updated and its version incremented
    Updated(Note),

    /// The version did not match, nothing changed
    Conflict {
        /// The version currently stored
        current_version: i32,
    },

    /// The note does not exist (anymore)
    NotFound,
}

/// Values to create an AccessGrant
pub struct CreateGrantValues<'a> {
    /// Note to share
    pub note: &'a Note,

    /// User receiving access
    pub user: &'a User,

    /// Owner granting the access
    pub granted_by: &'a User,
}

/// Storage with all supported operations
pub trait Storage: Clone + Send + Sync + 'static {
    /// Finds a single user by its email address
    fn find_single_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<User>>> + Send;

    /// Finds a single user by its ID
    fn find_single_user_by_id(&self, id: &Uuid)
    -> impl Future<Output = Result<Option<User>>> + Send;

    /// Create a single user
    fn create_user(&self, values: &CreateUserValues) -> impl Future<Output = Result<User>> + Send;

    /// Change the password of a user
    fn change_password(
        &self,
        user: &User,
        values: &ChangePasswordValues,
    ) -> impl Future<Output = Result<User>> + Send;

    /// Create a password reset
    fn create_password_reset(
        &self,
        values: &CreatePasswordResetValues,
    ) -> impl Future<Output = Result<PasswordReset>> + Send;

    /// Find a password reset by its ID
    fn find_single_password_reset_by_id(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<PasswordReset>>> + Send;

    /// Mark a password reset as used
    ///
    /// Returns `false` when it was already used, a reset can only be used once
    fn use_password_reset(&self, reset: &PasswordReset)
    -> impl Future<Output = Result<bool>> + Send;

    /// Find a page of notes owned by or shared with a user
    fn find_notes_page(
        &self,
        values: &FindNotesValues,
    ) -> impl Future<Output = Result<NotePage>> + Send;

    /// Find a single note by ID
    fn find_single_note_by_id(&self, id: &Uuid)
    -> impl Future<Output = Result<Option<Note>>> + Send;

    /// Create a note, starting at version 1
    fn create_note(&self, values: &CreateNoteValues) -> impl Future<Output = Result<Note>> + Send;

    /// Update the content of a note, if the expected version is still the stored version
    ///
    /// The check and the increment are a single indivisible operation
    fn update_note_content(
        &self,
        note_id: &Uuid,
        values: &UpdateNoteValues,
    ) -> impl Future<Output = Result<VersionedUpdate>> + Send;

    /// Set the advisory "being edited" flag of a note
    ///
    /// Returns `None` when the note does not exist (anymore)
    fn set_note_being_edited(
        &self,
        note_id: &Uuid,
        being_edited: bool,
    ) -> impl Future<Output = Result<Option<Note>>> + Send;

    /// Delete a note, including all its access grants
    fn delete_note(&self, note: &Note) -> impl Future<Output = Result<()>> + Send;

    /// Find all access grants of a note
    fn find_all_grants_by_note(
        &self,
        note: &Note,
    ) -> impl Future<Output = Result<Vec<AccessGrantWithUser>>> + Send;

    /// Find the access grant of a user for a note
    fn find_single_grant(
        &self,
        note_id: &Uuid,
        user_id: &Uuid,
    ) -> impl Future<Output = Result<Option<AccessGrant>>> + Send;

    /// Create an access grant
    fn create_grant(
        &self,
        values: &CreateGrantValues,
    ) -> impl Future<Output = Result<AccessGrant>> + Send;

    /// Delete an access grant
    fn delete_grant(&self, grant: &AccessGrant) -> impl Future<Output = Result<()>> + Send;
}
