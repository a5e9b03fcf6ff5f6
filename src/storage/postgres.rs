//! Postgres storage

use std::time::Duration;

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::notes::AccessGrant;
use crate::notes::AccessGrantWithUser;
use crate::notes::Note;
use crate::notes::NoteWithOwner;
use crate::users::PasswordReset;
use crate::users::User;
use crate::utils::escape_like;

use super::ChangePasswordValues;
use super::CreateGrantValues;
use super::CreateNoteValues;
use super::CreatePasswordResetValues;
use super::CreateUserValues;
use super::Error;
use super::FindNotesValues;
use super::NotePage;
use super::Result;
use super::Storage;
use super::UpdateNoteValues;
use super::VersionedUpdate;

/// Migrator to run migrations on startup
static MIGRATOR: Migrator = sqlx::migrate!();

/// Postgres storage
#[derive(Clone)]
pub struct Postgres {
    /// Pool of connections
    connection_pool: PgPool,
}

impl Postgres {
    /// Connect to the database behind `database_url`
    ///
    /// Migrations will be run
    pub async fn connect(database_url: &str) -> Result<Self> {
        let connection_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
            .map_err(connection_error)?;

        Self::with_pool(connection_pool).await
    }

    /// Create Postgres storage with existing pool
    ///
    /// Migrations will be run
    pub async fn with_pool(connection_pool: PgPool) -> Result<Self> {
        MIGRATOR
            .run(&connection_pool)
            .await
            .map_err(|err| Error::Migration(err.to_string()))?;

        Ok(Self { connection_pool })
    }
}

/// Clamp a page value into the range Postgres accepts for `LIMIT`/`OFFSET`
fn to_bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Storage for Postgres {
    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r"
            SELECT *
            FROM users
            WHERE LOWER(email) = LOWER($1)
            LIMIT 1
            ",
        )
        .bind(email)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r"
            SELECT *
            FROM users
            WHERE id = $1
            LIMIT 1
            ",
        )
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn create_user(&self, values: &CreateUserValues<'_>) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r"
            INSERT INTO users (id, session_id, email, hashed_password)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(values.session_id)
        .bind(values.email)
        .bind(values.hashed_password)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn change_password(
        &self,
        user: &User,
        values: &ChangePasswordValues<'_>,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r"
            UPDATE users
            SET session_id = $1, hashed_password = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING *
            ",
        )
        .bind(values.session_id)
        .bind(values.hashed_password)
        .bind(user.id)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn create_password_reset(
        &self,
        values: &CreatePasswordResetValues<'_>,
    ) -> Result<PasswordReset> {
        let reset = sqlx::query_as::<_, PasswordReset>(
            r"
            INSERT INTO password_resets (id, user_id, hashed_secret, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(values.id)
        .bind(values.user.id)
        .bind(values.hashed_secret)
        .bind(values.expires_at)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(reset)
    }

    async fn find_single_password_reset_by_id(&self, id: &Uuid) -> Result<Option<PasswordReset>> {
        let reset = sqlx::query_as::<_, PasswordReset>(
            r"
            SELECT *
            FROM password_resets
            WHERE id = $1
            LIMIT 1
            ",
        )
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(reset)
    }

    async fn use_password_reset(&self, reset: &PasswordReset) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE password_resets
            SET used_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND used_at IS NULL
            ",
        )
        .bind(reset.id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_notes_page(&self, values: &FindNotesValues<'_>) -> Result<NotePage> {
        let search = values
            .search
            .map(|search| format!("%{}%", escape_like(search)));

        let total = sqlx::query_scalar::<_, i64>(
            r"
            SELECT COUNT(*)
            FROM notes
            WHERE (
                    notes.user_id = $1
                    OR EXISTS (
                        SELECT 1 FROM note_access
                        WHERE note_access.note_id = notes.id AND note_access.user_id = $1
                    )
                )
                AND ($2::TEXT IS NULL OR notes.content ILIKE $2)
            ",
        )
        .bind(values.user.id)
        .bind(search.as_deref())
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        let notes = sqlx::query_as::<_, NoteWithOwner>(
            r"
            SELECT notes.*, users.email AS owner_email
            FROM notes
            INNER JOIN users ON users.id = notes.user_id
            WHERE (
                    notes.user_id = $1
                    OR EXISTS (
                        SELECT 1 FROM note_access
                        WHERE note_access.note_id = notes.id AND note_access.user_id = $1
                    )
                )
                AND ($2::TEXT IS NULL OR notes.content ILIKE $2)
            ORDER BY notes.created_at DESC, notes.id
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(values.user.id)
        .bind(search.as_deref())
        .bind(to_bigint(values.limit))
        .bind(to_bigint(values.offset))
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(NotePage {
            notes,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn find_single_note_by_id(&self, id: &Uuid) -> Result<Option<Note>> {
        let note = sqlx::query_as::<_, Note>(
            r"
            SELECT *
            FROM notes
            WHERE id = $1
            LIMIT 1
            ",
        )
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(note)
    }

    async fn create_note(&self, values: &CreateNoteValues<'_>) -> Result<Note> {
        let note = sqlx::query_as::<_, Note>(
            r"
            INSERT INTO notes (id, user_id, content)
            VALUES ($1, $2, $3)
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(values.user.id)
        .bind(values.content)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(note)
    }

    async fn update_note_content(
        &self,
        note_id: &Uuid,
        values: &UpdateNoteValues<'_>,
    ) -> Result<VersionedUpdate> {
        // Matching on the version in the same statement makes check and increment one step
        let updated_note = sqlx::query_as::<_, Note>(
            r"
            UPDATE notes
            SET content = $1, version = version + 1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND version = $3
            RETURNING *
            ",
        )
        .bind(values.content)
        .bind(note_id)
        .bind(values.expected_version)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        if let Some(note) = updated_note {
            return Ok(VersionedUpdate::Updated(note));
        }

        let current_version = sqlx::query_scalar::<_, i32>(
            r"
            SELECT version
            FROM notes
            WHERE id = $1
            ",
        )
        .bind(note_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(match current_version {
            Some(current_version) => VersionedUpdate::Conflict { current_version },
            None => VersionedUpdate::NotFound,
        })
    }

    async fn set_note_being_edited(&self, note_id: &Uuid, being_edited: bool) -> Result<Option<Note>> {
        let note = sqlx::query_as::<_, Note>(
            r"
            UPDATE notes
            SET being_edited = $1
            WHERE id = $2
            RETURNING *
            ",
        )
        .bind(being_edited)
        .bind(note_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(note)
    }

    async fn delete_note(&self, note: &Note) -> Result<()> {
        let mut transaction = self
            .connection_pool
            .begin()
            .await
            .map_err(connection_error)?;

        sqlx::query(
            r"
            DELETE FROM note_access
            WHERE note_id = $1
            ",
        )
        .bind(note.id)
        .execute(&mut *transaction)
        .await
        .map_err(connection_error)?;

        sqlx::query(
            r"
            DELETE FROM notes
            WHERE id = $1
            ",
        )
        .bind(note.id)
        .execute(&mut *transaction)
        .await
        .map_err(connection_error)?;

        transaction.commit().await.map_err(connection_error)?;

        Ok(())
    }

    async fn find_all_grants_by_note(&self, note: &Note) -> Result<Vec<AccessGrantWithUser>> {
        let grants = sqlx::query_as::<_, AccessGrantWithUser>(
            r"
            SELECT note_access.*, users.email
            FROM note_access
            INNER JOIN users ON users.id = note_access.user_id
            WHERE note_access.note_id = $1
            ORDER BY note_access.created_at
            ",
        )
        .bind(note.id)
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(grants)
    }

    async fn find_single_grant(&self, note_id: &Uuid, user_id: &Uuid) -> Result<Option<AccessGrant>> {
        let grant = sqlx::query_as::<_, AccessGrant>(
            r"
            SELECT *
            FROM note_access
            WHERE note_id = $1 AND user_id = $2
            LIMIT 1
            ",
        )
        .bind(note_id)
        .bind(user_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(grant)
    }

    async fn create_grant(&self, values: &CreateGrantValues<'_>) -> Result<AccessGrant> {
        let grant = sqlx::query_as::<_, AccessGrant>(
            r"
            INSERT INTO note_access (note_id, user_id, granted_by)
            VALUES ($1, $2, $3)
            ON CONFLICT (note_id, user_id) DO UPDATE SET granted_by = note_access.granted_by
            RETURNING *
            ",
        )
        .bind(values.note.id)
        .bind(values.user.id)
        .bind(values.granted_by.id)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(grant)
    }

    async fn delete_grant(&self, grant: &AccessGrant) -> Result<()> {
        sqlx::query(
            r"
            DELETE FROM note_access
            WHERE note_id = $1 AND user_id = $2
            ",
        )
        .bind(grant.note_id)
        .bind(grant.user_id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }
}

/// Convert `SQLx` to storage connection error
fn connection_error<E>(err: E) -> Error
where
    E: std::error::Error,
{
    Error::Connection(err.to_string())
}
