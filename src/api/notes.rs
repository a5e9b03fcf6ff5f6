//! Notes API management
//!
//! Notes are visible to their owner and to everyone the owner shared them with. Updates are
//! version checked: a client sends the version it based its change on, when someone else changed
//! the note in the meantime the update is refused with a conflict.

use std::convert::Infallible;

use axum::Extension;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use chrono::NaiveDateTime;
use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::changes::ChangeFeed;
use crate::changes::ChangeKind;
use crate::notes::Note;
use crate::notes::NoteWithOwner;
use crate::storage::CreateNoteValues;
use crate::storage::FindNotesValues;
use crate::storage::Storage;
use crate::storage::UpdateNoteValues;
use crate::storage::VersionedUpdate;

use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::QueryParameters;
use super::Success;
use super::request::parse_content;
use super::utils::audience_of;
use super::utils::ensure_can_access;
use super::utils::ensure_owner;
use super::utils::fetch_note;
use super::utils::publish_change;

/// Default number of notes on a page
const DEFAULT_LIMIT: u64 = 10;

/// Maximum number of notes on a page
const MAXIMUM_LIMIT: u64 = 100;

/// Version assumed for clients that never received one
const DEFAULT_VERSION: i32 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteResponse {
    pub id: Uuid,
    pub content: String,
    pub version: i32,
    pub being_edited: bool,
    pub owner_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NoteResponse {
    fn from_note(note: Note) -> Self {
        Self {
            id: note.id,
            content: note.content,
            version: note.version,
            being_edited: note.being_edited,
            owner_id: note.user_id,
            owner_email: None,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }

    fn from_note_with_owner(note: NoteWithOwner) -> Self {
        Self {
            owner_email: Some(note.owner_email),
            ..Self::from_note(note.note)
        }
    }

    fn from_note_with_owner_multiple(mut notes: Vec<NoteWithOwner>) -> Vec<Self> {
        notes
            .drain(..)
            .map(Self::from_note_with_owner)
            .collect::<Vec<Self>>()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationResponse {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_notes: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PaginationResponse {
    fn new(page: u64, limit: u64, total_notes: u64) -> Self {
        let total_pages = total_notes.div_ceil(limit).max(1);

        Self {
            current_page: page,
            total_pages,
            total_notes,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NoteListResponse {
    pub notes: Vec<NoteResponse>,
    pub pagination: PaginationResponse,
}

#[derive(Debug, Deserialize)]
pub struct ListNotesQuery {
    page: Option<u64>,
    limit: Option<u64>,
    search: Option<String>,
}

/// List the notes of the current user, and the notes shared with them
///
/// Newest notes first
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     'http://localhost:6000/api/notes?page=1&limit=10&search=groceries'
/// ```
///
/// Response:
/// ```json
/// { "data": { "notes": [ ... ], "pagination": { "currentPage": 1, "totalPages": 1, ... } } }
/// ```
pub async fn list<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    QueryParameters(query): QueryParameters<ListNotesQuery>,
) -> Result<Success<NoteListResponse>, Error> {
    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(Error::bad_request("Page should be at least 1"));
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAXIMUM_LIMIT).contains(&limit) {
        return Err(Error::bad_request(format!(
            "Limit should be between 1 and {MAXIMUM_LIMIT}"
        )));
    }

    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|search| !search.is_empty());

    let values = FindNotesValues {
        user: &current_user,
        search,
        offset: (page - 1).saturating_mul(limit),
        limit,
    };

    let note_page = storage
        .find_notes_page(&values)
        .await
        .map_err(Error::internal_server_error)?;

    Ok(Success::ok(NoteListResponse {
        notes: NoteResponse::from_note_with_owner_multiple(note_page.notes),
        pagination: PaginationResponse::new(page, limit, note_page.total),
    }))
}

pub async fn single<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(note_id): PathParameters<Uuid>,
) -> Result<Success<NoteResponse>, Error> {
    let note = fetch_note(&storage, &note_id).await?;

    ensure_can_access(&storage, &current_user, &note).await?;

    Ok(Success::ok(NoteResponse::from_note(note)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNoteForm {
    content: String,
}

/// Create a note, owned by the current user
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "content": "Groceries" }' \
///     http://localhost:6000/api/notes
/// ```
pub async fn create<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(change_feed): Extension<ChangeFeed>,
    current_user: CurrentUser<S>,
    Form(form): Form<CreateNoteForm>,
) -> Result<Success<NoteResponse>, Error> {
    let content = parse_content(&form.content)?;

    let values = CreateNoteValues {
        user: &current_user,
        content: &content,
    };

    let note = storage
        .create_note(&values)
        .await
        .map_err(Error::internal_server_error)?;

    publish_change(&change_feed, ChangeKind::Created, &note, vec![note.user_id]);

    Ok(Success::created(NoteResponse::from_note(note)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNoteForm {
    content: String,

    /// The version the change is based on
    version: Option<i32>,
}

/// Update the content of a note
///
/// The owner and everyone the note is shared with can update it. The update only succeeds when
/// `version` is still the version of the note, otherwise `409 Conflict` is returned together with
/// the current version.
///
/// Request:
/// ```sh
/// curl -v -XPATCH -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "content": "Groceries and more", "version": 3 }' \
///     http://localhost:6000/api/notes/<uuid>
/// ```
///
/// Conflict response:
/// ```json
/// { "error": "Note was modified by another user, please reload", "conflict": true, "currentVersion": 4 }
/// ```
pub async fn update<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(change_feed): Extension<ChangeFeed>,
    current_user: CurrentUser<S>,
    PathParameters(note_id): PathParameters<Uuid>,
    Form(form): Form<UpdateNoteForm>,
) -> Result<Success<NoteResponse>, Error> {
    let content = parse_content(&form.content)?;

    let note = fetch_note(&storage, &note_id).await?;

    ensure_can_access(&storage, &current_user, &note).await?;

    let values = UpdateNoteValues {
        content: &content,
        expected_version: form.version.unwrap_or(DEFAULT_VERSION),
    };

    let updated = storage
        .update_note_content(&note.id, &values)
        .await
        .map_err(Error::internal_server_error)?;

    let note = match updated {
        VersionedUpdate::Updated(note) => note,
        VersionedUpdate::Conflict { current_version } => {
            tracing::debug!(
                "Version conflict on note {note_id}: expected {}, current {current_version}",
                values.expected_version
            );

            return Err(Error::conflict(current_version));
        }
        VersionedUpdate::NotFound => return Err(Error::not_found("Note not found")),
    };

    let audience = audience_of(&storage, &note).await?;
    publish_change(&change_feed, ChangeKind::Updated, &note, audience);

    Ok(Success::ok(NoteResponse::from_note(note)))
}

/// Delete a note, only the owner can do this
///
/// All access grants of the note are removed as well
pub async fn delete<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(change_feed): Extension<ChangeFeed>,
    current_user: CurrentUser<S>,
    PathParameters(note_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    let note = fetch_note(&storage, &note_id).await?;

    ensure_owner(&current_user, &note)?;

    let audience = audience_of(&storage, &note).await?;

    storage
        .delete_note(&note)
        .await
        .map_err(Error::internal_server_error)?;

    publish_change(&change_feed, ChangeKind::Deleted, &note, audience);

    Ok(Success::<&'static str>::no_content())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditingForm {
    editing: bool,
}

/// Mark a note as being edited, or not
///
/// Advisory only, it never blocks an update
pub async fn editing<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(change_feed): Extension<ChangeFeed>,
    current_user: CurrentUser<S>,
    PathParameters(note_id): PathParameters<Uuid>,
    Form(form): Form<EditingForm>,
) -> Result<Success<NoteResponse>, Error> {
    let note = fetch_note(&storage, &note_id).await?;

    ensure_can_access(&storage, &current_user, &note).await?;

    let note = storage
        .set_note_being_edited(&note.id, form.editing)
        .await
        .map_err(Error::internal_server_error)?
        .map_or_else(|| Err(Error::not_found("Note not found")), Ok)?;

    let audience = audience_of(&storage, &note).await?;
    publish_change(&change_feed, ChangeKind::Updated, &note, audience);

    Ok(Success::ok(NoteResponse::from_note(note)))
}

/// Stream the changes of all notes visible to the current user
///
/// Server-Sent Events, one event per change, named `noteCreated`, `noteUpdated` or `noteDeleted`.
/// There is no ordering or delivery guarantee, use the events as a trigger to refetch.
///
/// Request:
/// ```sh
/// curl -N -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/notes/changes
/// ```
pub async fn changes<S: Storage>(
    Extension(change_feed): Extension<ChangeFeed>,
    current_user: CurrentUser<S>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = change_feed.stream_for(current_user.id).filter_map(|change| async move {
        match Event::default()
            .event(change.kind.as_event_name())
            .json_data(&change)
        {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                tracing::error!("Could not serialize note change: {err}");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
