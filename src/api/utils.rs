//! Utility functions for the API

use chrono::Utc;
use uuid::Uuid;

use crate::api::Error;
use crate::changes::ChangeFeed;
use crate::changes::ChangeKind;
use crate::changes::NoteChange;
use crate::notes::Note;
use crate::storage::Storage;
use crate::users::User;

/// Fetch note from storage
pub async fn fetch_note<S: Storage>(storage: &S, note_id: &Uuid) -> Result<Note, Error> {
    storage
        .find_single_note_by_id(note_id)
        .await
        .map_err(Error::internal_server_error)?
        .map_or_else(|| Err(Error::not_found("Note not found")), Ok)
}

/// Fetch user from storage by email
pub async fn fetch_user_by_email<S: Storage>(storage: &S, email: &str) -> Result<User, Error> {
    storage
        .find_single_user_by_email(email)
        .await
        .map_err(Error::internal_server_error)?
        .map_or_else(|| Err(Error::not_found("User not found")), Ok)
}

/// Allow the owner of the note, and users it is shared with
pub async fn ensure_can_access<S: Storage>(
    storage: &S,
    user: &User,
    note: &Note,
) -> Result<(), Error> {
    if note.is_owned_by(user) {
        return Ok(());
    }

    let grant = storage
        .find_single_grant(&note.id, &user.id)
        .await
        .map_err(Error::internal_server_error)?;

    if grant.is_some() {
        Ok(())
    } else {
        Err(Error::forbidden("No access to this note"))
    }
}

/// Allow the owner of the note only
pub fn ensure_owner(user: &User, note: &Note) -> Result<(), Error> {
    if note.is_owned_by(user) {
        Ok(())
    } else {
        Err(Error::forbidden("Only the owner of the note is allowed to do this"))
    }
}

/// Users who can see the note: its owner and everyone it is shared with
///
/// The audience has to be collected before a delete, the grants are gone afterwards
pub async fn audience_of<S: Storage>(storage: &S, note: &Note) -> Result<Vec<Uuid>, Error> {
    let grants = storage
        .find_all_grants_by_note(note)
        .await
        .map_err(Error::internal_server_error)?;

    let mut audience = Vec::with_capacity(grants.len() + 1);
    audience.push(note.user_id);
    audience.extend(grants.into_iter().map(|grant| grant.grant.user_id));

    Ok(audience)
}

/// Publish a change of a note on the feed
pub fn publish_change(
    change_feed: &ChangeFeed,
    kind: ChangeKind,
    note: &Note,
    audience: Vec<Uuid>,
) {
    change_feed.publish(NoteChange {
        kind,
        note_id: note.id,
        version: (kind != ChangeKind::Deleted).then_some(note.version),
        audience,
        at: Utc::now(),
    });
}
