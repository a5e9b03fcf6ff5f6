//! Sharing notes with other users
//!
//! Only the owner of a note can see, add and remove access grants. A grant allows reading and
//! updating the note, never deleting it or sharing it further.

use axum::Extension;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::changes::ChangeFeed;
use crate::changes::ChangeKind;
use crate::notes::AccessGrant;
use crate::notes::AccessGrantWithUser;
use crate::storage::CreateGrantValues;
use crate::storage::Storage;

use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;
use super::request::parse_email;
use super::utils::audience_of;
use super::utils::ensure_owner;
use super::utils::fetch_note;
use super::utils::fetch_user_by_email;
use super::utils::publish_change;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrantResponse {
    pub note_id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub granted_by: Uuid,
    pub created_at: NaiveDateTime,
}

impl AccessGrantResponse {
    fn from_grant(grant: AccessGrant) -> Self {
        Self {
            note_id: grant.note_id,
            user_id: grant.user_id,
            email: None,
            granted_by: grant.granted_by,
            created_at: grant.created_at,
        }
    }

    fn from_grant_with_user(grant: AccessGrantWithUser) -> Self {
        Self {
            email: Some(grant.email),
            ..Self::from_grant(grant.grant)
        }
    }

    fn from_grant_with_user_multiple(mut grants: Vec<AccessGrantWithUser>) -> Vec<Self> {
        grants
            .drain(..)
            .map(Self::from_grant_with_user)
            .collect::<Vec<Self>>()
    }
}

/// List everyone a note is shared with
pub async fn list<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(note_id): PathParameters<Uuid>,
) -> Result<Success<Vec<AccessGrantResponse>>, Error> {
    let note = fetch_note(&storage, &note_id).await?;

    ensure_owner(&current_user, &note)?;

    let grants = storage
        .find_all_grants_by_note(&note)
        .await
        .map_err(Error::internal_server_error)?;

    Ok(Success::ok(
        AccessGrantResponse::from_grant_with_user_multiple(grants),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccessForm {
    /// Email address of the user to share the note with
    email: String,
}

/// Share a note with another user
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "email": "bob@example.com" }' \
///     http://localhost:6000/api/notes/<uuid>/access
/// ```
pub async fn create<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(change_feed): Extension<ChangeFeed>,
    current_user: CurrentUser<S>,
    PathParameters(note_id): PathParameters<Uuid>,
    Form(form): Form<CreateAccessForm>,
) -> Result<Success<AccessGrantResponse>, Error> {
    let email = parse_email(&form.email)?;

    let note = fetch_note(&storage, &note_id).await?;

    ensure_owner(&current_user, &note)?;

    let user = fetch_user_by_email(&storage, &email).await?;

    if note.is_owned_by(&user) {
        return Err(Error::bad_request("Can not share a note with its owner"));
    }

    let existing_grant = storage
        .find_single_grant(&note.id, &user.id)
        .await
        .map_err(Error::internal_server_error)?;

    if existing_grant.is_some() {
        return Err(Error::bad_request("Note is already shared with this user"));
    }

    let values = CreateGrantValues {
        note: &note,
        user: &user,
        granted_by: &current_user,
    };

    let grant = storage
        .create_grant(&values)
        .await
        .map_err(Error::internal_server_error)?;

    let audience = audience_of(&storage, &note).await?;
    publish_change(&change_feed, ChangeKind::Updated, &note, audience);

    Ok(Success::created(AccessGrantResponse {
        email: Some(user.email),
        ..AccessGrantResponse::from_grant(grant)
    }))
}

/// Stop sharing a note with a user
pub async fn delete<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(change_feed): Extension<ChangeFeed>,
    current_user: CurrentUser<S>,
    PathParameters((note_id, user_id)): PathParameters<(Uuid, Uuid)>,
) -> Result<Success<&'static str>, Error> {
    let note = fetch_note(&storage, &note_id).await?;

    ensure_owner(&current_user, &note)?;

    let grant = storage
        .find_single_grant(&note.id, &user_id)
        .await
        .map_err(Error::internal_server_error)?
        .map_or_else(|| Err(Error::not_found("Access grant not found")), Ok)?;

    // The user losing access still needs to hear about it
    let audience = audience_of(&storage, &note).await?;

    storage
        .delete_grant(&grant)
        .await
        .map_err(Error::internal_server_error)?;

    publish_change(&change_feed, ChangeKind::Updated, &note, audience);

    Ok(Success::<&'static str>::no_content())
}
