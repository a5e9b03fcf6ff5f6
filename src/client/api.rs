//! Talking to the notes service
//!
//! [`NotesApi`] is the seam between the client state and the network, [`HttpNotesApi`] is the
//! implementation over HTTP.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::Client;
use reqwest::Response;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;
use uuid::Uuid;

use super::ClientError;

/// Default upper bound for a single request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity of a note on the client
///
/// Notes created locally get a temporary ID until the service assigns the real one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum NoteId {
    /// Temporary ID, generated by the client
    Local(Uuid),

    /// ID assigned by the service
    Remote(Uuid),
}

impl NoteId {
    /// The ID on the service, when known
    pub fn remote(self) -> Option<Uuid> {
        match self {
            Self::Local(_) => None,
            Self::Remote(id) => Some(id),
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{id}"),
            Self::Remote(id) => write!(f, "{id}"),
        }
    }
}

/// A note as the service knows it
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNote {
    pub id: Uuid,
    pub content: String,
    pub version: i32,
    #[serde(default)]
    pub being_edited: bool,
    pub owner_id: Uuid,
    /// Only part of note listings
    #[serde(default)]
    pub owner_email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_notes: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// A page of notes
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NotePage {
    pub notes: Vec<RemoteNote>,
    pub pagination: Pagination,
}

/// Which page of notes to list
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// All note operations of the service
pub trait NotesApi: Send + Sync + 'static {
    /// List a page of visible notes, newest first
    fn list_notes(
        &self,
        query: &ListQuery,
    ) -> impl Future<Output = Result<NotePage, ClientError>> + Send;

    /// Create a note, starting at version 1
    fn create_note(
        &self,
        content: &str,
    ) -> impl Future<Output = Result<RemoteNote, ClientError>> + Send;

    /// Update a note, based on `version`
    fn update_note(
        &self,
        id: Uuid,
        content: &str,
        version: i32,
    ) -> impl Future<Output = Result<RemoteNote, ClientError>> + Send;

    /// Delete a note
    fn delete_note(&self, id: Uuid) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Flag a note as being edited, or not
    fn set_editing(
        &self,
        id: Uuid,
        editing: bool,
    ) -> impl Future<Output = Result<RemoteNote, ClientError>> + Send;
}

/// Configuration of the HTTP client
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Where the service lives, paths like `api/notes` are joined to it
    pub base_url: Url,

    /// Access token from `/api/users/token`
    pub access_token: String,

    /// Upper bound for a single request
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: Url, access_token: impl Into<String>) -> Self {
        Self {
            base_url,
            access_token: access_token.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// [`NotesApi`] over HTTP
#[derive(Clone, Debug)]
pub struct HttpNotesApi {
    client: Client,
    base_url: Url,
    access_token: String,
}

impl HttpNotesApi {
    /// Create the client, requests fail as transient after `config.timeout`
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url,
            access_token: config.access_token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|err| ClientError::Validation(format!("Invalid URL: {err}")))
    }

    fn note_url(&self, id: Uuid, suffix: &str) -> Result<Url, ClientError> {
        self.url(&format!("api/notes/{id}{suffix}"))
    }
}

impl NotesApi for HttpNotesApi {
    async fn list_notes(&self, query: &ListQuery) -> Result<NotePage, ClientError> {
        let response = self
            .client
            .get(self.url("api/notes")?)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;

        parse_response(response).await
    }

    async fn create_note(&self, content: &str) -> Result<RemoteNote, ClientError> {
        let response = self
            .client
            .post(self.url("api/notes")?)
            .bearer_auth(&self.access_token)
            .json(&json!({ "content": content }))
            .send()
            .await?;

        parse_response(response).await
    }

    async fn update_note(
        &self,
        id: Uuid,
        content: &str,
        version: i32,
    ) -> Result<RemoteNote, ClientError> {
        let response = self
            .client
            .patch(self.note_url(id, "")?)
            .bearer_auth(&self.access_token)
            .json(&json!({ "content": content, "version": version }))
            .send()
            .await?;

        parse_response(response).await
    }

    async fn delete_note(&self, id: Uuid) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.note_url(id, "")?)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        check_status(response).await
    }

    async fn set_editing(&self, id: Uuid, editing: bool) -> Result<RemoteNote, ClientError> {
        let response = self
            .client
            .post(self.note_url(id, "/editing")?)
            .bearer_auth(&self.access_token)
            .json(&json!({ "editing": editing }))
            .send()
            .await?;

        parse_response(response).await
    }
}

/// Parse the `data` of a successful response, or the error of a failed one
async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status().as_u16();
    let body = response.bytes().await?;

    if (200..300).contains(&status) {
        decode_data(&body)
    } else {
        Err(error_from_status(status, &body))
    }
}

/// Only check the status, discarding the body
async fn check_status(response: Response) -> Result<(), ClientError> {
    let status = response.status().as_u16();

    if (200..300).contains(&status) {
        return Ok(());
    }

    let body = response.bytes().await?;

    Err(error_from_status(status, &body))
}

/// Take the `data` out of a success body
pub(crate) fn decode_data<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClientError> {
    #[derive(Deserialize)]
    struct DataWrapper<T> {
        data: T,
    }

    serde_json::from_slice::<DataWrapper<T>>(body)
        .map(|wrapper| wrapper.data)
        .map_err(|err| ClientError::Decode(err.to_string()))
}

/// Turn a failed response into the matching error
pub(crate) fn error_from_status(status: u16, body: &[u8]) -> ClientError {
    #[derive(Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        current_version: Option<i32>,
    }

    let body = serde_json::from_slice::<ErrorBody>(body).unwrap_or_default();
    let message = body
        .error
        .unwrap_or_else(|| format!("Request failed with status {status}"));

    match status {
        400 | 422 => ClientError::Validation(message),
        401 => ClientError::Unauthenticated,
        403 => ClientError::Forbidden(message),
        404 => ClientError::NotFound(message),
        409 => ClientError::Conflict {
            current_version: body.current_version,
        },
        408 | 429 | 502..=504 => ClientError::Transient(message),
        _ => ClientError::Server(message),
    }
}
