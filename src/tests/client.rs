use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::Method;
use axum::http::Request;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::CONTENT_TYPE;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceExt;
use uuid::Uuid;

use crate::client::ClientConfig;
use crate::client::ClientError;
use crate::client::HttpNotesApi;
use crate::client::ListQuery;
use crate::client::MemoryQueueStore;
use crate::client::MutationQueue;
use crate::client::NoteId;
use crate::client::NotePage;
use crate::client::NotesApi;
use crate::client::NotesClient;
use crate::client::OperationKind;
use crate::client::RemoteNote;
use crate::client::SyncState;
use crate::client::decode_data;
use crate::client::error_from_status;
use crate::tests::helper;

/// [`NotesApi`] calling the router directly, without a network in between
#[derive(Clone)]
struct RouterApi {
    app: Router,
    access_token: String,
}

impl RouterApi {
    fn new(app: &Router, access_token: &str) -> Self {
        Self {
            app: app.clone(),
            access_token: access_token.to_string(),
        }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        payload: Option<Value>,
    ) -> Result<Vec<u8>, ClientError> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, &self.access_token);

        let body = match payload {
            Some(payload) => {
                builder = builder.header(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref());
                Body::from(serde_json::to_vec(&payload).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();

        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(error_from_status(status.as_u16(), &body))
        }
    }

    async fn send_for<T: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        payload: Option<Value>,
    ) -> Result<T, ClientError> {
        let body = self.send(method, uri, payload).await?;

        decode_data(&body)
    }
}

impl NotesApi for RouterApi {
    async fn list_notes(&self, query: &ListQuery) -> Result<NotePage, ClientError> {
        let uri = {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            if let Some(page) = query.page {
                serializer.append_pair("page", &page.to_string());
            }
            if let Some(limit) = query.limit {
                serializer.append_pair("limit", &limit.to_string());
            }
            if let Some(search) = &query.search {
                serializer.append_pair("search", search);
            }

            format!("/api/notes?{}", serializer.finish())
        };

        self.send_for(Method::GET, &uri, None).await
    }

    async fn create_note(&self, content: &str) -> Result<RemoteNote, ClientError> {
        self.send_for(
            Method::POST,
            "/api/notes",
            Some(json!({ "content": content })),
        )
        .await
    }

    async fn update_note(
        &self,
        id: Uuid,
        content: &str,
        version: i32,
    ) -> Result<RemoteNote, ClientError> {
        self.send_for(
            Method::PATCH,
            &format!("/api/notes/{id}"),
            Some(json!({ "content": content, "version": version })),
        )
        .await
    }

    async fn delete_note(&self, id: Uuid) -> Result<(), ClientError> {
        self.send(Method::DELETE, &format!("/api/notes/{id}"), None)
            .await
            .map(|_| ())
    }

    async fn set_editing(&self, id: Uuid, editing: bool) -> Result<RemoteNote, ClientError> {
        self.send_for(
            Method::POST,
            &format!("/api/notes/{id}/editing"),
            Some(json!({ "editing": editing })),
        )
        .await
    }
}

async fn client_for(
    app: &Router,
    access_token: &str,
    online: bool,
) -> NotesClient<RouterApi, MemoryQueueStore> {
    let api = Arc::new(RouterApi::new(app, access_token));

    NotesClient::new(api, MemoryQueueStore::default(), online)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_offline_draft_is_created_once() {
    let mut app = helper::setup_test_app();
    let access_token = helper::signup_and_login(&mut app, "alice@example.com").await;

    let mut client = client_for(&app, &access_token, false).await;

    let id = client.create("draft").await;
    assert!(id.is_local());
    assert_eq!(SyncState::Queued, client.note(id).unwrap().sync);

    // nothing reached the service yet
    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "").await;
    assert!(notes.unwrap().0.is_empty());

    let report = client.set_online(true).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(1, report.replayed);

    // a second sync has nothing left to do
    let report = client.sync().await;
    assert_eq!(0, report.replayed);

    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "").await;
    let (notes, _) = notes.unwrap();
    assert_eq!(1, notes.len());
    assert_eq!("draft".to_string(), notes[0].content);
    assert_eq!(1, notes[0].version);

    // the local note now carries the identity of the service
    let local = client.note(id).unwrap();
    assert_eq!(NoteId::Remote(notes[0].id), local.id);
    assert_eq!(Some(1), local.version);
    assert_eq!(SyncState::Synced, local.sync);
    assert_eq!(1, client.notes().len());
}

#[tokio::test]
async fn test_concurrent_drains_replay_once() {
    let mut app = helper::setup_test_app();
    let access_token = helper::signup_and_login(&mut app, "alice@example.com").await;

    let api = RouterApi::new(&app, &access_token);
    let queue = Arc::new(
        MutationQueue::open(MemoryQueueStore::default())
            .await
            .unwrap(),
    );

    queue
        .enqueue(OperationKind::Create {
            local_id: Uuid::new_v4(),
            content: "draft".to_string(),
        })
        .await
        .unwrap();

    let (first, second) = tokio::join!(queue.drain(&api), queue.drain(&api));

    assert_eq!(1, first.replayed + second.replayed);
    assert!(first.is_complete());
    assert!(second.is_complete());
    assert!(queue.is_empty().await);

    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "").await;
    let (notes, _) = notes.unwrap();
    assert_eq!(1, notes.len());
    assert_eq!(1, notes[0].version);
}

#[tokio::test]
async fn test_offline_create_update_delete_leaves_nothing() {
    let mut app = helper::setup_test_app();
    let access_token = helper::signup_and_login(&mut app, "alice@example.com").await;

    let mut client = client_for(&app, &access_token, false).await;

    let id = client.create("temporary").await;
    client.update(id, "temporary, edited").await;
    client.delete(id).await;

    assert!(client.notes().is_empty());
    assert_eq!(3, client.pending_operations().await.len());

    let report = client.set_online(true).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(3, report.replayed);
    assert!(client.last_error().is_none());
    assert!(client.notes().is_empty());

    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "").await;
    assert!(notes.unwrap().0.is_empty());
}

#[tokio::test]
async fn test_conflict_between_two_clients() {
    let mut app = helper::setup_test_app();
    let alice_token = helper::signup_and_login(&mut app, "alice@example.com").await;
    let bob_token = helper::signup_and_login(&mut app, "bob@example.com").await;

    let note = helper::create_note(&mut app, &alice_token, "x").await;
    helper::maybe_create_grant(&mut app, &alice_token, &note.id, "bob@example.com").await;

    let mut alice = client_for(&app, &alice_token, true).await;
    let mut bob = client_for(&app, &bob_token, true).await;
    alice.refresh().await.unwrap();
    bob.refresh().await.unwrap();

    let id = NoteId::Remote(note.id);

    // alice saves first
    alice.update(id, "y").await;
    assert_eq!(Some(2), alice.note(id).unwrap().version);
    assert!(alice.last_error().is_none());

    // bob is still on version 1, his change is rolled back
    bob.update(id, "z").await;
    assert_eq!(
        Some(&ClientError::Conflict {
            current_version: Some(2)
        }),
        bob.last_error()
    );
    assert_eq!("x".to_string(), bob.note(id).unwrap().content);

    // after a reload bob sees the content of alice and can save on top of it
    bob.dismiss_error();
    bob.handle_remote_change().await;
    let reloaded = bob.note(id).unwrap();
    assert_eq!("y".to_string(), reloaded.content);
    assert_eq!(Some(2), reloaded.version);

    bob.update(id, "z").await;
    assert!(bob.last_error().is_none());

    let (_, single, _) = helper::single_note(&mut app, &alice_token, &note.id).await;
    let single = single.unwrap();
    assert_eq!("z".to_string(), single.content);
    assert_eq!(3, single.version);
}

#[tokio::test]
async fn test_edit_presence_reaches_other_users() {
    let mut app = helper::setup_test_app();
    let alice_token = helper::signup_and_login(&mut app, "alice@example.com").await;
    let bob_token = helper::signup_and_login(&mut app, "bob@example.com").await;

    let mut alice = client_for(&app, &alice_token, true).await;
    let id = alice.create("Shared plans").await;
    let note_id = id.remote().unwrap();
    helper::maybe_create_grant(&mut app, &alice_token, &note_id, "bob@example.com").await;

    let session = alice.begin_edit(id).await.unwrap();

    // the flag is sent in the background
    let mut flagged = false;
    for _ in 0..100 {
        let (_, note, _) = helper::single_note(&mut app, &bob_token, &note_id).await;
        if note.unwrap().being_edited {
            flagged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(flagged);

    session.end().await.unwrap();

    let (_, note, _) = helper::single_note(&mut app, &bob_token, &note_id).await;
    assert!(!note.unwrap().being_edited);

    // notes only known locally have nothing to flag
    alice.set_online(false).await;
    let local = alice.create("Offline").await;
    assert!(alice.begin_edit(local).await.is_none());
}

#[tokio::test]
async fn test_http_notes_api() {
    let mut app = helper::setup_test_app();
    let access_token = helper::signup_and_login(&mut app, "alice@example.com").await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(axum::serve(listener, app.clone()).into_future());

    let base_url = format!("http://{address}/").parse().unwrap();
    let api = HttpNotesApi::new(ClientConfig::new(
        base_url,
        access_token.trim_start_matches("Bearer "),
    ))
    .unwrap();

    // create and list
    let created = api.create_note("Over the wire").await.unwrap();
    assert_eq!("Over the wire".to_string(), created.content);
    assert_eq!(1, created.version);

    let page = api
        .list_notes(&ListQuery {
            search: Some("wire".to_string()),
            ..ListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(1, page.notes.len());
    assert_eq!(1, page.pagination.total_notes);
    assert_eq!(Some("alice@example.com".to_string()), page.notes[0].owner_email);

    // version checked updates
    let updated = api
        .update_note(created.id, "Over the wire, again", 1)
        .await
        .unwrap();
    assert_eq!(2, updated.version);

    let err = api
        .update_note(created.id, "Stale", 1)
        .await
        .unwrap_err();
    assert_eq!(
        ClientError::Conflict {
            current_version: Some(2)
        },
        err
    );

    // validation errors are not retried
    let err = api.create_note("  ").await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(!err.is_retryable());

    // presence
    let flagged = api.set_editing(created.id, true).await.unwrap();
    assert!(flagged.being_edited);

    // delete
    api.delete_note(created.id).await.unwrap();
    let err = api.delete_note(created.id).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));

    // wrong token
    let base_url = format!("http://{address}/").parse().unwrap();
    let api = HttpNotesApi::new(ClientConfig::new(base_url, "not-a-token")).unwrap();
    let err = api.list_notes(&ListQuery::default()).await.unwrap_err();
    assert_eq!(ClientError::Unauthenticated, err);

    server.abort();

    // nothing listens anymore
    let _ = server.await;
    let base_url = format!("http://{address}/").parse().unwrap();
    let api = HttpNotesApi::new(ClientConfig::new(base_url, "not-a-token")).unwrap();
    let err = api.list_notes(&ListQuery::default()).await.unwrap_err();
    assert!(err.is_retryable());

    let (status_code, _, _) = helper::list_notes(&mut app, &access_token, "").await;
    assert_eq!(StatusCode::OK, status_code);
}
