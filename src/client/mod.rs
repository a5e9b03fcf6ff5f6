//! Client side of Noted
//!
//! [`NotesClient`] ties the pieces together: local changes go through the [`NoteStore`] first,
//! the resulting commands are sent right away when online, or kept in the [`MutationQueue`] until
//! the client is back online.
//!
//! ```no_run
//! # async fn run() -> Result<(), noted::client::ClientError> {
//! use std::sync::Arc;
//!
//! use noted::client::ClientConfig;
//! use noted::client::FileQueueStore;
//! use noted::client::HttpNotesApi;
//! use noted::client::NotesClient;
//!
//! let base_url = "http://localhost:6000/".parse().expect("valid URL");
//! let api = HttpNotesApi::new(ClientConfig::new(base_url, "tokentokentoken"))?;
//! let queue_store = FileQueueStore::new("pending-changes.json");
//!
//! let mut client = NotesClient::new(Arc::new(api), queue_store, true).await?;
//! client.refresh().await?;
//! client.create("Groceries").await;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use uuid::Uuid;

pub use api::ClientConfig;
pub use api::DEFAULT_TIMEOUT;
pub use api::HttpNotesApi;
pub use api::ListQuery;
pub use api::NoteId;
pub use api::NotePage;
pub use api::NotesApi;
pub use api::Pagination;
pub use api::RemoteNote;
pub use error::ClientError;
pub use presence::EditPresence;
pub use presence::EditSession;
pub use queue::DrainReport;
pub use queue::FileQueueStore;
pub use queue::MemoryQueueStore;
pub use queue::MutationQueue;
pub use queue::OperationKind;
pub use queue::PendingOperation;
pub use queue::QueueStore;
pub use store::Command;
pub use store::LocalNote;
pub use store::NoteStore;
pub use store::RequestId;
pub use store::StoreEvent;
pub use store::SyncState;

#[cfg(test)]
pub(crate) use api::decode_data;
#[cfg(test)]
pub(crate) use api::error_from_status;

mod api;
mod error;
#[cfg(test)]
mod fake;
mod presence;
mod queue;
mod store;

/// Notes of the current user, kept in sync with the service
pub struct NotesClient<A: NotesApi, Q: QueueStore> {
    api: Arc<A>,
    store: NoteStore,
    queue: MutationQueue<Q>,
    presence: EditPresence<A>,
    online: bool,
    query: ListQuery,
    pagination: Option<Pagination>,
}

impl<A: NotesApi, Q: QueueStore> NotesClient<A, Q> {
    /// Create the client, offline changes of a previous run are picked up from `queue_store`
    pub async fn new(api: Arc<A>, queue_store: Q, online: bool) -> Result<Self, ClientError> {
        let queue = MutationQueue::open(queue_store).await?;
        let presence = EditPresence::new(Arc::clone(&api));

        Ok(Self {
            api,
            store: NoteStore::new(),
            queue,
            presence,
            online,
            query: ListQuery::default(),
            pagination: None,
        })
    }

    /// All notes, newest first
    pub fn notes(&self) -> &[LocalNote] {
        self.store.notes()
    }

    pub fn note(&self, id: NoteId) -> Option<&LocalNote> {
        self.store.note(id)
    }

    /// Pagination of the last refresh
    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    pub fn last_error(&self) -> Option<&ClientError> {
        self.store.last_error()
    }

    pub fn dismiss_error(&mut self) {
        self.store.apply(StoreEvent::ErrorDismissed);
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Offline changes not replayed yet, failed ones included
    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.queue.pending().await
    }

    /// Which page of notes [`Self::refresh`] loads
    pub fn set_query(&mut self, query: ListQuery) {
        self.query = query;
    }

    /// Write a new note, returns its ID
    ///
    /// The ID is temporary while the note is not created on the service yet.
    pub async fn create(&mut self, content: impl Into<String>) -> NoteId {
        let local_id = Uuid::new_v4();

        let commands = self.store.apply(StoreEvent::LocalCreate {
            local_id,
            content: content.into(),
        });
        self.run(commands).await;

        self.store.resolve(NoteId::Local(local_id))
    }

    pub async fn update(&mut self, note: NoteId, content: impl Into<String>) {
        let commands = self.store.apply(StoreEvent::LocalUpdate {
            note,
            content: content.into(),
        });

        self.run(commands).await;
    }

    pub async fn delete(&mut self, note: NoteId) {
        let commands = self.store.apply(StoreEvent::LocalDelete { note });

        self.run(commands).await;
    }

    /// Change connectivity, going back online replays the offline changes
    pub async fn set_online(&mut self, online: bool) -> Option<DrainReport> {
        let was_online = mem::replace(&mut self.online, online);

        if online && !was_online {
            tracing::info!("Back online, replaying offline changes");

            Some(self.sync().await)
        } else {
            if !online && was_online {
                tracing::info!("Offline, changes are queued from now on");
            }

            None
        }
    }

    /// Replay the offline changes and reload the notes
    pub async fn sync(&mut self) -> DrainReport {
        let report = self.queue.drain(&*self.api).await;

        if !report.id_mappings.is_empty() {
            self.store.apply(StoreEvent::CreatesReplayed {
                mappings: report.id_mappings.clone(),
            });
        }

        if let Some(error) = &report.stopped {
            if error.is_retryable() {
                self.online = false;
            }

            self.store.apply(StoreEvent::ErrorRaised(error.clone()));
        }

        if !report.failed.is_empty() {
            self.store
                .apply(StoreEvent::ErrorRaised(ClientError::Reconciliation(
                    report.failed.len(),
                )));
        }

        if self.online {
            self.refresh_or_report().await;
        }

        report
    }

    /// Reload the current page of notes, keeping local changes on top
    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        let page = self.api.list_notes(&self.query).await?;
        let unsynced = self.queue.pending().await;

        self.pagination = Some(page.pagination);
        self.store.apply(StoreEvent::Refetched {
            notes: page.notes,
            unsynced,
        });

        Ok(())
    }

    /// Someone changed a note we can see
    pub async fn handle_remote_change(&mut self) {
        if self.online {
            self.refresh_or_report().await;
        }
    }

    /// Send a failed offline change again
    pub async fn retry(&mut self, operation: Uuid) -> Result<bool, ClientError> {
        let found = self.queue.retry(operation).await?;

        if found && self.online {
            self.sync().await;
        }

        Ok(found)
    }

    /// Give up on a failed offline change
    pub async fn discard(&mut self, operation: Uuid) -> Result<bool, ClientError> {
        let found = self.queue.discard(operation).await?.is_some();

        if found && self.online {
            self.refresh().await?;
        }

        Ok(found)
    }

    /// Tell others the note is being edited, until the session ends
    ///
    /// Notes that are not created on the service yet have nothing to flag.
    pub async fn begin_edit(&self, note: NoteId) -> Option<EditSession<A>> {
        let note_id = self.store.resolve(note).remote()?;

        Some(self.presence.begin_edit(note_id).await)
    }

    async fn run(&mut self, commands: Vec<Command>) {
        let mut commands = VecDeque::from(commands);
        let mut queued_while_online = false;

        while let Some(command) = commands.pop_front() {
            let Some((request, operation)) = command.request().zip(command.to_operation()) else {
                if self.online {
                    self.refresh_or_report().await;
                }
                continue;
            };

            let event = if !self.online || self.queue.has_replayable().await {
                queued_while_online |= self.online;

                match self.queue.enqueue(operation).await {
                    Ok(_) => StoreEvent::RequestQueued { request },
                    Err(error) => StoreEvent::RequestFailed { request, error },
                }
            } else {
                self.send(request, operation).await
            };

            commands.extend(self.store.apply(event));
        }

        // older offline changes go first
        if queued_while_online {
            self.sync().await;
        }
    }

    async fn send(&self, request: RequestId, operation: OperationKind) -> StoreEvent {
        let result = match operation {
            OperationKind::Create { content, .. } => self
                .api
                .create_note(&content)
                .await
                .map(|note| StoreEvent::CreateConfirmed { request, note }),
            OperationKind::Update {
                note,
                content,
                version,
            } => match note.remote() {
                Some(id) => self
                    .api
                    .update_note(id, &content, version)
                    .await
                    .map(|note| StoreEvent::UpdateConfirmed { request, note }),
                None => Err(never_created()),
            },
            OperationKind::Delete { note } => match note.remote() {
                Some(id) => match self.api.delete_note(id).await {
                    Ok(()) | Err(ClientError::NotFound(_)) => {
                        Ok(StoreEvent::DeleteConfirmed { request })
                    }
                    Err(err) => Err(err),
                },
                None => Err(never_created()),
            },
        };

        result.unwrap_or_else(|error| StoreEvent::RequestFailed { request, error })
    }

    async fn refresh_or_report(&mut self) {
        if let Err(error) = self.refresh().await {
            tracing::warn!("Could not reload notes: {error}");

            self.store.apply(StoreEvent::ErrorRaised(error));
        }
    }
}

fn never_created() -> ClientError {
    ClientError::NotFound("The note was never created".to_string())
}
