//! Offline mutation queue
//!
//! Changes made while offline are kept in order in a [`MutationQueue`] and replayed against the
//! service once the client is back online. The queue is persisted through a [`QueueStore`] after
//! every change, so a replay that stops halfway resumes at the first unprocessed operation.

use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ClientError;
use super::api::NoteId;
use super::api::NotesApi;
use super::api::RemoteNote;

/// A change to replay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationKind {
    Create {
        /// Temporary ID of the note on the client
        local_id: Uuid,
        content: String,
    },
    Update {
        note: NoteId,
        content: String,
        version: i32,
    },
    Delete {
        note: NoteId,
    },
}

/// An operation in the queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub queued_at: DateTime<Utc>,

    /// Why the replay failed, failed operations are skipped until retried
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl PendingOperation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            queued_at: Utc::now(),
            failure: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Where the queue is kept between runs
pub trait QueueStore: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = Result<Vec<PendingOperation>, ClientError>> + Send;

    fn save(
        &self,
        operations: &[PendingOperation],
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Does the queue survive a restart?
    fn is_durable(&self) -> bool;
}

/// Queue store in memory, lost when the process stops
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    operations: Mutex<Vec<PendingOperation>>,
}

impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<Vec<PendingOperation>, ClientError> {
        Ok(self.operations.lock().await.clone())
    }

    async fn save(&self, operations: &[PendingOperation]) -> Result<(), ClientError> {
        operations.clone_into(&mut *self.operations.lock().await);

        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Queue store in a JSON file
///
/// Writes go to a temporary file next to it first, which is then renamed over the real file.
#[derive(Clone, Debug)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temporary_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".tmp");

        PathBuf::from(path)
    }
}

impl QueueStore for FileQueueStore {
    async fn load(&self) -> Result<Vec<PendingOperation>, ClientError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                ClientError::Storage(format!("Could not read {}: {err}", self.path.display()))
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(ClientError::Storage(format!(
                "Could not read {}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, operations: &[PendingOperation]) -> Result<(), ClientError> {
        let bytes = serde_json::to_vec(operations)
            .map_err(|err| ClientError::Storage(err.to_string()))?;

        let temporary_path = self.temporary_path();

        tokio::fs::write(&temporary_path, bytes)
            .await
            .map_err(|err| {
                ClientError::Storage(format!(
                    "Could not write {}: {err}",
                    temporary_path.display()
                ))
            })?;

        tokio::fs::rename(&temporary_path, &self.path)
            .await
            .map_err(|err| {
                ClientError::Storage(format!("Could not write {}: {err}", self.path.display()))
            })
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Outcome of a replay of the queue
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations the service accepted, they are gone from the queue
    pub replayed: usize,

    /// Operations that failed in this replay, they stay in the queue flagged as failed
    pub failed: Vec<Uuid>,

    /// Operations still waiting for a replay
    pub remaining: usize,

    /// Temporary note IDs with their real ID, as `(local, remote)` pairs
    pub id_mappings: Vec<(Uuid, Uuid)>,

    /// Why the replay stopped before the end of the queue
    pub stopped: Option<ClientError>,
}

impl DrainReport {
    /// Got through the whole queue
    pub fn is_complete(&self) -> bool {
        self.stopped.is_none()
    }
}

enum Replayed {
    Created { local_id: Uuid, note: RemoteNote },
    Updated(RemoteNote),
    Deleted,
}

/// Ordered offline changes
#[derive(Debug)]
pub struct MutationQueue<Q> {
    store: Q,
    operations: Mutex<Vec<PendingOperation>>,
}

impl<Q: QueueStore> MutationQueue<Q> {
    /// Open the queue, with the operations of a previous run when the store kept them
    pub async fn open(store: Q) -> Result<Self, ClientError> {
        if !store.is_durable() {
            tracing::warn!("Offline changes are kept in memory only, they are lost on restart");
        }

        let operations = store.load().await?;

        if !operations.is_empty() {
            tracing::info!("Loaded {} pending offline change(s)", operations.len());
        }

        Ok(Self {
            store,
            operations: Mutex::new(operations),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_durable()
    }

    /// Add an operation at the end of the queue
    pub async fn enqueue(&self, kind: OperationKind) -> Result<PendingOperation, ClientError> {
        let operation = PendingOperation::new(kind);

        let mut operations = self.operations.lock().await;
        operations.push(operation.clone());

        if let Err(err) = self.store.save(&operations).await {
            operations.pop();
            return Err(err);
        }

        tracing::debug!("Queued offline change {}", operation.id);

        Ok(operation)
    }

    /// All operations in the queue, failed ones included
    pub async fn pending(&self) -> Vec<PendingOperation> {
        self.operations.lock().await.clone()
    }

    /// Is there anything a replay would send?
    pub async fn has_replayable(&self) -> bool {
        self.operations
            .lock()
            .await
            .iter()
            .any(|operation| !operation.is_failed())
    }

    pub async fn is_empty(&self) -> bool {
        self.operations.lock().await.is_empty()
    }

    /// Clear the failure of an operation, so the next replay sends it again
    pub async fn retry(&self, id: Uuid) -> Result<bool, ClientError> {
        let mut operations = self.operations.lock().await;

        let Some(operation) = operations.iter_mut().find(|operation| operation.id == id) else {
            return Ok(false);
        };

        operation.failure = None;
        self.store.save(&operations).await?;

        Ok(true)
    }

    /// Remove an operation without replaying it
    pub async fn discard(&self, id: Uuid) -> Result<Option<PendingOperation>, ClientError> {
        let mut operations = self.operations.lock().await;

        let Some(index) = operations.iter().position(|operation| operation.id == id) else {
            return Ok(None);
        };

        let operation = operations.remove(index);
        self.store.save(&operations).await?;

        tracing::info!("Discarded offline change {id}");

        Ok(Some(operation))
    }

    /// Replay the queue in order
    ///
    /// Holds the queue for the whole replay, a second replay waits for the first one and then
    /// finds nothing left to send.
    pub async fn drain<A: NotesApi>(&self, api: &A) -> DrainReport {
        let mut operations = self.operations.lock().await;
        let mut report = DrainReport::default();
        let mut index = 0;

        while index < operations.len() {
            if operations[index].is_failed() {
                index += 1;
                continue;
            }

            match replay(api, &operations[index].kind).await {
                Ok(replayed) => {
                    rewrite_following(&mut operations[index + 1..], &replayed);

                    if let Replayed::Created { local_id, note } = &replayed {
                        report.id_mappings.push((*local_id, note.id));
                    }

                    operations.remove(index);
                    report.replayed += 1;
                }
                Err(err) if stops_replay(&err) => {
                    tracing::info!("Stopped replaying offline changes: {err}");

                    report.stopped = Some(err);
                    break;
                }
                Err(err) => {
                    let operation = &mut operations[index];

                    tracing::warn!("Offline change {} could not be replayed: {err}", operation.id);

                    operation.failure = Some(err.to_string());
                    report.failed.push(operation.id);
                    index += 1;
                }
            }

            if let Err(err) = self.store.save(&operations).await {
                tracing::error!("Could not save the offline queue: {err}");

                report.stopped = Some(err);
                break;
            }
        }

        report.remaining = operations
            .iter()
            .filter(|operation| !operation.is_failed())
            .count();

        report
    }
}

async fn replay<A: NotesApi>(api: &A, kind: &OperationKind) -> Result<Replayed, ClientError> {
    match kind {
        OperationKind::Create { local_id, content } => {
            let note = api.create_note(content).await?;

            Ok(Replayed::Created {
                local_id: *local_id,
                note,
            })
        }
        OperationKind::Update {
            note,
            content,
            version,
        } => {
            let note = api
                .update_note(remote_id(*note)?, content, *version)
                .await?;

            Ok(Replayed::Updated(note))
        }
        OperationKind::Delete { note } => match api.delete_note(remote_id(*note)?).await {
            Ok(()) | Err(ClientError::NotFound(_)) => Ok(Replayed::Deleted),
            Err(err) => Err(err),
        },
    }
}

/// Point later operations to what the service just returned
fn rewrite_following(operations: &mut [PendingOperation], replayed: &Replayed) {
    let (from, note) = match replayed {
        Replayed::Created { local_id, note } => (NoteId::Local(*local_id), note),
        Replayed::Updated(note) => (NoteId::Remote(note.id), note),
        Replayed::Deleted => return,
    };

    for operation in operations {
        match &mut operation.kind {
            OperationKind::Update {
                note: target,
                version,
                ..
            } if *target == from => {
                *target = NoteId::Remote(note.id);
                *version = note.version;
            }
            OperationKind::Delete { note: target } if *target == from => {
                *target = NoteId::Remote(note.id);
            }
            _ => {}
        }
    }
}

fn remote_id(note: NoteId) -> Result<Uuid, ClientError> {
    note.remote()
        .ok_or_else(|| ClientError::NotFound("The note was never created".to_string()))
}

/// Errors after which the rest of the queue is not worth trying now
fn stops_replay(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Transient(_)
            | ClientError::Server(_)
            | ClientError::Unauthenticated
            | ClientError::Storage(_)
    )
}
