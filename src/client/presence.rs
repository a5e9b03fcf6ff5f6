//! Telling others a note is being edited
//!
//! The flag is advisory: it shows up on the note for other users, it never blocks an update.
//!
//! Several sessions can edit the same note at once, the flag is only cleared when the last one
//! ends. Requests for a single note are sent in the order they were issued, so a clear never
//! overtakes the set before it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use moka::future::Cache;
use tokio::runtime::Handle;
use uuid::Uuid;

use super::ClientError;
use super::api::NotesApi;

/// Repeated starts of an edit within this window only send one request
const DEDUPLICATION_WINDOW: Duration = Duration::from_secs(1);

/// Number of tries to clear the flag
const END_ATTEMPTS: u32 = 3;

/// Wait before the next try, multiplied by the number of tries so far
const END_RETRY_DELAY: Duration = Duration::from_millis(200);

/// A flag request in the background, can be awaited more than once
type Pending = Shared<BoxFuture<'static, Result<(), ClientError>>>;

/// Editing state of a single note
#[derive(Default)]
struct NoteSessions {
    /// Sessions not ended yet
    active: usize,

    /// Last request sent for the note
    last: Option<Pending>,
}

/// State shared by [`EditPresence`] and its sessions
struct Sessions<A> {
    api: Arc<A>,
    notes: Mutex<HashMap<Uuid, NoteSessions>>,
}

impl<A: NotesApi> Sessions<A> {
    /// Send the flag once every earlier request for the note is done
    fn send_after_last(
        &self,
        state: &mut NoteSessions,
        runtime: &Handle,
        note_id: Uuid,
        editing: bool,
    ) -> Pending {
        let previous = state.last.take();
        let api = Arc::clone(&self.api);

        let task = runtime.spawn(async move {
            if let Some(previous) = previous {
                // failures are logged by the request itself
                let _ = previous.await;
            }

            if editing {
                set_flag(&*api, note_id).await
            } else {
                clear_flag(&*api, note_id).await
            }
        });

        let pending = task
            .map(|result| {
                result.unwrap_or_else(|err| {
                    Err(ClientError::Transient(format!(
                        "Editing flag request did not finish: {err}"
                    )))
                })
            })
            .boxed()
            .shared();

        state.last = Some(pending.clone());

        pending
    }

    /// One session less, clears the flag when it was the last one
    fn finish(&self, note_id: Uuid, runtime: Option<&Handle>) -> Option<Pending> {
        let mut notes = self.notes.lock().unwrap_or_else(PoisonError::into_inner);
        let state = notes.get_mut(&note_id)?;

        state.active = state.active.saturating_sub(1);

        if state.active > 0 {
            tracing::debug!("Note {note_id} is still edited in another session");
            return None;
        }

        match runtime {
            Some(runtime) => Some(self.send_after_last(state, runtime, note_id, false)),
            None => {
                tracing::warn!("No runtime left to clear the editing flag of note {note_id}");
                None
            }
        }
    }
}

/// Sends the editing flag of notes
pub struct EditPresence<A> {
    sessions: Arc<Sessions<A>>,
    recent: Cache<Uuid, ()>,
}

impl<A: NotesApi> EditPresence<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            sessions: Arc::new(Sessions {
                api,
                notes: Mutex::new(HashMap::new()),
            }),
            recent: Cache::builder()
                .time_to_live(DEDUPLICATION_WINDOW)
                .build(),
        }
    }

    /// Flag the note as being edited, without waiting for the service
    ///
    /// The flag is cleared when the returned session ends or is dropped.
    pub async fn begin_edit(&self, note_id: Uuid) -> EditSession<A> {
        let entry = self.recent.entry(note_id).or_insert(()).await;
        let sent_recently = !entry.is_fresh();

        let first_session = {
            let mut notes = self
                .sessions
                .notes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let state = notes.entry(note_id).or_default();

            state.active += 1;

            // a clear may be on its way, the flag has to be set again
            let first_session = state.active == 1;

            if first_session || !sent_recently {
                // runs as its own task, the next request for the note waits for it
                let _ = self
                    .sessions
                    .send_after_last(state, &Handle::current(), note_id, true);
            } else {
                tracing::debug!("Note {note_id} was flagged as being edited moments ago");
            }

            first_session
        };

        if first_session && sent_recently {
            self.recent.insert(note_id, ()).await;
        }

        EditSession {
            note_id,
            sessions: Some(Arc::clone(&self.sessions)),
        }
    }
}

/// An edit in progress, clears the editing flag when it ends
pub struct EditSession<A: NotesApi> {
    note_id: Uuid,
    sessions: Option<Arc<Sessions<A>>>,
}

impl<A: NotesApi> EditSession<A> {
    pub fn note_id(&self) -> Uuid {
        self.note_id
    }

    /// End the session, waits for the flag to be cleared when this was the last session
    pub async fn end(mut self) -> Result<(), ClientError> {
        let Some(sessions) = self.sessions.take() else {
            return Ok(());
        };

        match sessions.finish(self.note_id, Some(&Handle::current())) {
            Some(pending) => pending.await,
            None => Ok(()),
        }
    }
}

impl<A: NotesApi> Drop for EditSession<A> {
    fn drop(&mut self) {
        if let Some(sessions) = self.sessions.take() {
            let runtime = Handle::try_current().ok();

            // the request runs on its own, failures are logged by it
            let _ = sessions.finish(self.note_id, runtime.as_ref());
        }
    }
}

async fn set_flag<A: NotesApi>(api: &A, note_id: Uuid) -> Result<(), ClientError> {
    match api.set_editing(note_id, true).await {
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::warn!("Could not flag note {note_id} as being edited: {err}");
            Err(err)
        }
    }
}

async fn clear_flag<A: NotesApi>(api: &A, note_id: Uuid) -> Result<(), ClientError> {
    let mut attempt = 1;

    loop {
        match api.set_editing(note_id, false).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < END_ATTEMPTS => {
                tracing::debug!("Retrying to clear the editing flag of note {note_id}: {err}");

                tokio::time::sleep(END_RETRY_DELAY * attempt).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!("Could not clear the editing flag of note {note_id}: {err}");
                return Err(err);
            }
        }
    }
}
