//! Fan-out of note changes to connected clients
//!
//! Every successful mutation of a note publishes a [`NoteChange`] on the [`ChangeFeed`]. Clients
//! subscribe through the `/api/notes/changes` event stream and only receive the changes of notes
//! they can see.

use chrono::DateTime;
use chrono::Utc;
use futures::Stream;
use futures::StreamExt;
use futures::future::ready;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default buffer capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1024;

/// What happened to a note
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    /// Name of the event on the stream
    pub fn as_event_name(self) -> &'static str {
        match self {
            Self::Created => "noteCreated",
            Self::Updated => "noteUpdated",
            Self::Deleted => "noteDeleted",
        }
    }
}

/// A single change of a note
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteChange {
    pub kind: ChangeKind,

    pub note_id: Uuid,

    /// Version after the change, absent for deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,

    /// Users allowed to see the change: the owner and everyone with access
    #[serde(skip)]
    pub audience: Vec<Uuid>,

    pub at: DateTime<Utc>,
}

impl NoteChange {
    /// Is the user part of the audience of this change?
    pub fn is_visible_to(&self, user_id: &Uuid) -> bool {
        self.audience.contains(user_id)
    }
}

/// In-process fan-out of [`NoteChange`]s
///
/// Cloning is cheap, all clones share the same channel
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<NoteChange>,

    /// Cancelled on shutdown, ends all open streams
    closed: CancellationToken,
}

impl ChangeFeed {
    /// Create a feed with a specific channel capacity
    ///
    /// Slow subscribers lose the oldest changes once the buffer is full
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            closed: CancellationToken::new(),
        }
    }

    /// Publish a change to all current subscribers
    ///
    /// Without subscribers the change is dropped
    pub fn publish(&self, change: NoteChange) {
        tracing::debug!(
            "Publishing {:?} of note {} to {} subscriber(s)",
            change.kind,
            change.note_id,
            self.sender.receiver_count()
        );

        let _ = self.sender.send(change);
    }

    /// Subscribe to all changes
    pub fn subscribe(&self) -> broadcast::Receiver<NoteChange> {
        self.sender.subscribe()
    }

    /// Stream of the changes visible to a single user
    ///
    /// Ends when the feed is closed
    pub fn stream_for(
        &self,
        user_id: Uuid,
    ) -> impl Stream<Item = NoteChange> + Send + 'static + use<> {
        BroadcastStream::new(self.subscribe())
            .filter_map(move |result| {
                ready(match result {
                    Ok(change) if change.is_visible_to(&user_id) => Some(change),
                    Ok(_) => None,
                    Err(err) => {
                        tracing::warn!("Change stream of user {user_id} skipped changes: {err}");
                        None
                    }
                })
            })
            .take_until(self.closed.clone().cancelled_owned())
    }

    /// Close the feed, ending all open streams
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Is the feed closed?
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::pin::pin;

    use super::*;

    fn change(kind: ChangeKind, audience: Vec<Uuid>) -> NoteChange {
        NoteChange {
            kind,
            note_id: Uuid::new_v4(),
            version: Some(1),
            audience,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_change() {
        let feed = ChangeFeed::default();
        let mut first = feed.subscribe();
        let mut second = feed.subscribe();

        feed.publish(change(ChangeKind::Created, vec![Uuid::new_v4()]));

        assert_eq!(first.recv().await.unwrap().kind, ChangeKind::Created);
        assert_eq!(second.recv().await.unwrap().kind, ChangeKind::Created);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = ChangeFeed::default();

        feed.publish(change(ChangeKind::Deleted, vec![]));
    }

    #[tokio::test]
    async fn test_stream_only_contains_visible_changes() {
        let feed = ChangeFeed::default();
        let user_id = Uuid::new_v4();

        let mut stream = pin!(feed.stream_for(user_id));

        feed.publish(change(ChangeKind::Created, vec![Uuid::new_v4()]));
        feed.publish(change(ChangeKind::Updated, vec![Uuid::new_v4(), user_id]));

        let received = stream.next().await.unwrap();

        assert_eq!(received.kind, ChangeKind::Updated);
    }

    #[tokio::test]
    async fn test_stream_outlives_feed_handle() {
        let feed = ChangeFeed::default();
        let user_id = Uuid::new_v4();

        let stream = {
            let handle = feed.clone();
            handle.stream_for(user_id)
        };
        let mut stream = pin!(stream);

        feed.publish(change(ChangeKind::Deleted, vec![user_id]));

        assert_eq!(stream.next().await.unwrap().kind, ChangeKind::Deleted);
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let feed = ChangeFeed::default();

        let mut stream = pin!(feed.stream_for(Uuid::new_v4()));

        feed.close();

        assert!(feed.is_closed());
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_serialized_change() {
        let mut deleted = change(ChangeKind::Deleted, vec![Uuid::new_v4()]);
        deleted.version = None;

        let value = serde_json::to_value(&deleted).unwrap();

        assert_eq!(value["kind"], "deleted");
        assert!(value.get("version").is_none());
        assert!(value.get("audience").is_none());
        assert!(value.get("noteId").is_some());
    }
}
