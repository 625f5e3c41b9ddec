//! Watch streams for asynchronous consumers of store changes.
//!
//! Listener callbacks run synchronously inside a write. Consumers living on
//! a runtime (render loops, sync bridges) can instead watch a pattern and
//! receive [`WatchEvent`]s as a [`Stream`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::debug;

use crate::path::{Path, Pattern};

/// Kind of write that produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// Single-path write.
    Set,
    /// One path of a batch update.
    Batch,
    /// Whole tree replaced by a reducer commit.
    Replace,
    /// Store cleared.
    Reset,
}

/// A change to one path of a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Name of the store that changed.
    pub store: String,
    /// Path that was written (empty for whole-tree changes).
    pub path: String,
    pub kind: ChangeKind,
    /// Value before the write, if any.
    pub old_value: Option<Value>,
    /// Value after the write, if any.
    pub new_value: Option<Value>,
}

impl WatchEvent {
    pub fn new(
        store: impl Into<String>,
        path: &Path,
        kind: ChangeKind,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            store: store.into(),
            path: path.to_string(),
            kind,
            old_value,
            new_value,
        }
    }

    /// True for `Replace` and `Reset`, which touch every path at once.
    pub fn is_whole_tree(&self) -> bool {
        self.path.is_empty()
    }
}

/// A stream of watch events for a specific pattern.
pub struct WatchStream {
    inner: Pin<Box<BroadcastStream<WatchEvent>>>,
    pattern: Pattern,
}

impl WatchStream {
    /// Create a new watch stream for the given pattern.
    pub fn new(receiver: broadcast::Receiver<WatchEvent>, pattern: Pattern) -> Self {
        Self {
            inner: Box::pin(BroadcastStream::new(receiver)),
            pattern,
        }
    }

    /// Get the pattern this stream is watching.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn matches(&self, event: &WatchEvent) -> bool {
        if event.is_whole_tree() {
            return true;
        }
        match Path::parse(&event.path) {
            Ok(path) => self.pattern.matches(&path),
            Err(_) => false,
        }
    }
}

impl Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(event)) => {
                    if this.matches(&event) {
                        return Poll::Ready(Some(event));
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    debug!(pattern = %this.pattern, skipped, "watch stream lagged");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Handle for sending watch events to subscribers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<WatchEvent>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: WatchEvent) {
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self, pattern: Pattern) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), pattern)
    }

    /// Get the number of current subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(1024)
    }
}
