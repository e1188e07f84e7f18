use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::chat::message::{Message, SessionId, StreamStatus};

/// Full-state stream update: the latest known message sequence plus status.
///
/// `messages == None` marks a malformed notification that must not touch the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNotification {
    pub messages: Option<Vec<Message>>,
    pub status: StreamStatus,
    pub error: Option<String>,
}

impl StreamNotification {
    pub fn new(messages: Vec<Message>, status: StreamStatus) -> Self {
        Self {
            messages: Some(messages),
            status,
            error: None,
        }
    }

    pub fn malformed(status: StreamStatus) -> Self {
        Self {
            messages: None,
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadsUpdatedReason {
    StreamCompleted,
    EmptyHydration,
    ThreadDeleted,
}

/// Broadcast telling thread listings to reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadsUpdated {
    pub reason: ThreadsUpdatedReason,
    pub session_id: Option<SessionId>,
}

/// Fire-and-forget "threads updated" channel shared by views and sidebars.
#[derive(Debug, Clone)]
pub struct ThreadsUpdatedSignal {
    sender: broadcast::Sender<ThreadsUpdated>,
}

impl ThreadsUpdatedSignal {
    pub const DEFAULT_CAPACITY: usize = 16;

    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(Self::DEFAULT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ThreadsUpdated> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ThreadsUpdated) {
        let reason = event.reason;
        // No listeners is fine: nobody needs a refresh.
        if let Ok(receivers) = self.sender.send(event) {
            tracing::debug!(?reason, receivers, "threads updated");
        }
    }

    pub fn emit_after(&self, delay: Duration, event: ThreadsUpdated) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            signal.emit(event);
        })
    }
}

impl Default for ThreadsUpdatedSignal {
    fn default() -> Self {
        Self::new()
    }
}
