use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::chat::error::{ChatResult, MalformedDeltaSnafu};
use crate::chat::events::StreamNotification;
use crate::chat::message::{Message, StreamStatus};

pub const DEFAULT_STREAM_DEBOUNCE: Duration = Duration::from_millis(3);

/// Debounce lifecycle: `Idle -> Pending -> Flushed`, with at most one pending deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Pending { deadline: Instant },
    Flushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The debounce deadline expired while the stream was active.
    Debounce,
    /// The stream left the active states.
    Completion,
    /// Idle-to-idle update such as a history load.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Deferred { deadline: Instant },
    Flushed { reason: FlushReason, changed: bool },
}

/// Coalesces full-state stream notifications into a debounced render snapshot.
#[derive(Debug)]
pub struct StreamReconciler {
    debounce: Duration,
    buffer: Arc<[Message]>,
    snapshot: Arc<[Message]>,
    buffer_revision: u64,
    snapshot_revision: u64,
    status: StreamStatus,
    flush_state: FlushState,
}

impl StreamReconciler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            buffer: Arc::from(Vec::new()),
            snapshot: Arc::from(Vec::new()),
            buffer_revision: 0,
            snapshot_revision: 0,
            status: StreamStatus::Idle,
            flush_state: FlushState::Idle,
        }
    }

    pub fn snapshot(&self) -> Arc<[Message]> {
        Arc::clone(&self.snapshot)
    }

    pub fn buffer(&self) -> Arc<[Message]> {
        Arc::clone(&self.buffer)
    }

    /// Bumps whenever the snapshot is replaced with different buffer content.
    pub fn snapshot_revision(&self) -> u64 {
        self.snapshot_revision
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn flush_state(&self) -> FlushState {
        self.flush_state
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.flush_state {
            FlushState::Pending { deadline } => Some(deadline),
            FlushState::Idle | FlushState::Flushed => None,
        }
    }

    /// Applies one notification. A malformed notification leaves every piece of state untouched.
    pub fn on_notification(
        &mut self,
        notification: StreamNotification,
        now: Instant,
    ) -> ChatResult<ReconcileOutcome> {
        let Some(messages) = notification.messages else {
            return MalformedDeltaSnafu {
                stage: "reconcile-notification",
                details: "notification carries no message sequence",
            }
            .fail();
        };

        if let Some(position) = messages.iter().position(|message| !message.is_well_formed()) {
            return MalformedDeltaSnafu {
                stage: "reconcile-notification",
                details: format!("message at position {position} has a blank id"),
            }
            .fail();
        }

        let was_active = self.status.is_active();
        self.buffer = Arc::from(messages);
        self.buffer_revision = self.buffer_revision.saturating_add(1);
        self.status = notification.status;

        if notification.status.is_active() {
            // Re-arming replaces any earlier deadline.
            let deadline = now + self.debounce;
            self.flush_state = FlushState::Pending { deadline };
            return Ok(ReconcileOutcome::Deferred { deadline });
        }

        let reason = if was_active {
            FlushReason::Completion
        } else {
            FlushReason::Idle
        };
        let changed = self.flush();
        Ok(ReconcileOutcome::Flushed { reason, changed })
    }

    /// Flushes the buffer when the pending deadline has passed.
    pub fn on_timer(&mut self, now: Instant) -> Option<ReconcileOutcome> {
        let FlushState::Pending { deadline } = self.flush_state else {
            return None;
        };
        if now < deadline {
            return None;
        }

        let changed = self.flush();
        Some(ReconcileOutcome::Flushed {
            reason: FlushReason::Debounce,
            changed,
        })
    }

    /// Forces the stream to a terminal status and flushes immediately.
    ///
    /// Used when the transport ends without reporting a terminal status itself.
    pub fn complete(&mut self) -> ReconcileOutcome {
        let reason = if self.status.is_active() {
            FlushReason::Completion
        } else {
            FlushReason::Idle
        };
        self.status = StreamStatus::Idle;
        let changed = self.flush();
        ReconcileOutcome::Flushed { reason, changed }
    }

    /// Clears the whole session: empty buffer and snapshot, no pending flush.
    pub fn reset(&mut self) {
        let changed = !self.snapshot.is_empty() || !self.buffer.is_empty();
        self.buffer = Arc::from(Vec::new());
        self.status = StreamStatus::Idle;
        if changed {
            self.buffer_revision = self.buffer_revision.saturating_add(1);
        }
        self.flush();
        self.flush_state = FlushState::Idle;
    }

    fn flush(&mut self) -> bool {
        let changed = self.snapshot_revision != self.buffer_revision;
        self.snapshot = Arc::clone(&self.buffer);
        self.snapshot_revision = self.buffer_revision;
        self.flush_state = FlushState::Flushed;
        changed
    }
}

impl Default for StreamReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_DEBOUNCE)
    }
}
