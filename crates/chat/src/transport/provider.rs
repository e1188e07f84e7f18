use std::future::Future;
use std::pin::Pin;

use agentchat_storage::StorageError;
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use crate::chat::events::StreamNotification;
use crate::chat::message::{AgentId, Message, SessionId};

pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("chat request for generation {generation} has an empty user message"))]
    EmptyMessage { stage: &'static str, generation: u64 },
    #[snafu(display("agent '{agent_id}' is not available"))]
    UnknownAgent {
        stage: &'static str,
        agent_id: String,
    },
    #[snafu(display("stream failed on `{stage}`: {details}"))]
    StreamFailed {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to persist thread on `{stage}`: {source}"))]
    PersistThread {
        stage: &'static str,
        source: StorageError,
    },
}

/// One submitted exchange: the new user message plus the conversation it continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub generation: u64,
    pub agent_id: AgentId,
    pub session_id: Option<SessionId>,
    pub user_id: String,
    pub history: Vec<Message>,
    pub message: Message,
}

impl TransportRequest {
    pub fn new(generation: u64, agent_id: AgentId, user_id: impl Into<String>, message: Message) -> Self {
        Self {
            generation,
            agent_id,
            session_id: None,
            user_id: user_id.into(),
            history: Vec::new(),
            message,
        }
    }

    pub fn with_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Receiving half of one stream generation. Dropping it cancels the worker.
pub struct NotificationStream {
    generation: u64,
    events: mpsc::UnboundedReceiver<StreamNotification>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct TransportStreamHandle {
    pub stream: NotificationStream,
    pub worker: TransportWorker,
}

impl NotificationStream {
    pub(crate) fn new(
        generation: u64,
        events: mpsc::UnboundedReceiver<StreamNotification>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            generation,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn recv(&mut self) -> Option<StreamNotification> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamNotification> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Delivers a continuously updated message sequence for a submitted user message.
pub trait ChatTransport: Send + Sync {
    fn stream_chat(&self, request: TransportRequest) -> TransportResult<TransportStreamHandle>;
}

pub(crate) fn make_notification_stream(
    generation: u64,
) -> (
    mpsc::UnboundedSender<StreamNotification>,
    NotificationStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        NotificationStream::new(generation, event_rx, cancel_tx),
        cancel_rx,
    )
}
