use std::sync::Arc;
use std::time::Duration;

use agentchat_storage::{HistoryRecord, SaveThread, ThreadId, ThreadStore};
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    ChatTransport, EmptyMessageSnafu, PersistThreadSnafu, TransportError, TransportRequest,
    TransportResult, TransportStreamHandle, TransportWorker, UnknownAgentSnafu,
    make_notification_stream,
};
use crate::chat::events::StreamNotification;
use crate::chat::message::{AgentId, Message, MessageId, Part, StreamStatus};

pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(20);

/// Fragments the scripted agent replays, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedReply {
    pub fragments: Vec<Part>,
}

impl ScriptedReply {
    pub fn new(fragments: Vec<Part>) -> Self {
        Self { fragments }
    }

    /// Thinks about the prompt briefly, then echoes it back word by word.
    pub fn echo(prompt: &str) -> Self {
        let reasoning = format!("The user wrote \"{prompt}\". Repeating it back.");
        let answer = format!("You said: {prompt}");

        let fragments = split_words(&reasoning)
            .map(Part::reasoning)
            .chain(split_words(&answer).map(Part::text))
            .collect();
        Self { fragments }
    }
}

fn split_words(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(' ')
}

/// Deterministic stand-in for a streaming agent backend.
#[derive(Clone)]
pub struct ScriptedTransport {
    step_delay: Duration,
    reply: Option<ScriptedReply>,
    fail_after: Option<usize>,
    agents: Option<Vec<AgentId>>,
    store: Option<Arc<dyn ThreadStore>>,
}

impl ScriptedTransport {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            reply: None,
            fail_after: None,
            agents: None,
            store: None,
        }
    }

    /// Replays this reply for every request instead of echoing the prompt.
    pub fn with_reply(mut self, reply: ScriptedReply) -> Self {
        self.reply = Some(reply);
        self
    }

    /// Fails the stream once `fragments` fragments have been delivered.
    pub fn with_failure_after(mut self, fragments: usize) -> Self {
        self.fail_after = Some(fragments);
        self
    }

    pub fn with_agents(mut self, agents: Vec<AgentId>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Saves finished threads, as the agent server would.
    pub fn with_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn run_script(
        self,
        request: TransportRequest,
        event_tx: mpsc::UnboundedSender<StreamNotification>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let generation = request.generation;
        let reply = self
            .reply
            .clone()
            .unwrap_or_else(|| ScriptedReply::echo(&request.message.text()));

        let mut conversation = request.history.clone();
        conversation.push(request.message.clone());
        if event_tx
            .send(StreamNotification::new(
                conversation.clone(),
                StreamStatus::Submitted,
            ))
            .is_err()
        {
            return;
        }

        let mut assistant = Message::assistant(MessageId::generate());
        for (index, fragment) in reply.fragments.into_iter().enumerate() {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(generation, delivered = index, "scripted stream cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.step_delay) => {}
            }

            if self.fail_after == Some(index) {
                let error = TransportError::StreamFailed {
                    stage: "scripted-fragment",
                    details: format!("scripted failure after {index} fragments"),
                };
                tracing::warn!(generation, error = %error, "scripted stream failed");
                let _ = event_tx.send(
                    StreamNotification::new(
                        transcript_with(&conversation, &assistant),
                        StreamStatus::Idle,
                    )
                    .with_error(error.to_string()),
                );
                return;
            }

            assistant.push_fragment(fragment);
            if event_tx
                .send(StreamNotification::new(
                    transcript_with(&conversation, &assistant),
                    StreamStatus::Streaming,
                ))
                .is_err()
            {
                return;
            }
        }

        let transcript = transcript_with(&conversation, &assistant);
        if let Err(error) = self.persist(&request, &transcript).await {
            tracing::warn!(generation, error = %error, "failed to save scripted thread");
        }

        let _ = event_tx.send(StreamNotification::new(transcript, StreamStatus::Idle));
    }

    async fn persist(&self, request: &TransportRequest, transcript: &[Message]) -> TransportResult<()> {
        let (Some(store), Some(session_id)) = (self.store.as_ref(), request.session_id.as_ref())
        else {
            return Ok(());
        };

        let thread_id = ThreadId::parse(session_id.as_str()).context(PersistThreadSnafu {
            stage: "scripted-persist-thread-id",
        })?;
        let records = transcript.iter().map(message_to_record).collect();

        store
            .save_thread(SaveThread {
                thread_id,
                user_id: request.user_id.clone(),
                agent_id: request.agent_id.to_string(),
                records,
            })
            .await
            .context(PersistThreadSnafu {
                stage: "scripted-persist-save",
            })?;
        Ok(())
    }
}

impl ChatTransport for ScriptedTransport {
    fn stream_chat(&self, request: TransportRequest) -> TransportResult<TransportStreamHandle> {
        ensure!(
            request.message.has_text(),
            EmptyMessageSnafu {
                stage: "scripted-stream-chat",
                generation: request.generation,
            }
        );

        if let Some(agents) = self.agents.as_ref() {
            ensure!(
                agents.contains(&request.agent_id),
                UnknownAgentSnafu {
                    stage: "scripted-stream-chat",
                    agent_id: request.agent_id.to_string(),
                }
            );
        }

        let (event_tx, stream, cancel_rx) = make_notification_stream(request.generation);
        let worker: TransportWorker =
            Box::pin(self.clone().run_script(request, event_tx, cancel_rx));

        Ok(TransportStreamHandle { stream, worker })
    }
}

fn transcript_with(conversation: &[Message], assistant: &Message) -> Vec<Message> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.extend_from_slice(conversation);
    messages.push(assistant.clone());
    messages
}

fn message_to_record(message: &Message) -> HistoryRecord {
    let record = HistoryRecord::new(message.role.as_str(), message.text())
        .with_id(message.id.as_str());
    let reasoning = message.reasoning();
    if reasoning.is_empty() {
        record
    } else {
        record.with_reasoning(reasoning)
    }
}
