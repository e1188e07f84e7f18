use std::sync::Arc;
use std::time::Duration;

use agentchat_storage::{HistoryRecord, HistoryStore, StorageResult, ThreadId};
use snafu::ensure;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::chat::binder::{NavigationRequest, Route, RouteChange, SessionBinder, SessionIdentity};
use crate::chat::error::{
    BlankInputSnafu, ChatError, HydratingSnafu, StreamActiveSnafu, SubmitRejected,
};
use crate::chat::events::{StreamNotification, ThreadsUpdated, ThreadsUpdatedReason, ThreadsUpdatedSignal};
use crate::chat::hydrator::{HistoryHydrator, HydrationOutcome, HydrationStart, HydrationTicket};
use crate::chat::message::{
    AgentId, Message, MessageId, SessionId, StreamStatus, reasoning_in_progress,
};
use crate::chat::reconciler::{ReconcileOutcome, StreamReconciler};
use crate::chat::scroll_manager::{FollowMode, ScrollConfig, ScrollManager};
use crate::chat::viewport::{Viewport, ViewportMetrics};
use crate::settings::{ChatSettings, PreferenceStore};
use crate::transport::{ChatTransport, TransportRequest, TransportStreamHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatViewConfig {
    pub user_id: String,
    pub default_agent_id: AgentId,
    /// Clear the conversation before every submission.
    pub single_shot: bool,
    pub stream_debounce: Duration,
    pub scroll: ScrollConfig,
    pub threads_refresh_delay: Duration,
}

impl ChatViewConfig {
    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            user_id: settings.user_id.clone(),
            default_agent_id: AgentId::new(settings.default_agent_id.as_str()),
            single_shot: settings.single_shot,
            stream_debounce: settings.stream_debounce(),
            scroll: settings.scroll_config(),
            threads_refresh_delay: settings.threads_refresh_delay(),
        }
    }
}

impl Default for ChatViewConfig {
    fn default() -> Self {
        Self::from_settings(&ChatSettings::default())
    }
}

/// Collaborators a chat surface talks to.
#[derive(Clone)]
pub struct ChatDependencies {
    pub transport: Arc<dyn ChatTransport>,
    pub history: Arc<dyn HistoryStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub signal: ThreadsUpdatedSignal,
}

enum ViewEvent {
    Notification {
        generation: u64,
        notification: StreamNotification,
    },
    /// The transport dropped its sender.
    StreamClosed { generation: u64 },
    Hydrated {
        ticket: HydrationTicket,
        result: StorageResult<Vec<HistoryRecord>>,
    },
}

struct ActiveStream {
    generation: u64,
    reader_task: JoinHandle<()>,
    worker_task: JoinHandle<()>,
}

impl ActiveStream {
    /// Aborting the reader drops the notification stream, which tells the worker to stop.
    fn cancel(self) {
        self.reader_task.abort();
        drop(self.worker_task);
    }
}

/// One chat surface: session binding, stream reconciliation, hydration and follow-scroll.
///
/// Background work (stream readers, history fetches) reports back through an internal
/// queue; the owner drives it with [`ChatView::step`] or [`ChatView::run_until_idle`].
pub struct ChatView<V: Viewport> {
    config: ChatViewConfig,
    binder: SessionBinder,
    reconciler: StreamReconciler,
    hydrator: HistoryHydrator,
    scroll: ScrollManager,
    viewport: V,
    transport: Arc<dyn ChatTransport>,
    history: Arc<dyn HistoryStore>,
    signal: ThreadsUpdatedSignal,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    events_rx: mpsc::UnboundedReceiver<ViewEvent>,
    active_stream: Option<ActiveStream>,
    next_generation: u64,
    published_snapshots: u64,
    last_error: Option<String>,
}

impl<V: Viewport> ChatView<V> {
    pub fn new(config: ChatViewConfig, deps: ChatDependencies, viewport: V, route: Route) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let binder = SessionBinder::new(route, deps.preferences, config.default_agent_id.clone());

        let mut view = Self {
            reconciler: StreamReconciler::new(config.stream_debounce),
            hydrator: HistoryHydrator::new(),
            scroll: ScrollManager::new(config.scroll),
            config,
            binder,
            viewport,
            transport: deps.transport,
            history: deps.history,
            signal: deps.signal,
            events_tx,
            events_rx,
            active_stream: None,
            next_generation: 1,
            published_snapshots: 0,
            last_error: None,
        };

        let session_id = view.binder.session_id().cloned();
        view.enter_session(session_id);
        view
    }

    /// Messages as last published for rendering.
    pub fn messages(&self) -> Arc<[Message]> {
        self.reconciler.snapshot()
    }

    pub fn status(&self) -> StreamStatus {
        self.reconciler.status()
    }

    pub fn identity(&self) -> &SessionIdentity {
        self.binder.identity()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.binder.session_id()
    }

    pub fn agent_id(&self) -> &AgentId {
        self.binder.agent_id()
    }

    pub fn current_route(&self) -> Route {
        self.binder.current_route()
    }

    pub fn follow_mode(&self) -> FollowMode {
        self.scroll.follow_mode()
    }

    pub fn show_resume_button(&self) -> bool {
        !self.scroll.is_following()
    }

    pub fn is_hydrating(&self) -> bool {
        self.hydrator.is_hydrating()
    }

    /// Loading placeholder: a session is open, its history is in flight, nothing to show yet.
    pub fn is_loading(&self) -> bool {
        self.binder.session_id().is_some()
            && self.hydrator.is_hydrating()
            && self.reconciler.snapshot().is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.is_some() || self.reconciler.status().is_active()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of snapshots handed to the viewport so far.
    pub fn published_snapshots(&self) -> u64 {
        self.published_snapshots
    }

    pub fn reasoning_in_progress(&self, index: usize) -> bool {
        reasoning_in_progress(&self.reconciler.snapshot(), index, self.reconciler.status())
    }

    pub fn viewport(&self) -> &V {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut V {
        &mut self.viewport
    }

    /// Sends a user message to the current agent.
    pub fn submit(&mut self, text: &str) -> Result<MessageId, SubmitRejected> {
        ensure!(!text.trim().is_empty(), BlankInputSnafu { stage: "submit" });
        ensure!(!self.is_streaming(), StreamActiveSnafu { stage: "submit" });
        if let Some(session_id) = self.hydrator.in_flight() {
            return HydratingSnafu {
                stage: "submit",
                session_id: session_id.to_string(),
            }
            .fail();
        }

        if self.config.single_shot {
            self.clear_conversation();
        }

        let generation = self.next_generation;
        self.next_generation = self.next_generation.saturating_add(1);
        let message_id = MessageId::generate();
        let request = TransportRequest::new(
            generation,
            self.binder.agent_id().clone(),
            self.config.user_id.as_str(),
            Message::user(message_id.clone(), text),
        )
        .with_session(self.binder.session_id().cloned())
        .with_history(self.reconciler.buffer().to_vec());

        let handle = match self.transport.stream_chat(request) {
            Ok(handle) => handle,
            Err(source) => {
                tracing::error!(generation, error = %source, "transport refused chat request");
                self.last_error = Some(source.to_string());
                return Err(SubmitRejected::TransportUnavailable {
                    stage: "submit-open-stream",
                    source,
                });
            }
        };

        tracing::info!(
            generation,
            agent_id = %self.binder.agent_id(),
            session_id = ?self.binder.session_id().map(SessionId::as_str),
            "submitted chat message"
        );
        self.last_error = None;
        self.scroll.handle_user_submit(&mut self.viewport, Instant::now());
        self.spawn_stream(handle);
        Ok(message_id)
    }

    /// Stops the in-flight response, keeping whatever already arrived.
    pub fn stop(&mut self) -> bool {
        let Some(active) = self.active_stream.take() else {
            return false;
        };

        tracing::info!(generation = active.generation, "stopped chat stream");
        active.cancel();
        let outcome = self.reconciler.complete();
        self.after_reconcile(outcome, Instant::now());
        self.schedule_threads_refresh();
        true
    }

    /// Applies a route coming from the host router.
    pub fn navigate(&mut self, route: Route) -> RouteChange {
        let change = self.binder.apply_route(route);
        if let RouteChange::Session { previous } = &change {
            tracing::info!(
                previous = ?previous.as_ref().map(SessionId::as_str),
                next = ?self.binder.session_id().map(SessionId::as_str),
                "session changed"
            );
            let session_id = self.binder.session_id().cloned();
            self.enter_session(session_id);
        }
        change
    }

    /// Switches the agent for the current conversation.
    pub fn select_agent(&mut self, agent_id: AgentId) -> NavigationRequest {
        let selection = self.binder.select_agent(agent_id);
        if selection.clear_messages {
            self.cancel_active_stream();
            self.clear_conversation();
        }
        selection.navigation
    }

    /// Starts a fresh conversation under the last used agent.
    pub fn new_chat(&mut self) -> NavigationRequest {
        let navigation = self.binder.new_chat();
        self.navigate(navigation.route.clone());
        navigation
    }

    /// Deletes a persisted thread. Deleting the open one moves to a new chat.
    pub async fn delete_thread(
        &mut self,
        session_id: &SessionId,
    ) -> StorageResult<Option<NavigationRequest>> {
        let thread_id = ThreadId::parse(session_id.as_str())?;
        self.history.delete_thread(&thread_id).await?;
        tracing::info!(session_id = %session_id, "deleted thread");

        self.signal.emit(ThreadsUpdated {
            reason: ThreadsUpdatedReason::ThreadDeleted,
            session_id: Some(session_id.clone()),
        });

        if self.binder.session_id() == Some(session_id) {
            return Ok(Some(self.new_chat()));
        }
        Ok(None)
    }

    /// The "jump to latest" control.
    pub fn resume_follow(&mut self) -> bool {
        self.scroll.resume(&mut self.viewport, Instant::now())
    }

    /// Forwards a scroll event from the viewport.
    pub fn handle_scroll(&mut self, metrics: ViewportMetrics) -> bool {
        self.scroll.handle_scroll(metrics, Instant::now())
    }

    /// Waits for the next background event or timer and applies it.
    pub async fn step(&mut self) {
        let deadline = self.next_deadline();
        tokio::select! {
            event = self.events_rx.recv() => {
                if let Some(event) = event {
                    self.handle_event(event);
                }
            }
            _ = sleep_until_deadline(deadline) => {
                self.handle_timers(Instant::now());
            }
        }
    }

    /// Drives the view until no stream, fetch or pending flush remains.
    pub async fn run_until_idle(&mut self) {
        while self.has_pending_work() {
            self.step().await;
        }
        self.process_pending();
    }

    /// Applies queued events and expired timers without waiting.
    pub fn process_pending(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
        self.handle_timers(Instant::now());
    }

    /// True while a stream, a history fetch or a deferred flush is outstanding.
    pub fn has_pending_work(&self) -> bool {
        self.active_stream.is_some()
            || self.hydrator.is_hydrating()
            || self.reconciler.next_deadline().is_some()
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.reconciler.next_deadline(), self.scroll.next_deadline()) {
            (Some(flush), Some(scroll)) => Some(flush.min(scroll)),
            (flush, scroll) => flush.or(scroll),
        }
    }

    fn enter_session(&mut self, session_id: Option<SessionId>) {
        self.cancel_active_stream();
        self.clear_conversation();
        self.scroll.reset();

        match self.hydrator.begin(session_id.as_ref()) {
            HydrationStart::Skipped => tracing::debug!("no session, starting empty"),
            HydrationStart::Fetch(ticket) => self.spawn_hydration(ticket),
        }
    }

    fn clear_conversation(&mut self) {
        self.reconciler.reset();
        self.viewport.sync_content(&[]);
    }

    fn cancel_active_stream(&mut self) {
        if let Some(active) = self.active_stream.take() {
            tracing::debug!(generation = active.generation, "cancelling active stream");
            active.cancel();
        }
    }

    fn spawn_hydration(&self, ticket: HydrationTicket) {
        tracing::debug!(
            session_id = %ticket.session_id(),
            generation = ticket.generation(),
            "hydrating session history"
        );
        let history = Arc::clone(&self.history);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = ticket.fetch(history).await;
            let _ = events_tx.send(ViewEvent::Hydrated { ticket, result });
        });
    }

    fn spawn_stream(&mut self, handle: TransportStreamHandle) {
        let TransportStreamHandle { mut stream, worker } = handle;
        let generation = stream.generation();
        let worker_task = tokio::spawn(worker);

        let events_tx = self.events_tx.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(notification) = stream.recv().await {
                if events_tx
                    .send(ViewEvent::Notification {
                        generation,
                        notification,
                    })
                    .is_err()
                {
                    return;
                }
            }
            let _ = events_tx.send(ViewEvent::StreamClosed { generation });
        });

        self.active_stream = Some(ActiveStream {
            generation,
            reader_task,
            worker_task,
        });
    }

    fn current_generation(&self) -> Option<u64> {
        self.active_stream.as_ref().map(|active| active.generation)
    }

    fn handle_event(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::Notification {
                generation,
                notification,
            } => self.handle_notification(generation, notification),
            ViewEvent::StreamClosed { generation } => self.handle_stream_closed(generation),
            ViewEvent::Hydrated { ticket, result } => self.handle_hydrated(ticket, result),
        }
    }

    fn handle_notification(&mut self, generation: u64, notification: StreamNotification) {
        if self.current_generation() != Some(generation) {
            let error = ChatError::StaleResult {
                stage: "stream-notification",
                expected: self.current_generation().unwrap_or_default(),
                actual: generation,
            };
            tracing::debug!(error = %error, "dropping superseded notification");
            return;
        }

        let now = Instant::now();
        let terminal = !notification.status.is_active();
        let transport_error = notification.error.clone();
        match self.reconciler.on_notification(notification, now) {
            Ok(outcome) => self.after_reconcile(outcome, now),
            Err(error) => {
                tracing::debug!(generation, error = %error, "ignored stream notification");
                return;
            }
        }

        if let Some(message) = transport_error {
            self.record_transport_error("stream-notification", generation, message);
        }
        if terminal {
            self.finish_stream(generation);
        }
    }

    fn handle_stream_closed(&mut self, generation: u64) {
        // A terminal notification already finished this generation.
        if self.current_generation() != Some(generation) {
            return;
        }

        self.record_transport_error(
            "stream-closed",
            generation,
            "stream ended before the response completed".to_string(),
        );
        let outcome = self.reconciler.complete();
        self.after_reconcile(outcome, Instant::now());
        self.finish_stream(generation);
    }

    fn handle_hydrated(
        &mut self,
        ticket: HydrationTicket,
        result: StorageResult<Vec<HistoryRecord>>,
    ) {
        match self.hydrator.complete(&ticket, result) {
            Ok(HydrationOutcome::Applied(messages)) => {
                tracing::debug!(
                    session_id = %ticket.session_id(),
                    count = messages.len(),
                    "hydrated session history"
                );
                self.apply_hydrated(messages);
            }
            Ok(HydrationOutcome::Empty) => {
                self.apply_hydrated(Vec::new());
                self.signal.emit(ThreadsUpdated {
                    reason: ThreadsUpdatedReason::EmptyHydration,
                    session_id: Some(ticket.session_id().clone()),
                });
            }
            Err(error @ ChatError::StaleResult { .. }) => {
                tracing::debug!(session_id = %ticket.session_id(), error = %error, "discarded stale history");
            }
            Err(error) => {
                tracing::warn!(error = %error, "history unavailable, keeping current conversation");
            }
        }
    }

    fn apply_hydrated(&mut self, messages: Vec<Message>) {
        let now = Instant::now();
        match self
            .reconciler
            .on_notification(StreamNotification::new(messages, StreamStatus::Idle), now)
        {
            Ok(outcome) => self.after_reconcile(outcome, now),
            Err(error) => tracing::warn!(error = %error, "rejected hydrated history"),
        }
    }

    fn handle_timers(&mut self, now: Instant) {
        if let Some(outcome) = self.reconciler.on_timer(now) {
            self.after_reconcile(outcome, now);
        }
        self.scroll.clear_expired(now);
    }

    fn after_reconcile(&mut self, outcome: ReconcileOutcome, now: Instant) {
        let ReconcileOutcome::Flushed { reason, changed } = outcome else {
            return;
        };
        if !changed {
            return;
        }

        let snapshot = self.reconciler.snapshot();
        self.viewport.sync_content(&snapshot);
        self.published_snapshots += 1;
        tracing::trace!(?reason, messages = snapshot.len(), "published snapshot");

        self.scroll
            .handle_snapshot_changed(self.reconciler.status(), &mut self.viewport, now);
    }

    fn record_transport_error(&mut self, stage: &'static str, generation: u64, message: String) {
        let error = ChatError::Transport {
            stage,
            generation,
            message,
        };
        tracing::error!(error = %error, "chat stream failed");
        self.last_error = Some(error.to_string());
    }

    fn finish_stream(&mut self, generation: u64) {
        if self
            .active_stream
            .take_if(|active| active.generation == generation)
            .is_some()
        {
            tracing::debug!(generation, "chat stream finished");
            self.schedule_threads_refresh();
        }
    }

    fn schedule_threads_refresh(&self) {
        self.signal.emit_after(
            self.config.threads_refresh_delay,
            ThreadsUpdated {
                reason: ThreadsUpdatedReason::StreamCompleted,
                session_id: self.binder.session_id().cloned(),
            },
        );
    }
}

impl<V: Viewport> Drop for ChatView<V> {
    fn drop(&mut self) {
        self.cancel_active_stream();
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use agentchat_storage::{MemoryThreadStore, StorageError};
    use futures::future::BoxFuture;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::chat::message::{Part, Role};
    use crate::chat::viewport::VirtualViewport;
    use crate::settings::MemoryPreferences;
    use crate::transport::provider::make_notification_stream;
    use crate::transport::{
        DEFAULT_STEP_DELAY, ScriptedReply, ScriptedTransport, TransportResult, TransportWorker,
    };

    const USER: &str = "default_user";

    fn agent() -> AgentId {
        AgentId::new("web-search-agent")
    }

    fn deps(
        transport: impl ChatTransport + 'static,
        history: Arc<dyn HistoryStore>,
    ) -> (ChatDependencies, ThreadsUpdatedSignal) {
        let signal = ThreadsUpdatedSignal::new();
        let deps = ChatDependencies {
            transport: Arc::new(transport),
            history,
            preferences: Arc::new(MemoryPreferences::new()),
            signal: signal.clone(),
        };
        (deps, signal)
    }

    fn view_with(
        transport: impl ChatTransport + 'static,
        history: Arc<dyn HistoryStore>,
        route: Route,
    ) -> (ChatView<VirtualViewport>, ThreadsUpdatedSignal) {
        let (deps, signal) = deps(transport, history);
        let view = ChatView::new(
            ChatViewConfig::default(),
            deps,
            VirtualViewport::new(400.0),
            route,
        );
        (view, signal)
    }

    async fn seed(store: &MemoryThreadStore, raw_id: &str, records: Vec<HistoryRecord>) {
        store
            .insert_raw(
                ThreadId::parse(raw_id).expect("thread id"),
                USER,
                "web-search-agent",
                records,
                1_700_000_000,
            )
            .await;
    }

    async fn step_until(view: &mut ChatView<VirtualViewport>, done: impl Fn(&ChatView<VirtualViewport>) -> bool) {
        while !done(view) {
            view.step().await;
        }
    }

    /// History store whose fetches take a per-thread delay.
    struct SlowHistory {
        inner: MemoryThreadStore,
        delays: HashMap<String, Duration>,
    }

    impl HistoryStore for SlowHistory {
        fn fetch_history<'a>(
            &'a self,
            thread_id: &'a ThreadId,
        ) -> BoxFuture<'a, StorageResult<Vec<HistoryRecord>>> {
            let delay = self
                .delays
                .get(thread_id.as_str())
                .copied()
                .unwrap_or_default();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                self.inner.fetch_history(thread_id).await
            })
        }

        fn delete_thread<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, StorageResult<()>> {
            self.inner.delete_thread(thread_id)
        }
    }

    /// History store whose backend is unreachable.
    struct FailingHistory;

    impl HistoryStore for FailingHistory {
        fn fetch_history<'a>(
            &'a self,
            _thread_id: &'a ThreadId,
        ) -> BoxFuture<'a, StorageResult<Vec<HistoryRecord>>> {
            Box::pin(async {
                Err(StorageError::InvariantViolation {
                    stage: "fetch-history",
                    details: "backend unreachable".to_string(),
                })
            })
        }

        fn delete_thread<'a>(&'a self, _thread_id: &'a ThreadId) -> BoxFuture<'a, StorageResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Sends one partial update and then hangs up without a terminal notification.
    struct TruncatedTransport;

    impl ChatTransport for TruncatedTransport {
        fn stream_chat(&self, request: TransportRequest) -> TransportResult<TransportStreamHandle> {
            let (event_tx, stream, _cancel_rx) = make_notification_stream(request.generation);
            let worker: TransportWorker = Box::pin(async move {
                let partial = Message::assistant("a-1").with_part(Part::text("Hal"));
                let _ = event_tx.send(StreamNotification::new(
                    vec![request.message, partial],
                    StreamStatus::Streaming,
                ));
            });
            Ok(TransportStreamHandle { stream, worker })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_stream_publishes_final_buffer() {
        let transport = ScriptedTransport::new(DEFAULT_STEP_DELAY);
        let (mut view, _) = view_with(
            transport,
            Arc::new(MemoryThreadStore::new()),
            Route::new(agent()),
        );

        view.submit("hello").expect("submitted");
        assert!(view.is_streaming());
        view.run_until_idle().await;

        let messages = view.messages();
        assert_eq!(view.status(), StreamStatus::Idle);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text(), "hello");
        assert_eq!(messages[1].text(), "You said: hello");
        assert!(messages[1].has_reasoning());
        assert!(!view.reasoning_in_progress(1));
        assert!(view.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_fragments_coalesce_into_fewer_snapshots() {
        let reply = ScriptedReply::echo("a fairly long prompt to produce many fragments");
        let notifications = reply.fragments.len() + 2;
        let transport = ScriptedTransport::new(Duration::from_millis(1)).with_reply(reply);
        let (mut view, _) = view_with(
            transport,
            Arc::new(MemoryThreadStore::new()),
            Route::new(agent()),
        );

        view.submit("go").expect("submitted");
        view.run_until_idle().await;

        assert!(view.published_snapshots() >= 1);
        assert!((view.published_snapshots() as usize) < notifications);
        assert_eq!(view.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn user_scroll_holds_position_until_resume() {
        let transport = ScriptedTransport::new(Duration::from_millis(600));
        let (deps, _) = deps(transport, Arc::new(MemoryThreadStore::new()));
        let mut view = ChatView::new(
            ChatViewConfig::default(),
            deps,
            VirtualViewport::new(60.0),
            Route::new(agent()),
        );

        view.submit("tell me everything about scrolling").expect("submitted");
        step_until(&mut view, |view| view.published_snapshots() >= 2).await;
        assert!(view.viewport().programmatic_scrolls() >= 2);

        // Let the instant scroll settle before the next fragment arrives.
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The programmatic scroll landed at the bottom; the user then drags upward.
        let at_bottom = view.viewport().metrics().expect("mounted");
        assert!(!view.handle_scroll(at_bottom));
        let scrolled_up = view.viewport_mut().scroll_by(-40.0);
        assert!(view.handle_scroll(scrolled_up));
        assert!(view.show_resume_button());

        let scrolls = view.viewport().programmatic_scrolls();
        view.run_until_idle().await;
        assert_eq!(view.viewport().programmatic_scrolls(), scrolls);
        assert_eq!(view.follow_mode(), FollowMode::UserHeld);

        assert!(view.resume_follow());
        assert!(!view.show_resume_button());
        assert_eq!(view.viewport().programmatic_scrolls(), scrolls + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_shot_clamp_is_not_mistaken_for_user_scroll() {
        let config = ChatViewConfig {
            single_shot: true,
            ..ChatViewConfig::default()
        };
        let (deps, _) = deps(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            Arc::new(MemoryThreadStore::new()),
        );
        let mut view = ChatView::new(config, deps, VirtualViewport::new(60.0), Route::new(agent()));

        view.submit("first question with a longer answer").expect("submitted");
        view.run_until_idle().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        view.process_pending();
        let at_bottom = view.viewport().metrics().expect("mounted");
        assert!(at_bottom.scroll_top > 0.0);
        view.handle_scroll(at_bottom);

        // Clearing the conversation clamps the offset to the top while the submit scroll settles.
        view.submit("second").expect("submitted");
        let clamped = view.viewport().metrics().expect("mounted");
        assert_eq!(clamped.scroll_top, 0.0);
        assert!(!view.handle_scroll(clamped));
        assert_eq!(view.follow_mode(), FollowMode::Auto);

        let scrolls = view.viewport().programmatic_scrolls();
        view.run_until_idle().await;
        assert_eq!(view.follow_mode(), FollowMode::Auto);
        assert!(!view.show_resume_button());
        assert!(view.viewport().programmatic_scrolls() > scrolls);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_history_signals_threads_updated() {
        let store = Arc::new(MemoryThreadStore::new());
        let (deps, signal) = deps(ScriptedTransport::new(DEFAULT_STEP_DELAY), store);
        let mut updates = signal.subscribe();
        let mut view = ChatView::new(
            ChatViewConfig::default(),
            deps,
            VirtualViewport::new(400.0),
            Route::new(agent()).with_session(SessionId::new("chat_00000000")),
        );
        assert!(view.is_loading());

        view.run_until_idle().await;
        assert!(!view.is_loading());
        assert!(view.messages().is_empty());
        let event = updates.try_recv().expect("threads updated");
        assert_eq!(event.reason, ThreadsUpdatedReason::EmptyHydration);
        assert_eq!(
            event.session_id.as_ref().map(SessionId::as_str),
            Some("chat_00000000")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_history_is_not_fatal_and_emits_no_signal() {
        let (deps, signal) = deps(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            Arc::new(FailingHistory),
        );
        let mut updates = signal.subscribe();
        let mut view = ChatView::new(
            ChatViewConfig::default(),
            deps,
            VirtualViewport::new(400.0),
            Route::new(agent()).with_session(SessionId::new("chat_eeeeeeee")),
        );
        assert!(view.is_hydrating());

        view.run_until_idle().await;
        assert!(!view.is_hydrating());
        assert!(!view.is_loading());
        assert!(view.messages().is_empty());
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));

        view.submit("hi").expect("submitted");
        view.run_until_idle().await;
        assert_eq!(view.messages().len(), 2);
        assert_eq!(view.status(), StreamStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stored_history_hydrates_without_signal() {
        let store = Arc::new(MemoryThreadStore::new());
        seed(
            &store,
            "chat_11111111",
            vec![
                HistoryRecord::new("user", "what is rust?"),
                HistoryRecord::new("assistant", "A language.").with_reasoning("short answer"),
                HistoryRecord::new("tool", "   "),
            ],
        )
        .await;
        let (deps, signal) = deps(ScriptedTransport::new(DEFAULT_STEP_DELAY), store);
        let mut updates = signal.subscribe();
        let mut view = ChatView::new(
            ChatViewConfig::default(),
            deps,
            VirtualViewport::new(400.0),
            Route::new(agent()).with_session(SessionId::new("chat_11111111")),
        );

        view.run_until_idle().await;
        let messages = view.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id.as_str(), "user-0");
        assert_eq!(messages[1].reasoning(), "short answer");
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn late_history_from_previous_session_is_discarded() {
        let inner = MemoryThreadStore::new();
        seed(&inner, "chat_aaaaaaaa", vec![HistoryRecord::new("user", "from s1")]).await;
        seed(&inner, "chat_bbbbbbbb", vec![HistoryRecord::new("user", "from s2")]).await;
        let history = SlowHistory {
            inner,
            delays: HashMap::from([
                ("chat_aaaaaaaa".to_string(), Duration::from_millis(200)),
                ("chat_bbbbbbbb".to_string(), Duration::from_millis(10)),
            ]),
        };
        let (mut view, _) = view_with(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            Arc::new(history),
            Route::new(agent()).with_session(SessionId::new("chat_aaaaaaaa")),
        );

        let change = view.navigate(Route::new(agent()).with_session(SessionId::new("chat_bbbbbbbb")));
        assert!(matches!(change, RouteChange::Session { .. }));
        view.run_until_idle().await;
        assert_eq!(view.messages()[0].text(), "from s2");

        tokio::time::sleep(Duration::from_millis(300)).await;
        view.process_pending();
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.messages()[0].text(), "from s2");
    }

    #[tokio::test(start_paused = true)]
    async fn agent_switch_clears_only_ephemeral_conversations() {
        let (mut view, _) = view_with(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            Arc::new(MemoryThreadStore::new()),
            Route::new(agent()),
        );
        view.submit("hi").expect("submitted");
        view.run_until_idle().await;
        assert_eq!(view.messages().len(), 2);

        let navigation = view.select_agent(AgentId::new("weather-agent"));
        assert!(navigation.replace);
        assert!(view.messages().is_empty());

        let store = Arc::new(MemoryThreadStore::new());
        seed(&store, "chat_cccccccc", vec![HistoryRecord::new("user", "kept")]).await;
        let (mut view, _) = view_with(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            store,
            Route::new(agent()).with_session(SessionId::new("chat_cccccccc")),
        );
        view.run_until_idle().await;

        let navigation = view.select_agent(AgentId::new("weather-agent"));
        assert_eq!(
            navigation.route.session_id.as_ref().map(SessionId::as_str),
            Some("chat_cccccccc")
        );
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.agent_id().as_str(), "weather-agent");
    }

    #[tokio::test(start_paused = true)]
    async fn submit_rejections() {
        let store = Arc::new(MemoryThreadStore::new());
        let (mut view, _) = view_with(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            store,
            Route::new(agent()).with_session(SessionId::new("chat_dddddddd")),
        );

        assert!(matches!(view.submit("  "), Err(SubmitRejected::BlankInput { .. })));
        assert!(matches!(view.submit("hi"), Err(SubmitRejected::Hydrating { .. })));

        view.run_until_idle().await;
        view.submit("hi").expect("submitted");
        assert!(matches!(view.submit("again"), Err(SubmitRejected::StreamActive { .. })));
        view.run_until_idle().await;

        let restricted = ScriptedTransport::new(DEFAULT_STEP_DELAY)
            .with_agents(vec![AgentId::new("weather-agent")]);
        let (mut view, _) = view_with(
            restricted,
            Arc::new(MemoryThreadStore::new()),
            Route::new(agent()),
        );
        assert!(matches!(
            view.submit("hi"),
            Err(SubmitRejected::TransportUnavailable { .. })
        ));
        assert!(view.last_error().is_some());
        assert!(!view.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn single_shot_clears_before_each_submission() {
        let config = ChatViewConfig {
            single_shot: true,
            ..ChatViewConfig::default()
        };
        let (deps, _) = deps(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            Arc::new(MemoryThreadStore::new()),
        );
        let mut view = ChatView::new(config, deps, VirtualViewport::new(400.0), Route::new(agent()));

        view.submit("first").expect("submitted");
        view.run_until_idle().await;
        view.submit("second").expect("submitted");
        view.run_until_idle().await;

        let messages = view.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_keeps_partial_content_and_goes_idle() {
        let transport = ScriptedTransport::new(DEFAULT_STEP_DELAY)
            .with_reply(ScriptedReply::new(vec![
                Part::text("partial "),
                Part::text("never"),
            ]))
            .with_failure_after(1);
        let (mut view, _) = view_with(
            transport,
            Arc::new(MemoryThreadStore::new()),
            Route::new(agent()),
        );

        view.submit("hi").expect("submitted");
        view.run_until_idle().await;

        assert_eq!(view.status(), StreamStatus::Idle);
        assert!(!view.is_streaming());
        assert!(view.last_error().is_some());
        assert_eq!(view.messages()[1].text(), "partial ");
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_without_completion_is_a_transport_error() {
        let (mut view, _) = view_with(
            TruncatedTransport,
            Arc::new(MemoryThreadStore::new()),
            Route::new(agent()),
        );

        view.submit("hi").expect("submitted");
        view.run_until_idle().await;

        assert_eq!(view.status(), StreamStatus::Idle);
        assert_eq!(view.messages()[1].text(), "Hal");
        assert!(
            view.last_error()
                .is_some_and(|error| error.contains("stream ended"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_keeps_received_content_and_ignores_the_rest() {
        let (mut view, _) = view_with(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            Arc::new(MemoryThreadStore::new()),
            Route::new(agent()),
        );

        view.submit("a prompt with several words").expect("submitted");
        step_until(&mut view, |view| view.status() == StreamStatus::Streaming).await;
        assert!(view.stop());
        assert!(!view.stop());

        let stopped = view.messages();
        assert_eq!(view.status(), StreamStatus::Idle);
        assert_eq!(stopped.len(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        view.process_pending();
        assert_eq!(view.messages(), stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_refreshes_thread_list_after_delay() {
        let (deps, signal) = deps(
            ScriptedTransport::new(DEFAULT_STEP_DELAY),
            Arc::new(MemoryThreadStore::new()),
        );
        let mut updates = signal.subscribe();
        let mut view = ChatView::new(
            ChatViewConfig::default(),
            deps,
            VirtualViewport::new(400.0),
            Route::new(agent()),
        );

        view.submit("hi").expect("submitted");
        view.run_until_idle().await;
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));

        let event = updates.recv().await.expect("threads updated");
        assert_eq!(event.reason, ThreadsUpdatedReason::StreamCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_open_thread_starts_new_chat() {
        let store = Arc::new(MemoryThreadStore::new());
        seed(&store, "chat_eeeeeeee", vec![HistoryRecord::new("user", "bye")]).await;
        let (deps, signal) = deps(ScriptedTransport::new(DEFAULT_STEP_DELAY), store.clone());
        let mut updates = signal.subscribe();
        let open = SessionId::new("chat_eeeeeeee");
        let mut view = ChatView::new(
            ChatViewConfig::default(),
            deps,
            VirtualViewport::new(400.0),
            Route::new(agent()).with_session(open.clone()),
        );
        view.run_until_idle().await;

        let navigation = view
            .delete_thread(&open)
            .await
            .expect("deleted")
            .expect("new chat");
        assert_ne!(navigation.route.session_id.as_ref(), Some(&open));
        assert_eq!(view.session_id(), navigation.route.session_id.as_ref());
        assert_eq!(
            updates.try_recv().map(|event| event.reason),
            Ok(ThreadsUpdatedReason::ThreadDeleted)
        );

        let other = view
            .delete_thread(&SessionId::new("chat_ffffffff"))
            .await
            .expect("deleted");
        assert!(other.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_threads_are_saved_and_reopen() {
        let store = Arc::new(MemoryThreadStore::new());
        let transport =
            ScriptedTransport::new(DEFAULT_STEP_DELAY).with_store(store.clone());
        let session = SessionId::new("chat_12121212");
        let (mut view, _) = view_with(
            transport,
            store.clone(),
            Route::new(agent()).with_session(session.clone()),
        );
        view.run_until_idle().await;
        view.submit("remember me").expect("submitted");
        view.run_until_idle().await;

        view.new_chat();
        view.run_until_idle().await;
        assert!(view.messages().is_empty());

        view.navigate(Route::new(agent()).with_session(session));
        view.run_until_idle().await;
        let messages = view.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text(), "You said: remember me");
        assert!(messages[1].has_reasoning());
    }
}
