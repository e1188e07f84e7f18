use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agentchat_storage::{ThreadRecord, ThreadStore};
use tokio::sync::broadcast;

use crate::chat::binder::{NavigationRequest, Route};
use crate::chat::events::{ThreadsUpdated, ThreadsUpdatedSignal};
use crate::chat::message::{AgentId, SessionId};

const DAY_SECONDS: u64 = 60 * 60 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadAgeGroup {
    Today,
    Yesterday,
    PreviousSevenDays,
    Older,
}

impl ThreadAgeGroup {
    pub fn title(self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::PreviousSevenDays => "Previous 7 days",
            Self::Older => "Older",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadGroup {
    pub group: ThreadAgeGroup,
    pub threads: Vec<ThreadRecord>,
}

/// Buckets threads by age, keeping input order inside a bucket and omitting empty buckets.
pub fn group_threads(threads: &[ThreadRecord], now_unix_seconds: u64) -> Vec<ThreadGroup> {
    let order = [
        ThreadAgeGroup::Today,
        ThreadAgeGroup::Yesterday,
        ThreadAgeGroup::PreviousSevenDays,
        ThreadAgeGroup::Older,
    ];

    order
        .into_iter()
        .filter_map(|group| {
            let members = threads
                .iter()
                .filter(|thread| classify_group(thread.updated_at_unix_seconds, now_unix_seconds) == group)
                .cloned()
                .collect::<Vec<_>>();
            (!members.is_empty()).then_some(ThreadGroup {
                group,
                threads: members,
            })
        })
        .collect()
}

fn classify_group(updated_at_unix_seconds: u64, now_unix_seconds: u64) -> ThreadAgeGroup {
    let age_seconds = now_unix_seconds.saturating_sub(updated_at_unix_seconds);

    // Elapsed-time buckets avoid a timezone dependency.
    if age_seconds < DAY_SECONDS {
        ThreadAgeGroup::Today
    } else if age_seconds < DAY_SECONDS * 2 {
        ThreadAgeGroup::Yesterday
    } else if age_seconds < DAY_SECONDS * 7 {
        ThreadAgeGroup::PreviousSevenDays
    } else {
        ThreadAgeGroup::Older
    }
}

fn unix_now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

/// Thread listing for one user, reloaded whenever "threads updated" fires.
pub struct ThreadSidebar {
    store: Arc<dyn ThreadStore>,
    user_id: String,
    threads: Vec<ThreadRecord>,
    updates: broadcast::Receiver<ThreadsUpdated>,
}

impl ThreadSidebar {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        user_id: impl Into<String>,
        signal: &ThreadsUpdatedSignal,
    ) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            threads: Vec::new(),
            updates: signal.subscribe(),
        }
    }

    pub fn threads(&self) -> &[ThreadRecord] {
        &self.threads
    }

    pub fn groups(&self) -> Vec<ThreadGroup> {
        group_threads(&self.threads, unix_now_seconds())
    }

    /// Reloads the listing. A failed load keeps the previous list.
    pub async fn reload(&mut self) -> bool {
        match self.store.list_threads(&self.user_id, None).await {
            Ok(threads) => {
                tracing::debug!(count = threads.len(), "reloaded thread list");
                self.threads = threads;
                true
            }
            Err(error) => {
                tracing::warn!(user_id = %self.user_id, error = %error, "failed to load threads");
                false
            }
        }
    }

    /// Reloads if any update was signalled since the last check, without waiting.
    pub async fn refresh_if_signalled(&mut self) -> bool {
        let mut signalled = false;
        loop {
            match self.updates.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => signalled = true,
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }

        if signalled {
            self.reload().await;
        }
        signalled
    }

    /// Waits for the next update signal, then reloads. Returns false once the signal is gone.
    pub async fn wait_and_reload(&mut self) -> bool {
        match self.updates.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                self.reload().await;
                true
            }
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }

    /// Opening a thread routes to its owning agent.
    pub fn route_for(thread: &ThreadRecord, fallback_agent: &AgentId) -> NavigationRequest {
        let agent_id = if thread.agent_id.trim().is_empty() {
            fallback_agent.clone()
        } else {
            AgentId::new(thread.agent_id.as_str())
        };

        NavigationRequest {
            route: Route::new(agent_id).with_session(SessionId::new(thread.thread_id.as_str())),
            replace: false,
        }
    }
}
