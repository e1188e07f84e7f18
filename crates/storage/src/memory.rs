use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use super::error::StorageResult;
use super::ids::ThreadId;
use super::types::{
    HistoryRecord, SaveThread, ThreadRecord, normalize_records, preview_from_records,
};
use super::{HistoryStore, ThreadStore};

#[derive(Debug, Clone)]
struct StoredThread {
    user_id: String,
    agent_id: String,
    records: Vec<HistoryRecord>,
    preview: String,
    updated_at_unix_seconds: u64,
}

/// Process-local store with the same observable semantics as the sqlite store.
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: RwLock<HashMap<ThreadId, StoredThread>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a thread with raw records, bypassing normalization on write.
    pub async fn insert_raw(
        &self,
        thread_id: ThreadId,
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        records: Vec<HistoryRecord>,
        updated_at_unix_seconds: u64,
    ) {
        let preview = preview_from_records(&records);
        self.threads.write().await.insert(
            thread_id,
            StoredThread {
                user_id: user_id.into(),
                agent_id: agent_id.into(),
                records,
                preview,
                updated_at_unix_seconds,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.threads.read().await.is_empty()
    }
}

impl HistoryStore for MemoryThreadStore {
    fn fetch_history<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> BoxFuture<'a, StorageResult<Vec<HistoryRecord>>> {
        Box::pin(async move {
            let threads = self.threads.read().await;
            let records = threads
                .get(thread_id)
                .map(|thread| thread.records.clone())
                .unwrap_or_default();
            Ok(normalize_records(records))
        })
    }

    fn delete_thread<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let removed = self.threads.write().await.remove(thread_id).is_some();
            tracing::debug!(thread_id = %thread_id, removed, "deleted thread");
            Ok(())
        })
    }
}

impl ThreadStore for MemoryThreadStore {
    fn save_thread<'a>(&'a self, input: SaveThread) -> BoxFuture<'a, StorageResult<ThreadRecord>> {
        Box::pin(async move {
            let preview = preview_from_records(&input.records);
            let now = unix_timestamp_seconds();
            let mut threads = self.threads.write().await;
            let entry = threads
                .entry(input.thread_id.clone())
                .or_insert_with(|| StoredThread {
                    user_id: input.user_id.clone(),
                    agent_id: input.agent_id.clone(),
                    records: Vec::new(),
                    preview: String::new(),
                    updated_at_unix_seconds: now,
                });
            entry.records = input.records;
            entry.preview = preview.clone();
            entry.updated_at_unix_seconds = now;

            Ok(ThreadRecord {
                thread_id: input.thread_id,
                agent_id: entry.agent_id.clone(),
                preview,
                updated_at_unix_seconds: now,
            })
        })
    }

    fn list_threads<'a>(
        &'a self,
        user_id: &'a str,
        agent_id: Option<&'a str>,
    ) -> BoxFuture<'a, StorageResult<Vec<ThreadRecord>>> {
        Box::pin(async move {
            let threads = self.threads.read().await;
            let mut listed = threads
                .iter()
                .filter(|(_, thread)| thread.user_id == user_id)
                .filter(|(_, thread)| agent_id.is_none_or(|agent_id| thread.agent_id == agent_id))
                .map(|(thread_id, thread)| ThreadRecord {
                    thread_id: thread_id.clone(),
                    agent_id: thread.agent_id.clone(),
                    preview: thread.preview.clone(),
                    updated_at_unix_seconds: thread.updated_at_unix_seconds,
                })
                .collect::<Vec<_>>();

            listed.sort_by(|left, right| {
                right
                    .updated_at_unix_seconds
                    .cmp(&left.updated_at_unix_seconds)
                    .then_with(|| right.thread_id.cmp(&left.thread_id))
            });
            Ok(listed)
        })
    }
}

fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
