pub mod error;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;

use futures::future::BoxFuture;

pub use error::{StorageError, StorageResult};
pub use ids::ThreadId;
pub use memory::MemoryThreadStore;
pub use sqlite::SqliteThreadStore;
pub use types::{
    HistoryRecord, PREVIEW_MAX_CHARS, RecordRole, SaveThread, ThreadRecord, preview_from_records,
};

/// Read/delete surface the chat view depends on.
pub trait HistoryStore: Send + Sync {
    /// Returns the persisted records for one thread in conversation order.
    ///
    /// Unknown threads resolve to an empty list rather than an error.
    fn fetch_history<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> BoxFuture<'a, StorageResult<Vec<HistoryRecord>>>;

    /// Removes a thread. Deleting a missing thread succeeds.
    fn delete_thread<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, StorageResult<()>>;
}

/// Full thread store used by writers (the transport side) and thread listings.
pub trait ThreadStore: HistoryStore {
    fn save_thread<'a>(&'a self, input: SaveThread) -> BoxFuture<'a, StorageResult<ThreadRecord>>;

    fn list_threads<'a>(
        &'a self,
        user_id: &'a str,
        agent_id: Option<&'a str>,
    ) -> BoxFuture<'a, StorageResult<Vec<ThreadRecord>>>;
}
