use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, DecodeRecordsSnafu, EncodeRecordsSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqliteQuerySnafu, StorageError, StorageResult,
};
use super::ids::ThreadId;
use super::types::{
    HistoryRecord, SaveThread, ThreadRecord, normalize_records, preview_from_records,
};
use super::{HistoryStore, ThreadStore};

/// Thread history persisted in a single `chat_history` table, one JSON blob per thread.
#[derive(Debug, Clone)]
pub struct SqliteThreadStore {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteThreadStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single long-lived connection keeps `sqlite::memory:` databases alive for the pool lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "opened sqlite thread store");
        Ok(Self { pool, database_url })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    async fn load_records(&self, thread_id: &ThreadId) -> StorageResult<Vec<HistoryRecord>> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT messages FROM chat_history WHERE thread_id = ?",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "history-fetch-query",
        })?;

        let Some(payload) = payload else {
            return Ok(Vec::new());
        };

        let records: Vec<HistoryRecord> =
            serde_json::from_str(&payload).context(DecodeRecordsSnafu {
                stage: "history-fetch-decode",
                thread_id: thread_id.to_string(),
            })?;

        Ok(normalize_records(records))
    }

    async fn remove_thread(&self, thread_id: &ThreadId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM chat_history WHERE thread_id = ?")
            .bind(thread_id.as_str())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "thread-delete",
            })?;

        tracing::debug!(
            thread_id = %thread_id,
            rows_affected = result.rows_affected(),
            "deleted thread"
        );
        Ok(())
    }

    async fn upsert_thread(&self, input: SaveThread) -> StorageResult<ThreadRecord> {
        let preview = preview_from_records(&input.records);
        let payload = serde_json::to_string(&input.records).context(EncodeRecordsSnafu {
            stage: "thread-save-encode",
            thread_id: input.thread_id.to_string(),
        })?;
        let now = unix_timestamp_seconds();

        sqlx::query(
            "INSERT INTO chat_history (thread_id, user_id, agent_id, messages, preview, updated_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(thread_id) DO UPDATE SET messages = excluded.messages, preview = excluded.preview, updated_at = excluded.updated_at",
        )
        .bind(input.thread_id.as_str())
        .bind(&input.user_id)
        .bind(&input.agent_id)
        .bind(payload)
        .bind(&preview)
        .bind(now)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "thread-save-upsert",
        })?;

        // The owning agent is fixed at creation; report what the row actually holds.
        let agent_id = sqlx::query_scalar::<_, String>(
            "SELECT agent_id FROM chat_history WHERE thread_id = ?",
        )
        .bind(input.thread_id.as_str())
        .fetch_one(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "thread-save-load-agent",
        })?;

        Ok(ThreadRecord {
            thread_id: input.thread_id,
            agent_id,
            preview,
            updated_at_unix_seconds: i64_to_u64(now, "thread-save-updated-at")?,
        })
    }

    async fn query_threads(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
    ) -> StorageResult<Vec<ThreadRecord>> {
        let rows = match agent_id {
            Some(agent_id) => {
                sqlx::query_as::<_, ThreadRow>(
                    "SELECT thread_id, agent_id, preview, updated_at FROM chat_history WHERE user_id = ? AND agent_id = ? ORDER BY updated_at DESC, thread_id DESC",
                )
                .bind(user_id)
                .bind(agent_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, ThreadRow>(
                    "SELECT thread_id, agent_id, preview, updated_at FROM chat_history WHERE user_id = ? ORDER BY updated_at DESC, thread_id DESC",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context(SqliteQuerySnafu {
            stage: "thread-list-query",
        })?;

        rows.into_iter().map(thread_row_to_record).collect()
    }
}

impl HistoryStore for SqliteThreadStore {
    fn fetch_history<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> BoxFuture<'a, StorageResult<Vec<HistoryRecord>>> {
        Box::pin(self.load_records(thread_id))
    }

    fn delete_thread<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(self.remove_thread(thread_id))
    }
}

impl ThreadStore for SqliteThreadStore {
    fn save_thread<'a>(&'a self, input: SaveThread) -> BoxFuture<'a, StorageResult<ThreadRecord>> {
        Box::pin(self.upsert_thread(input))
    }

    fn list_threads<'a>(
        &'a self,
        user_id: &'a str,
        agent_id: Option<&'a str>,
    ) -> BoxFuture<'a, StorageResult<Vec<ThreadRecord>>> {
        Box::pin(self.query_threads(user_id, agent_id))
    }
}

#[derive(Debug, FromRow)]
struct ThreadRow {
    thread_id: String,
    agent_id: String,
    preview: String,
    updated_at: i64,
}

fn thread_row_to_record(row: ThreadRow) -> StorageResult<ThreadRecord> {
    Ok(ThreadRecord {
        thread_id: ThreadId::parse(&row.thread_id)?,
        agent_id: row.agent_id,
        preview: row.preview,
        updated_at_unix_seconds: i64_to_u64(row.updated_at, "thread-row-updated-at")?,
    })
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
