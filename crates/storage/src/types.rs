use serde::{Deserialize, Serialize};

use super::ids::ThreadId;

/// Sidebar previews are cut to this many characters of the first user record.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// One persisted conversation record, exactly as the history boundary reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl HistoryRecord {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: role.into(),
            content: content.into(),
            reasoning: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Storage-local role, intentionally decoupled from chat-layer role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordRole {
    User,
    Assistant,
}

impl RecordRole {
    /// Maps stored role spellings onto the two conversational roles.
    ///
    /// Returns `None` for roles that never surface in a transcript (system, tool).
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim() {
            "user" | "human" => Some(Self::User),
            "assistant" | "ai" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub thread_id: ThreadId,
    pub agent_id: String,
    pub preview: String,
    pub updated_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveThread {
    pub thread_id: ThreadId,
    pub user_id: String,
    pub agent_id: String,
    pub records: Vec<HistoryRecord>,
}

pub fn preview_from_records(records: &[HistoryRecord]) -> String {
    records
        .iter()
        .find(|record| RecordRole::normalize(&record.role) == Some(RecordRole::User))
        .map(|record| record.content.chars().take(PREVIEW_MAX_CHARS).collect())
        .unwrap_or_default()
}

/// Applies role aliasing and drops records with non-transcript roles.
pub(crate) fn normalize_records(records: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
    records
        .into_iter()
        .filter_map(|mut record| {
            let role = RecordRole::normalize(&record.role)?;
            record.role = role.as_str().to_string();
            Some(record)
        })
        .collect()
}
