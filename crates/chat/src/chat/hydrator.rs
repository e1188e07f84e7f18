use std::sync::Arc;

use agentchat_storage::{HistoryRecord, HistoryStore, StorageResult, ThreadId};
use snafu::ResultExt;

use crate::chat::error::{ChatResult, HydrationSnafu, StaleResultSnafu};
use crate::chat::message::{Message, MessageId, Part, Role, SessionId};

/// Converts persisted records into display messages.
///
/// Records with blank text and no reasoning are dropped. Any non-empty reasoning is
/// kept as stored, whitespace included. Missing ids are synthesized
/// from role and the record's position, so repeated hydration yields identical ids.
pub fn hydrate_records(records: &[HistoryRecord]) -> Vec<Message> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let role = Role::from_persisted(&record.role);
            let reasoning = record
                .reasoning
                .as_deref()
                .filter(|reasoning| !reasoning.is_empty());
            let has_text = !record.content.trim().is_empty();
            if !has_text && reasoning.is_none() {
                return None;
            }

            let mut parts = Vec::with_capacity(2);
            if let Some(reasoning) = reasoning {
                parts.push(Part::reasoning(reasoning));
            }
            if has_text {
                parts.push(Part::text(record.content.as_str()));
            }

            let id = record
                .id
                .as_deref()
                .filter(|id| !id.trim().is_empty())
                .map(MessageId::new)
                .unwrap_or_else(|| MessageId::new(format!("{}-{index}", role.as_str())));

            Some(Message::new(id, role, parts))
        })
        .collect()
}

/// Proof that a fetch was started for one generation of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationTicket {
    generation: u64,
    session_id: SessionId,
}

impl HydrationTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Loads the raw records for this ticket's session.
    pub async fn fetch(&self, store: Arc<dyn HistoryStore>) -> StorageResult<Vec<HistoryRecord>> {
        let thread_id = ThreadId::parse(self.session_id.as_str())?;
        store.fetch_history(&thread_id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationStart {
    /// No session: the conversation starts empty and nothing is fetched.
    Skipped,
    Fetch(HydrationTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationOutcome {
    Applied(Vec<Message>),
    Empty,
}

/// Tracks which history fetch is current so late results from older sessions are discarded.
#[derive(Debug, Default)]
pub struct HistoryHydrator {
    generation: u64,
    in_flight: Option<SessionId>,
}

impl HistoryHydrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_hydrating(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<&SessionId> {
        self.in_flight.as_ref()
    }

    /// Starts hydration for a session, invalidating every earlier ticket.
    pub fn begin(&mut self, session_id: Option<&SessionId>) -> HydrationStart {
        self.generation = self.generation.saturating_add(1);
        let Some(session_id) = session_id else {
            self.in_flight = None;
            return HydrationStart::Skipped;
        };

        self.in_flight = Some(session_id.clone());
        HydrationStart::Fetch(HydrationTicket {
            generation: self.generation,
            session_id: session_id.clone(),
        })
    }

    /// Checks the ticket against the current generation and converts the fetch result.
    pub fn complete(
        &mut self,
        ticket: &HydrationTicket,
        result: StorageResult<Vec<HistoryRecord>>,
    ) -> ChatResult<HydrationOutcome> {
        if ticket.generation != self.generation {
            return StaleResultSnafu {
                stage: "hydration-complete",
                expected: self.generation,
                actual: ticket.generation,
            }
            .fail();
        }

        self.in_flight = None;
        let records = result.context(HydrationSnafu {
            stage: "hydration-fetch",
            session_id: ticket.session_id.to_string(),
        })?;

        let messages = hydrate_records(&records);
        if messages.is_empty() {
            Ok(HydrationOutcome::Empty)
        } else {
            Ok(HydrationOutcome::Applied(messages))
        }
    }
}

#[cfg(test)]
mod tests {
    use agentchat_storage::{MemoryThreadStore, StorageError};

    use super::*;
    use crate::chat::error::ChatError;

    #[test]
    fn records_map_to_parts_with_reasoning_first() {
        let records = vec![
            HistoryRecord::new("user", "What's the weather?").with_id("m-1"),
            HistoryRecord::new("assistant", "Sunny.").with_reasoning("check forecast"),
            HistoryRecord::new("tool", "   "),
            HistoryRecord::new("assistant", "").with_reasoning("only thinking"),
        ];

        let messages = hydrate_records(&records);
        assert_eq!(messages.len(), 3);

        assert_eq!(messages[0].id.as_str(), "m-1");
        assert_eq!(messages[0].role, Role::User);

        assert_eq!(messages[1].id.as_str(), "assistant-1");
        assert_eq!(
            messages[1].parts,
            [Part::reasoning("check forecast"), Part::text("Sunny.")]
        );

        assert_eq!(messages[2].id.as_str(), "assistant-3");
        assert_eq!(messages[2].parts, [Part::reasoning("only thinking")]);
    }

    #[test]
    fn only_text_is_trimmed_when_checking_emptiness() {
        let records = vec![
            HistoryRecord::new("assistant", "").with_reasoning(" "),
            HistoryRecord::new("assistant", " \n "),
            HistoryRecord::new("assistant", "\t").with_reasoning(""),
            HistoryRecord::new("assistant", " \n ").with_reasoning("thinking"),
        ];

        let messages = hydrate_records(&records);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id.as_str(), "assistant-0");
        assert_eq!(messages[0].parts, [Part::reasoning(" ")]);
        assert_eq!(messages[1].id.as_str(), "assistant-3");
        assert_eq!(messages[1].parts, [Part::reasoning("thinking")]);
    }

    #[test]
    fn synthesized_ids_are_stable_across_repeated_hydration() {
        let records = vec![
            HistoryRecord::new("user", "one"),
            HistoryRecord::new("assistant", "two"),
        ];

        let first = hydrate_records(&records);
        let second = hydrate_records(&records);
        assert_eq!(first, second);
        assert_eq!(first[0].id.as_str(), "user-0");
    }

    #[test]
    fn missing_session_skips_fetch() {
        let mut hydrator = HistoryHydrator::new();
        assert_eq!(hydrator.begin(None), HydrationStart::Skipped);
        assert!(!hydrator.is_hydrating());
    }

    #[test]
    fn result_for_superseded_session_is_stale() {
        let mut hydrator = HistoryHydrator::new();
        let HydrationStart::Fetch(first) = hydrator.begin(Some(&SessionId::new("s1"))) else {
            panic!("expected fetch");
        };
        let HydrationStart::Fetch(second) = hydrator.begin(Some(&SessionId::new("s2"))) else {
            panic!("expected fetch");
        };

        let stale = hydrator.complete(&first, Ok(vec![HistoryRecord::new("user", "old")]));
        assert!(matches!(stale, Err(ChatError::StaleResult { .. })));
        assert!(hydrator.is_hydrating());

        let current = hydrator
            .complete(&second, Ok(vec![HistoryRecord::new("user", "new")]))
            .expect("current result");
        let HydrationOutcome::Applied(messages) = current else {
            panic!("expected messages");
        };
        assert_eq!(messages[0].text(), "new");
        assert!(!hydrator.is_hydrating());
    }

    #[test]
    fn empty_and_failed_fetches_are_distinct() {
        let mut hydrator = HistoryHydrator::new();
        let HydrationStart::Fetch(ticket) = hydrator.begin(Some(&SessionId::new("s1"))) else {
            panic!("expected fetch");
        };
        let outcome = hydrator
            .complete(&ticket, Ok(vec![HistoryRecord::new("assistant", " ")]))
            .expect("empty is not an error");
        assert_eq!(outcome, HydrationOutcome::Empty);

        let HydrationStart::Fetch(ticket) = hydrator.begin(Some(&SessionId::new("s1"))) else {
            panic!("expected fetch");
        };
        let failure = StorageError::InvariantViolation {
            stage: "test",
            details: "boom".to_string(),
        };
        let failed = hydrator.complete(&ticket, Err(failure));
        assert!(matches!(failed, Err(ChatError::Hydration { .. })));
        assert!(!hydrator.is_hydrating());
    }

    #[tokio::test]
    async fn ticket_fetches_from_history_store() {
        let store = Arc::new(MemoryThreadStore::new());
        store
            .insert_raw(
                ThreadId::parse("chat_00ff00ff").expect("thread id"),
                "default_user",
                "web-search-agent",
                vec![HistoryRecord::new("human", "hi")],
                1,
            )
            .await;

        let mut hydrator = HistoryHydrator::new();
        let HydrationStart::Fetch(ticket) =
            hydrator.begin(Some(&SessionId::new("chat_00ff00ff")))
        else {
            panic!("expected fetch");
        };

        let records = ticket.fetch(store).await.expect("fetch");
        assert_eq!(records[0].role, "user");
    }
}
