use std::fmt;

use uuid::Uuid;

// Macro keeps every string-backed chat id wrapper structurally identical.
macro_rules! define_chat_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

define_chat_id!(
    /// Message identifier, unique within one session.
    MessageId
);
impl MessageId {
    /// Fresh id for a locally created message, e.g. `msg_1a2b3c4d5e6f`.
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("msg_{}", &raw[..12]))
    }
}

define_chat_id!(
    /// Persisted conversation (thread) identifier. Absent means ephemeral.
    SessionId
);
define_chat_id!(
    /// Identifier of the agent answering in a conversation.
    AgentId
);

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Persisted roles other than `user` render as assistant turns.
    pub fn from_persisted(raw: &str) -> Self {
        if raw == "user" {
            Self::User
        } else {
            Self::Assistant
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One ordered content fragment of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Reasoning { text: String },
    Text { text: String },
}

impl Part {
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Reasoning { text } | Self::Text { text } => text,
        }
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::Reasoning { .. })
    }

    fn same_kind(&self, other: &Self) -> bool {
        self.is_reasoning() == other.is_reasoning()
    }

    /// Presentation rank: reasoning renders before text.
    fn render_rank(&self) -> u8 {
        match self {
            Self::Reasoning { .. } => 0,
            Self::Text { .. } => 1,
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(id: impl Into<MessageId>, role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            role,
            parts,
        }
    }

    pub fn user(id: impl Into<MessageId>, text: impl Into<String>) -> Self {
        Self::new(id, Role::User, vec![Part::text(text)])
    }

    pub fn assistant(id: impl Into<MessageId>) -> Self {
        Self::new(id, Role::Assistant, Vec::new())
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Appends a streamed fragment, extending the trailing part when it has the same kind.
    pub fn push_fragment(&mut self, fragment: Part) {
        if let Some(last) = self.parts.last_mut()
            && last.same_kind(&fragment)
        {
            match last {
                Part::Reasoning { text } | Part::Text { text } => text.push_str(fragment.content()),
            }
            return;
        }

        self.parts.push(fragment);
    }

    /// Parts in presentation order: every reasoning part before every text part,
    /// arrival order kept within a kind.
    pub fn rendered_parts(&self) -> Vec<&Part> {
        let mut parts = self.parts.iter().collect::<Vec<_>>();
        parts.sort_by_key(|part| part.render_rank());
        parts
    }

    pub fn text(&self) -> String {
        self.collect_parts(false)
    }

    pub fn reasoning(&self) -> String {
        self.collect_parts(true)
    }

    pub fn has_text(&self) -> bool {
        self.parts
            .iter()
            .any(|part| !part.is_reasoning() && !part.content().is_empty())
    }

    pub fn has_reasoning(&self) -> bool {
        self.parts.iter().any(Part::is_reasoning)
    }

    pub fn is_well_formed(&self) -> bool {
        !self.id.is_blank()
    }

    fn collect_parts(&self, reasoning: bool) -> String {
        self.parts
            .iter()
            .filter(|part| part.is_reasoning() == reasoning)
            .map(Part::content)
            .collect()
    }
}

/// Transport-reported lifecycle of the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamStatus {
    #[default]
    Idle,
    Submitted,
    Streaming,
}

impl StreamStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Submitted | Self::Streaming)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitted => "submitted",
            Self::Streaming => "streaming",
        }
    }
}

/// Whether the reasoning of the message at `index` is still being produced:
/// it is the last message, the stream is active and no text has arrived yet.
pub fn reasoning_in_progress(messages: &[Message], index: usize, status: StreamStatus) -> bool {
    let is_last = index + 1 == messages.len();
    is_last
        && status.is_active()
        && messages
            .get(index)
            .is_some_and(|message| message.role == Role::Assistant && !message.has_text())
}
