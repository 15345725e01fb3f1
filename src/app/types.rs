use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    User,
    Assistant,
}

impl Role {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One completed message in the conversation. Appended exactly once per
/// finished turn and never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ConversationEntry {
    pub(crate) role: Role,
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) attached_image: Option<String>,
}

impl ConversationEntry {
    pub(crate) fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attached_image: None,
        }
    }
}

/// Everything the backend can say, one JSON object per line, tagged by
/// `type`. Unknown tags and missing fields fail deserialization and are
/// handled at the transport boundary.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerEvent {
    Message {
        content: String,
    },
    Stream {
        token: String,
    },
    StreamEnd,
    Image {
        src: String,
        #[serde(default)]
        alt: String,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        args: Value,
    },
    Error {
        content: String,
    },
    /// Spoken-audio reference for the last reply. Playback happens elsewhere;
    /// the client only surfaces that it arrived.
    Audio {
        src: String,
    },
}

/// Channel payload from the transport reader to the main loop.
#[derive(Clone, Debug)]
pub(crate) enum Inbound {
    Server(ServerEvent),
    /// A line that failed to parse as a protocol event. Carried for the
    /// notice it produces; never terminates the stream.
    Malformed(String),
}

/// One user submission on the wire.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct Outgoing {
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) tts: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NoticeKind {
    Info,
    Error,
}

/// Out-of-transcript line shown in the notices strip (errors, audio
/// arrivals, local diagnostics).
#[derive(Clone, Debug)]
pub(crate) struct Notice {
    pub(crate) kind: NoticeKind,
    pub(crate) text: String,
}

impl Notice {
    pub(crate) fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }

    pub(crate) fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }
}
