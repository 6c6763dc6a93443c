use std::fmt;

use serde::{Deserialize, Serialize};

// ──────────────────── Snippet Types ────────────────────

/// Durable bucket a snippet record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Commands and listeners, keyed by command name or listener function name.
    Commands,
    /// Values injected into the debug/eval environment.
    DevValues,
}

impl Collection {
    /// Storage table backing this collection.
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Commands => "commands",
            Collection::DevValues => "dev_values",
        }
    }

    pub fn all() -> [Collection; 2] {
        [Collection::DevValues, Collection::Commands]
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// What a compiled snippet turned into once installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetKind {
    Command,
    Listener,
    DevValue,
}

impl SnippetKind {
    /// Human-readable label used in operator messages.
    pub fn label(&self) -> &'static str {
        match self {
            SnippetKind::Command => "command",
            SnippetKind::Listener => "listener",
            SnippetKind::DevValue => "dev value",
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            SnippetKind::Command | SnippetKind::Listener => Collection::Commands,
            SnippetKind::DevValue => Collection::DevValues,
        }
    }
}

impl fmt::Display for SnippetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A persisted snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetRecord {
    /// Unique key within its collection.
    pub name: String,
    /// Snippet body as submitted, code fences stripped.
    pub source: String,
    pub collection: Collection,
    /// Last write (unix millis).
    pub updated_at: i64,
}

/// Strip the code-block markup chat clients wrap code in.
///
/// A fenced block loses its first and last line (the fence lines, including
/// any language tag); anything else loses surrounding backticks, spaces and
/// newlines.
pub fn cleanup_code(content: &str) -> String {
    if content.starts_with("```") && content.ends_with("```") {
        let lines: Vec<&str> = content.split('\n').collect();
        if lines.len() < 2 {
            return String::new();
        }
        return lines[1..lines.len() - 1].join("\n");
    }
    content
        .trim_matches(|c| c == '`' || c == ' ' || c == '\n')
        .to_string()
}

// ──────────────────── Message Types ────────────────────

/// A file attached to a chat message. The content is fetched on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    /// Download location on the platform CDN.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Message received from the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform message identifier.
    pub message_id: String,
    /// Channel the message was posted in.
    pub channel_id: String,
    /// Guild (server) identifier, None for direct messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    /// Message text content.
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Message timestamp (unix millis).
    pub timestamp: i64,
}

/// Message the bot should post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Target channel identifier on the platform.
    pub channel_id: String,
    pub text: String,
}

impl OutboundMessage {
    pub fn text(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            text: text.into(),
        }
    }
}

/// Status of the platform connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Stopped,
    Starting,
    Running,
    Error(String),
}
