//! Invocation context handed to commands and dev values.

use std::sync::{Arc, Mutex, PoisonError};

use instacmd_types::InboundMessage;

/// What a snippet function sees of the message that triggered it.
///
/// Clones share one reply buffer, so replies queued from inside a script
/// are visible to the host after the call returns.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub author_id: String,
    pub author_name: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    /// Full message text, prefix included.
    pub content: String,
    /// Whitespace-separated words after the command name.
    pub args: Vec<String>,
    pub prefix: String,
    pub is_owner: bool,
    replies: Arc<Mutex<Vec<String>>>,
}

impl CommandContext {
    pub fn from_message(
        message: &InboundMessage,
        prefix: &str,
        args: Vec<String>,
        is_owner: bool,
    ) -> Self {
        Self {
            author_id: message.author_id.clone(),
            author_name: message.author_name.clone(),
            channel_id: message.channel_id.clone(),
            guild_id: message.guild_id.clone(),
            content: message.content.clone(),
            args,
            prefix: prefix.to_string(),
            is_owner,
            replies: Arc::default(),
        }
    }

    /// Queue a reply to the invoking channel.
    pub fn send(&self, text: &str) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }

    /// Drain queued replies.
    pub fn take_replies(&self) -> Vec<String> {
        std::mem::take(&mut *self.replies.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_replies() {
        let ctx = CommandContext::default();
        let copy = ctx.clone();
        copy.send("one");
        ctx.send("two");
        assert_eq!(ctx.take_replies(), vec!["one", "two"]);
        assert!(copy.take_replies().is_empty());
    }
}
