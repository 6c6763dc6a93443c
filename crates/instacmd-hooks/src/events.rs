//! Bot event types.

use serde::{Deserialize, Serialize};

use instacmd_types::InboundMessage;

/// Events that listeners can subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    /// The gateway session is ready.
    Ready { user_name: String, guild_count: usize },
    /// A message was posted.
    Message { message: InboundMessage },
    /// A message was deleted.
    MessageDelete {
        channel_id: String,
        message_id: String,
    },
    /// A reaction was added to a message.
    ReactionAdd {
        channel_id: String,
        message_id: String,
        user_id: String,
        emoji: String,
    },
    /// A command ran to completion.
    CommandCompletion {
        command: String,
        channel_id: String,
        invoker_id: String,
    },
    /// A command failed.
    CommandError {
        command: String,
        channel_id: String,
        error: String,
    },
}

impl BotEvent {
    /// Event name listeners subscribe with.
    pub fn name(&self) -> &str {
        match self {
            BotEvent::Ready { .. } => "on_ready",
            BotEvent::Message { .. } => "on_message",
            BotEvent::MessageDelete { .. } => "on_message_delete",
            BotEvent::ReactionAdd { .. } => "on_reaction_add",
            BotEvent::CommandCompletion { .. } => "on_command_completion",
            BotEvent::CommandError { .. } => "on_command_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let ready = BotEvent::Ready {
            user_name: "bot".into(),
            guild_count: 1,
        };
        assert_eq!(ready.name(), "on_ready");

        let deleted = BotEvent::MessageDelete {
            channel_id: "1".into(),
            message_id: "2".into(),
        };
        assert_eq!(deleted.name(), "on_message_delete");
    }

    #[test]
    fn test_event_serde_tag() {
        let event = BotEvent::ReactionAdd {
            channel_id: "1".into(),
            message_id: "2".into(),
            user_id: "3".into(),
            emoji: "✅".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reaction_add");
        assert_eq!(json["emoji"], "✅");
    }
}
